//! TLS termination.
//!
//! # Responsibilities
//! - Parse certificate / key pairs (certificate.rs)
//! - Select a certificate per handshake from the SNI name (store.rs)
//! - Build the rustls server configuration for TLS entry points
//!
//! The rustls configuration is built once per entry point; the certificate
//! set behind its resolver is swapped on every reload.

use std::sync::Arc;

use rustls::crypto::aws_lc_rs;
use rustls::server::ResolvesServerCert;
use rustls::ServerConfig;

pub mod certificate;
pub mod store;

pub use certificate::{Certificate, CertificateError};
pub use store::CertificateStore;

/// Server configuration resolving certificates through `resolver`.
pub fn server_config(resolver: Arc<dyn ResolvesServerCert>) -> Result<ServerConfig, rustls::Error> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}
