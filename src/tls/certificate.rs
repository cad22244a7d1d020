//! Parsed certificate / key pairs.

use std::fmt;
use std::io::BufReader;
use std::net::IpAddr;
use std::sync::Arc;

use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls_pemfile::{certs, private_key};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::config::dynamic::CertificateConfig;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in PEM input")]
    NoCertificate,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("invalid certificate: {0}")]
    Parse(String),

    #[error("unsupported private key: {0}")]
    Key(#[from] rustls::Error),

    #[error("no certificate available for TLS entry point `{0}`")]
    EmptyStore(String),
}

/// A certificate chain with its signing key and the names it covers.
pub struct Certificate {
    /// Lowercase DNS names, wildcards kept as `*.example.com`.
    names: Vec<String>,
    ips: Vec<IpAddr>,
    key: Arc<CertifiedKey>,
    is_default: bool,
}

impl Certificate {
    /// Load a certificate from its configuration (inline PEM or file paths).
    pub fn from_config(config: &CertificateConfig) -> Result<Self, CertificateError> {
        let cert_pem = config.cert_file.read().map_err(|source| CertificateError::Read {
            what: "certificate",
            source,
        })?;
        let key_pem = config.key_file.read().map_err(|source| CertificateError::Read {
            what: "private key",
            source,
        })?;
        Self::from_pem(&cert_pem, &key_pem, config.default)
    }

    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], is_default: bool) -> Result<Self, CertificateError> {
        let chain = certs(&mut BufReader::new(cert_pem))
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|source| CertificateError::Read {
                what: "certificate",
                source,
            })?;
        let leaf = chain.first().ok_or(CertificateError::NoCertificate)?;
        let (names, ips) = subject_names(leaf)?;

        let key = private_key(&mut BufReader::new(key_pem))
            .map_err(|source| CertificateError::Read {
                what: "private key",
                source,
            })?
            .ok_or(CertificateError::NoPrivateKey)?;
        let signing_key = any_supported_type(&key)?;

        Ok(Self {
            names,
            ips,
            key: Arc::new(CertifiedKey::new(chain, signing_key)),
            is_default,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.key)
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("names", &self.names)
            .field("ips", &self.ips)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// DNS and IP subject alternative names of the leaf, or its CN when it has none.
fn subject_names(leaf: &CertificateDer<'_>) -> Result<(Vec<String>, Vec<IpAddr>), CertificateError> {
    let (_, cert) =
        parse_x509_certificate(leaf.as_ref()).map_err(|e| CertificateError::Parse(e.to_string()))?;

    let mut names = Vec::new();
    let mut ips = Vec::new();

    let san = cert
        .subject_alternative_name()
        .map_err(|e| CertificateError::Parse(e.to_string()))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => names.push(dns.to_lowercase()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        ips.push(ip);
                    }
                }
                _ => {}
            }
        }
    }

    if names.is_empty() && ips.is_empty() {
        if let Some(cn) = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
        {
            match cn.parse::<IpAddr>() {
                Ok(ip) => ips.push(ip),
                Err(_) => names.push(cn.to_lowercase()),
            }
        }
    }

    Ok((names, ips))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Self-signed PEM pair covering `names` (IP strings become IP SANs).
    pub fn pem_pair(names: &[&str]) -> (String, String) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    pub fn certificate(names: &[&str], is_default: bool) -> Arc<Certificate> {
        let (cert, key) = pem_pair(names);
        Arc::new(Certificate::from_pem(cert.as_bytes(), key.as_bytes(), is_default).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::pem_pair;
    use super::*;
    use crate::config::dynamic::FileOrContent;

    #[test]
    fn extracts_dns_and_ip_names() {
        let (cert, key) = pem_pair(&["Example.com", "*.example.com", "127.0.0.1"]);
        let parsed = Certificate::from_pem(cert.as_bytes(), key.as_bytes(), false).unwrap();
        assert_eq!(parsed.names(), ["example.com", "*.example.com"]);
        assert_eq!(parsed.ips(), ["127.0.0.1".parse::<IpAddr>().unwrap()]);
        assert!(!parsed.is_default());
    }

    #[test]
    fn loads_from_files_and_inline_content() {
        let (cert, key) = pem_pair(&["files.test"]);
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        std::fs::write(&cert_path, &cert).unwrap();

        let config = CertificateConfig {
            cert_file: FileOrContent(cert_path.display().to_string()),
            key_file: FileOrContent(key),
            entry_points: vec![],
            default: true,
        };
        let parsed = Certificate::from_config(&config).unwrap();
        assert_eq!(parsed.names(), ["files.test"]);
        assert!(parsed.is_default());
    }

    #[test]
    fn rejects_garbage() {
        let (cert, _) = pem_pair(&["a.test"]);
        assert!(matches!(
            Certificate::from_pem(b"nope", b"nope", false),
            Err(CertificateError::NoCertificate)
        ));
        assert!(matches!(
            Certificate::from_pem(cert.as_bytes(), b"nope", false),
            Err(CertificateError::NoPrivateKey)
        ));

        let missing = CertificateConfig {
            cert_file: FileOrContent("/nonexistent/cert.pem".into()),
            key_file: FileOrContent("/nonexistent/key.pem".into()),
            entry_points: vec![],
            default: false,
        };
        assert!(matches!(
            Certificate::from_config(&missing),
            Err(CertificateError::Read { what: "certificate", .. })
        ));
    }
}
