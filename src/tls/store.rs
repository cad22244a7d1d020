//! SNI certificate store.
//!
//! Resolution order for a server name:
//! 1. exact DNS name (case-insensitive)
//! 2. IP address SAN, when the name is an IP literal
//! 3. single-label wildcard (`*.example.com` covers `a.example.com` only)
//! 4. the default certificate
//!
//! A handshake without SNI gets the default certificate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::tls::certificate::Certificate;

#[derive(Debug, Clone, Default)]
pub struct CertificateStore {
    exact: HashMap<String, Arc<Certificate>>,
    /// Keyed by the part after `*.`.
    wildcards: HashMap<String, Arc<Certificate>>,
    ips: HashMap<IpAddr, Arc<Certificate>>,
    default: Option<Arc<Certificate>>,
    len: usize,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a certificate. On overlapping names the first one added wins.
    pub fn add(&mut self, certificate: Arc<Certificate>) {
        for name in certificate.names() {
            match name.strip_prefix("*.") {
                Some(suffix) => {
                    self.wildcards
                        .entry(suffix.to_string())
                        .or_insert_with(|| Arc::clone(&certificate));
                }
                None => {
                    self.exact
                        .entry(name.clone())
                        .or_insert_with(|| Arc::clone(&certificate));
                }
            }
        }
        for ip in certificate.ips() {
            self.ips
                .entry(*ip)
                .or_insert_with(|| Arc::clone(&certificate));
        }
        if certificate.is_default() && self.default.is_none() {
            self.default = Some(Arc::clone(&certificate));
        }
        self.len += 1;
    }

    /// Certificate for a TLS server name.
    pub fn resolve(&self, server_name: &str) -> Option<Arc<Certificate>> {
        let name = server_name.trim_end_matches('.').to_lowercase();

        if let Some(cert) = self.exact.get(&name) {
            return Some(Arc::clone(cert));
        }
        if let Ok(ip) = name.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            if let Some(cert) = self.ips.get(&ip) {
                return Some(Arc::clone(cert));
            }
        }
        if let Some((_, parent)) = name.split_once('.') {
            if let Some(cert) = self.wildcards.get(parent) {
                return Some(Arc::clone(cert));
            }
        }
        self.default.clone()
    }

    /// Certificate for a handshake, with or without SNI.
    pub fn resolve_sni(&self, server_name: Option<&str>) -> Option<Arc<Certificate>> {
        match server_name {
            Some(name) => self.resolve(name),
            None => self.default.clone(),
        }
    }

    pub fn default_certificate(&self) -> Option<&Arc<Certificate>> {
        self.default.as_ref()
    }

    /// Number of certificates added.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FromIterator<Arc<Certificate>> for CertificateStore {
    fn from_iter<I: IntoIterator<Item = Arc<Certificate>>>(iter: I) -> Self {
        let mut store = Self::new();
        for certificate in iter {
            store.add(certificate);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::certificate::test_support::certificate;

    fn names(cert: Option<Arc<Certificate>>) -> Vec<String> {
        cert.map(|c| c.names().to_vec()).unwrap_or_default()
    }

    #[test]
    fn resolution_order() {
        let exact = certificate(&["api.example.com"], false);
        let wildcard = certificate(&["*.example.com"], false);
        let ip = certificate(&["10.0.0.1"], false);
        let fallback = certificate(&["fallback.test"], true);
        let store: CertificateStore = [exact, wildcard, ip, fallback].into_iter().collect();

        assert_eq!(store.len(), 4);
        assert_eq!(names(store.resolve("API.example.com")), ["api.example.com"]);
        assert_eq!(names(store.resolve("web.example.com")), ["*.example.com"]);
        assert_eq!(
            store.resolve("10.0.0.1").unwrap().ips(),
            ["10.0.0.1".parse::<IpAddr>().unwrap()]
        );
        // Wildcards cover exactly one label.
        assert_eq!(names(store.resolve("a.b.example.com")), ["fallback.test"]);
        assert_eq!(names(store.resolve("example.com")), ["fallback.test"]);
        assert_eq!(names(store.resolve_sni(None)), ["fallback.test"]);
    }

    #[test]
    fn no_default_means_no_fallback() {
        let store: CertificateStore = [certificate(&["a.test"], false)].into_iter().collect();
        assert!(store.resolve("b.test").is_none());
        assert!(store.resolve_sni(None).is_none());
        assert!(store.resolve("a.test.").is_some());
    }

    #[test]
    fn first_certificate_wins_on_overlap() {
        let first = certificate(&["dup.test"], true);
        let second = certificate(&["dup.test"], true);
        let store: CertificateStore = [Arc::clone(&first), second].into_iter().collect();
        assert!(Arc::ptr_eq(&store.resolve("dup.test").unwrap(), &first));
        assert!(Arc::ptr_eq(store.default_certificate().unwrap(), &first));
    }
}
