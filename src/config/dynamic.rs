//! Dynamic configuration pushed by providers.
//!
//! # Responsibilities
//! - Define the routers / services / middlewares / certificates a provider publishes
//! - Define the `Message` unit flowing from providers to the server
//! - Merge every provider's configuration into one deterministic view
//!
//! # Design Decisions
//! - Maps are `BTreeMap` so iteration (and therefore compilation) order is stable
//! - Everything derives `PartialEq` so an unchanged republish can be skipped
//! - Name collisions across providers: providers are visited in lexicographic
//!   order and the first definition wins; later ones are dropped with a warning

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Latest configuration of every provider, keyed by provider name.
pub type Configurations = BTreeMap<String, DynamicConfiguration>;

/// A configuration change published by one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub provider_name: String,
    pub configuration: DynamicConfiguration,
}

impl Message {
    pub fn new(provider_name: impl Into<String>, configuration: DynamicConfiguration) -> Self {
        Self {
            provider_name: provider_name.into(),
            configuration,
        }
    }
}

/// Everything one provider knows about routing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DynamicConfiguration {
    pub routers: BTreeMap<String, RouterConfig>,
    pub services: BTreeMap<String, ServiceConfig>,
    pub middlewares: BTreeMap<String, MiddlewareConfig>,
    pub tls: Vec<CertificateConfig>,
}

/// Binds a match rule on some entry points to a service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Match expression, e.g. ``Host(`example.com`) && PathPrefix(`/api`)``.
    pub rule: String,

    /// Entry points this router listens on. Empty means the default entry points.
    #[serde(default)]
    pub entry_points: Vec<String>,

    /// Name of the target service.
    pub service: String,

    /// Middlewares applied in order, outermost first.
    #[serde(default)]
    pub middlewares: Vec<String>,

    /// Explicit precedence (higher is evaluated first). Defaults to the rule length.
    #[serde(default)]
    pub priority: Option<i64>,

    /// Whether the router serves TLS traffic.
    #[serde(default)]
    pub tls: bool,
}

impl RouterConfig {
    /// Effective precedence of this router.
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(self.rule.len() as i64)
    }
}

/// A named backend target.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub load_balancer: LoadBalancerConfig,
}

/// Backend pool and the algorithm spreading requests over it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub method: LoadBalancerMethod,
    pub servers: Vec<ServerConfig>,
    /// Forward the client's Host header instead of the backend authority.
    pub pass_host_header: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            method: LoadBalancerMethod::default(),
            servers: Vec::new(),
            pass_host_header: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerMethod {
    /// Smooth weighted round robin.
    #[default]
    Wrr,
    /// Fewest in-flight requests.
    LeastConn,
}

/// One backend server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL, e.g. `http://10.0.0.1:8080`.
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Supported middleware kinds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MiddlewareConfig {
    BasicAuth(BasicAuthConfig),
    RateLimit(RateLimitConfig),
    Headers(HeadersConfig),
    StripPrefix(StripPrefixConfig),
}

impl MiddlewareConfig {
    /// Short name of the kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MiddlewareConfig::BasicAuth(_) => "basic_auth",
            MiddlewareConfig::RateLimit(_) => "rate_limit",
            MiddlewareConfig::Headers(_) => "headers",
            MiddlewareConfig::StripPrefix(_) => "strip_prefix",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BasicAuthConfig {
    /// Credentials as `user:password`.
    pub users: Vec<String>,

    #[serde(default = "default_realm")]
    pub realm: String,

    /// Drop the Authorization header before forwarding.
    #[serde(default)]
    pub remove_header: bool,
}

fn default_realm() -> String {
    "switchyard".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client. Zero disables limiting.
    pub average: u64,

    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u64,
}

fn default_burst() -> u64 {
    1
}

/// Header rewriting. An empty value removes the header.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    pub custom_request_headers: BTreeMap<String, String>,
    pub custom_response_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StripPrefixConfig {
    pub prefixes: Vec<String>,
}

/// A certificate / key pair and where it applies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CertificateConfig {
    pub cert_file: FileOrContent,
    pub key_file: FileOrContent,

    /// Entry points to install the certificate on. Empty means every
    /// TLS entry point and every entry point targeted by a TLS router.
    #[serde(default)]
    pub entry_points: Vec<String>,

    /// Serve this certificate when no SNI name matches.
    #[serde(default)]
    pub default: bool,
}

/// Either inline PEM content or a path to a PEM file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileOrContent(pub String);

impl FileOrContent {
    pub fn is_path(&self) -> bool {
        !self.0.trim_start().starts_with("-----BEGIN")
    }

    /// Return the PEM bytes, reading the file when this is a path.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        if self.is_path() {
            fs::read(PathBuf::from(&self.0))
        } else {
            Ok(self.0.as_bytes().to_vec())
        }
    }
}

impl From<&str> for FileOrContent {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Merge every provider's configuration into one.
pub fn merge(configurations: &Configurations) -> DynamicConfiguration {
    let mut merged = DynamicConfiguration::default();
    let mut router_owners = BTreeMap::new();
    let mut service_owners = BTreeMap::new();
    let mut middleware_owners = BTreeMap::new();

    for (provider, configuration) in configurations {
        merge_section(
            "router",
            provider,
            &configuration.routers,
            &mut merged.routers,
            &mut router_owners,
        );
        merge_section(
            "service",
            provider,
            &configuration.services,
            &mut merged.services,
            &mut service_owners,
        );
        merge_section(
            "middleware",
            provider,
            &configuration.middlewares,
            &mut merged.middlewares,
            &mut middleware_owners,
        );
        merged.tls.extend(configuration.tls.iter().cloned());
    }

    merged
}

fn merge_section<'a, T: Clone + PartialEq>(
    kind: &'static str,
    provider: &'a str,
    source: &BTreeMap<String, T>,
    target: &mut BTreeMap<String, T>,
    owners: &mut BTreeMap<String, &'a str>,
) {
    for (name, item) in source {
        match owners.get(name) {
            Some(owner) => {
                if target.get(name) != Some(item) {
                    tracing::warn!(
                        kind,
                        name = %name,
                        kept_from = %owner,
                        dropped_from = %provider,
                        "Conflicting definition across providers, keeping the first"
                    );
                }
            }
            None => {
                owners.insert(name.clone(), provider);
                target.insert(name.clone(), item.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(rule: &str, service: &str) -> RouterConfig {
        RouterConfig {
            rule: rule.to_string(),
            service: service.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_first_provider_wins() {
        let mut a = DynamicConfiguration::default();
        a.routers.insert("web".into(), router("Path(`/a`)", "svc"));
        let mut b = DynamicConfiguration::default();
        b.routers.insert("web".into(), router("Path(`/b`)", "svc"));
        b.routers.insert("api".into(), router("Path(`/api`)", "svc"));

        let mut configurations = Configurations::new();
        // Inserted out of order on purpose: precedence follows the name, not insertion.
        configurations.insert("zeta".into(), b);
        configurations.insert("alpha".into(), a);

        let merged = merge(&configurations);
        assert_eq!(merged.routers.len(), 2);
        assert_eq!(merged.routers["web"].rule, "Path(`/a`)");
        assert_eq!(merged.routers["api"].rule, "Path(`/api`)");
    }

    #[test]
    fn merge_concatenates_certificates() {
        let cert = CertificateConfig {
            cert_file: "a.crt".into(),
            key_file: "a.key".into(),
            entry_points: vec![],
            default: false,
        };
        let mut a = DynamicConfiguration::default();
        a.tls.push(cert.clone());
        let mut b = DynamicConfiguration::default();
        b.tls.push(cert);

        let configurations = Configurations::from([("a".to_string(), a), ("b".to_string(), b)]);
        assert_eq!(merge(&configurations).tls.len(), 2);
    }

    #[test]
    fn priority_defaults_to_rule_length() {
        let mut r = router("Path(`/ok`)", "svc");
        assert_eq!(r.effective_priority(), 11);
        r.priority = Some(-5);
        assert_eq!(r.effective_priority(), -5);
    }

    #[test]
    fn file_or_content_detects_inline_pem() {
        let inline = FileOrContent::from("-----BEGIN CERTIFICATE-----\nabc\n");
        assert!(!inline.is_path());
        assert_eq!(inline.read().unwrap(), inline.0.as_bytes());

        let path = FileOrContent::from("/etc/certs/site.pem");
        assert!(path.is_path());
    }

    #[test]
    fn deserialize_from_toml() {
        let raw = r#"
            [routers.foo]
            rule = "Path(`/ok`)"
            service = "bar"
            middlewares = ["auth"]

            [services.bar.load_balancer]
            method = "wrr"
            servers = [{ url = "http://127.0.0.1:9000" }, { url = "http://127.0.0.1:9001", weight = 3 }]

            [middlewares.auth.basic_auth]
            users = ["foo:bar"]
        "#;
        let config: DynamicConfiguration = toml::from_str(raw).unwrap();

        assert_eq!(config.routers["foo"].middlewares, vec!["auth".to_string()]);
        let lb = &config.services["bar"].load_balancer;
        assert_eq!(lb.method, LoadBalancerMethod::Wrr);
        assert_eq!(lb.servers[0].weight, 1);
        assert_eq!(lb.servers[1].weight, 3);
        assert!(lb.pass_host_header);
        match &config.middlewares["auth"] {
            MiddlewareConfig::BasicAuth(auth) => {
                assert_eq!(auth.users, vec!["foo:bar".to_string()]);
                assert_eq!(auth.realm, "switchyard");
            }
            other => panic!("unexpected middleware {:?}", other),
        }
    }
}
