//! Compilation and publication of dynamic configuration.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use tower::ServiceExt;

use common::*;
use switchyard::config::dynamic::{
    CertificateConfig, Configurations, DynamicConfiguration, FileOrContent,
};
use switchyard::config::{EntryPointConfig, StaticConfiguration};
use switchyard::Server;

fn http_server() -> Server {
    let mut config = StaticConfiguration::with_entry_points([("http", EntryPointConfig::plain("127.0.0.1:0"))]);
    config.default_entry_points = vec!["http".to_string()];
    Server::new(config)
}

fn self_signed(names: &[&str]) -> (String, String) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

#[tokio::test]
async fn certificate_is_loaded_for_each_listed_entry_point() {
    let server = Server::new(StaticConfiguration::with_entry_points([
        ("http", EntryPointConfig::plain("127.0.0.1:0")),
        ("https", EntryPointConfig::tls("127.0.0.1:0")),
        ("https2", EntryPointConfig::tls("127.0.0.1:0")),
    ]));

    let (cert, key) = self_signed(&["snitest.com"]);
    let mut configuration = DynamicConfiguration::default();
    configuration.tls.push(CertificateConfig {
        cert_file: FileOrContent(cert),
        key_file: FileOrContent(key),
        entry_points: vec!["https".to_string(), "https2".to_string()],
        default: false,
    });

    let loaded = server.load_config(&single_provider(configuration));
    assert!(!loaded.certificates["https"].is_empty());
    assert!(!loaded.certificates["https2"].is_empty());
    assert!(!loaded.certificates.contains_key("http"));
}

#[tokio::test]
async fn middleware_short_circuits_only_its_router() {
    let backend = start_mock_backend("upstream").await;
    let server = http_server();

    let mut configuration = DynamicConfiguration::default();
    configuration.services.insert("bar".into(), service(&[backend]));
    configuration.middlewares.insert("auth".into(), basic_auth(&["foo:bar"]));
    configuration
        .routers
        .insert("foo".into(), router("Path(`/ok`)", "bar", &[], &[]));
    configuration
        .routers
        .insert("foo2".into(), router("Path(`/unauthorized`)", "bar", &["http"], &["auth"]));

    let loaded = server.load_config(&single_provider(configuration));
    let handler = &loaded.handlers["http"];

    let res = handler.call(get("/ok")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "upstream");

    let res = handler.call(get("/unauthorized")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = handler.call(get("/elsewhere")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn routers_share_one_service_instance() {
    let a = start_mock_backend("a").await;
    let b = start_mock_backend("b").await;
    let server = http_server();

    let mut configuration = DynamicConfiguration::default();
    configuration.services.insert("bar".into(), service(&[a, b]));
    configuration
        .routers
        .insert("first".into(), router("Path(`/first`)", "bar", &[], &[]));
    configuration
        .routers
        .insert("second".into(), router("Path(`/second`)", "bar", &[], &[]));

    let loaded = server.load_config(&single_provider(configuration));
    assert_eq!(loaded.services.len(), 1);
    let handler = &loaded.handlers["http"];

    // One rotation across both routers: a separate instance per router would
    // answer "a" to the first request of each.
    let mut bodies = Vec::new();
    for path in ["/first", "/second", "/first", "/second"] {
        bodies.push(body_string(handler.call(get(path)).await).await);
    }
    assert_eq!(bodies, vec!["a", "b", "a", "b"]);
}

#[tokio::test]
async fn loading_twice_routes_identically() {
    let backend = start_mock_backend("same").await;
    let server = http_server();

    let mut configuration = DynamicConfiguration::default();
    configuration.services.insert("bar".into(), service(&[backend]));
    configuration.middlewares.insert("auth".into(), basic_auth(&["foo:bar"]));
    configuration
        .routers
        .insert("open".into(), router("PathPrefix(`/`)", "bar", &[], &[]));
    configuration
        .routers
        .insert("closed".into(), router("PathPrefix(`/admin`)", "bar", &[], &["auth"]));
    let snapshot = single_provider(configuration);

    let first = server.load_config(&snapshot);
    let second = server.load_config(&snapshot);

    for path in ["/", "/admin/users", "/x"] {
        let a = first.handlers["http"].call(get(path)).await;
        let b = second.handlers["http"].call(get(path)).await;
        assert_eq!(a.status(), b.status(), "status for {}", path);
        assert_eq!(body_string(a).await, body_string(b).await, "body for {}", path);
    }
}

#[tokio::test]
async fn unchanged_service_keeps_its_rotation_across_reloads() {
    let a = start_mock_backend("a").await;
    let b = start_mock_backend("b").await;
    let c = start_mock_backend("c").await;
    let server = http_server();
    let entry_point = Arc::clone(server.entry_point("http").unwrap());

    let mut configuration = DynamicConfiguration::default();
    configuration.services.insert("bar".into(), service(&[a, b]));
    configuration
        .routers
        .insert("web".into(), router("PathPrefix(`/`)", "bar", &[], &[]));
    assert_eq!(server.apply(single_provider(configuration.clone())).await.unwrap(), Some(1));

    let res = entry_point.service().oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(res).await, "a");

    // Unrelated change: the service is carried over with its cursor.
    configuration
        .routers
        .insert("other".into(), router("Path(`/other`)", "bar", &[], &[]));
    assert_eq!(server.apply(single_provider(configuration.clone())).await.unwrap(), Some(2));
    let res = entry_point.service().oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(res).await, "b");

    // Changed service: rebuilt from scratch.
    configuration.services.insert("bar".into(), service(&[c, a]));
    assert_eq!(server.apply(single_provider(configuration)).await.unwrap(), Some(3));
    let res = entry_point.service().oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(res).await, "c");
    assert_eq!(entry_point.state().version, 3);
}

#[tokio::test]
async fn identical_snapshot_is_not_reapplied() {
    let server = http_server();
    let mut configuration = DynamicConfiguration::default();
    configuration
        .routers
        .insert("web".into(), router("PathPrefix(`/`)", "missing", &[], &[]));

    assert_eq!(server.apply(single_provider(configuration.clone())).await.unwrap(), Some(1));
    assert_eq!(server.apply(single_provider(configuration)).await.unwrap(), None);
    assert_eq!(server.version(), 1);
}

#[tokio::test]
async fn first_provider_wins_name_collisions() {
    let a = start_mock_backend("from-alpha").await;
    let b = start_mock_backend("from-beta").await;
    let server = http_server();

    let mut alpha = DynamicConfiguration::default();
    alpha.services.insert("svc".into(), service(&[a]));
    alpha
        .routers
        .insert("web".into(), router("PathPrefix(`/`)", "svc", &[], &[]));
    let mut beta = DynamicConfiguration::default();
    beta.services.insert("svc".into(), service(&[b]));

    let snapshot: Configurations = [("beta".to_string(), beta), ("alpha".to_string(), alpha)]
        .into_iter()
        .collect();
    let loaded = server.load_config(&snapshot);
    let res = loaded.handlers["http"].call(get("/")).await;
    assert_eq!(body_string(res).await, "from-alpha");
}

#[tokio::test]
async fn published_certificates_resolve_by_server_name() {
    let server = Server::new(StaticConfiguration::with_entry_points([(
        "https",
        EntryPointConfig::tls("127.0.0.1:0"),
    )]));
    let entry_point = Arc::clone(server.entry_point("https").unwrap());
    assert!(entry_point.state().certificates.is_empty());

    let (cert, key) = self_signed(&["snitest.com", "*.snitest.org"]);
    let mut configuration = DynamicConfiguration::default();
    configuration.tls.push(CertificateConfig {
        cert_file: FileOrContent(cert),
        key_file: FileOrContent(key),
        entry_points: vec![],
        default: false,
    });
    server.apply(single_provider(configuration)).await.unwrap();

    let store = entry_point.state().certificates.clone();
    assert_eq!(store.len(), 1);
    assert!(store.resolve("snitest.com").is_some());
    assert!(store.resolve("www.snitest.org").is_some());
    assert!(store.resolve("other.com").is_none());
}

#[tokio::test]
async fn service_is_shared_across_entry_points() {
    let a = start_mock_backend("a").await;
    let b = start_mock_backend("b").await;
    let server = Server::new(StaticConfiguration::with_entry_points([
        ("web", EntryPointConfig::plain("127.0.0.1:0")),
        ("api", EntryPointConfig::plain("127.0.0.1:0")),
    ]));

    let mut configuration = DynamicConfiguration::default();
    configuration.services.insert("bar".into(), service(&[a, b]));
    configuration
        .routers
        .insert("on-web".into(), router("PathPrefix(`/`)", "bar", &["web"], &[]));
    configuration
        .routers
        .insert("on-api".into(), router("PathPrefix(`/`)", "bar", &["api"], &[]));

    let loaded = server.load_config(&single_provider(configuration));
    assert_eq!(loaded.services.len(), 1);

    let first = body_string(loaded.handlers["web"].call(get("/")).await).await;
    let second = body_string(loaded.handlers["api"].call(get("/")).await).await;
    assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
}

#[tokio::test]
async fn deeply_nested_rule_excludes_only_its_router() {
    let backend = start_mock_backend("alive").await;
    let server = http_server();

    let mut configuration = DynamicConfiguration::default();
    configuration.services.insert("bar".into(), service(&[backend]));
    configuration
        .routers
        .insert("good".into(), router("Path(`/ok`)", "bar", &[], &[]));
    let nested = format!("{}Path(`/deep`)", "!".repeat(200_000));
    configuration
        .routers
        .insert("nested".into(), router(&nested, "bar", &[], &[]));

    assert_eq!(server.apply(single_provider(configuration)).await.unwrap(), Some(1));

    let entry_point = server.entry_point("http").unwrap();
    let res = entry_point.service().oneshot(get("/ok")).await.unwrap();
    assert_eq!(body_string(res).await, "alive");
    let res = entry_point.service().oneshot(get("/deep")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
