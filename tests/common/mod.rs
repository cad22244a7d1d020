//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use switchyard::config::dynamic::{
    BasicAuthConfig, Configurations, DynamicConfiguration, LoadBalancerConfig, MiddlewareConfig,
    RouterConfig, ServerConfig, ServiceConfig,
};

/// Start a mock backend on an ephemeral port that answers every request
/// with `200 OK` and a fixed body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        // Read the request head before answering.
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        loop {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => {
                                    buf.extend_from_slice(&chunk[..n]);
                                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                            }
                        }
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

pub fn service(backends: &[SocketAddr]) -> ServiceConfig {
    ServiceConfig {
        load_balancer: LoadBalancerConfig {
            servers: backends
                .iter()
                .map(|addr| ServerConfig {
                    url: format!("http://{}", addr),
                    weight: 1,
                })
                .collect(),
            ..Default::default()
        },
    }
}

pub fn router(rule: &str, service: &str, entry_points: &[&str], middlewares: &[&str]) -> RouterConfig {
    RouterConfig {
        rule: rule.to_string(),
        entry_points: entry_points.iter().map(|e| e.to_string()).collect(),
        service: service.to_string(),
        middlewares: middlewares.iter().map(|m| m.to_string()).collect(),
        ..Default::default()
    }
}

pub fn basic_auth(users: &[&str]) -> MiddlewareConfig {
    MiddlewareConfig::BasicAuth(BasicAuthConfig {
        users: users.iter().map(|u| u.to_string()).collect(),
        realm: "test".to_string(),
        remove_header: false,
    })
}

/// Configurations with a single provider named "file".
pub fn single_provider(configuration: DynamicConfiguration) -> Configurations {
    Configurations::from([("file".to_string(), configuration)])
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", "localhost")
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `url` until the body equals `expected` or the deadline passes.
pub async fn wait_for_body(client: &reqwest::Client, url: &str, expected: &str) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if let Ok(res) = client.get(url).send().await {
            if res.status().is_success() {
                if let Ok(body) = res.text().await {
                    if body == expected {
                        return true;
                    }
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
