use crate::config::{HttpCheckConfig, ProbeSet, TcpCheckConfig};
use crate::report::{EndpointCheckSet, HttpProbeResult, RunStamp, TcpProbeResult};
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{error, warn};

pub fn probe_client() -> Client {
    Client::builder()
        .user_agent(concat!("fleet-survey/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

enum ProbeOutcome {
    Http(String, HttpProbeResult),
    Tcp(String, TcpProbeResult),
}

/// Runs every configured probe concurrently. Each probe is bounded by its own
/// timeout, so the whole set finishes within the slowest probe's timeout.
pub async fn run_probe_set(
    client: &Client,
    probes: &ProbeSet,
    stamp: &RunStamp,
) -> (
    EndpointCheckSet<HttpProbeResult>,
    EndpointCheckSet<TcpProbeResult>,
) {
    let mut tasks = JoinSet::new();

    for check in &probes.http_checks {
        let client = client.clone();
        let check = check.clone();
        tasks.spawn(async move {
            let result = run_http_check(&client, &check).await;
            ProbeOutcome::Http(check.name, result)
        });
    }
    for check in &probes.tcp_checks {
        let check = check.clone();
        tasks.spawn(async move {
            let result = run_tcp_check(&check).await;
            ProbeOutcome::Tcp(check.name, result)
        });
    }

    let mut http = EndpointCheckSet::new(stamp);
    let mut tcp = EndpointCheckSet::new(stamp);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(ProbeOutcome::Http(name, result)) => {
                http.checks.insert(name, result);
            }
            Ok(ProbeOutcome::Tcp(name, result)) => {
                tcp.checks.insert(name, result);
            }
            Err(err) => error!(error = %err, "probe task aborted"),
        }
    }

    (http, tcp)
}

async fn run_http_check(client: &Client, cfg: &HttpCheckConfig) -> HttpProbeResult {
    http_probe(client, &cfg.url, Duration::from_millis(cfg.timeout_ms)).await
}

async fn run_tcp_check(cfg: &TcpCheckConfig) -> TcpProbeResult {
    tcp_probe(&cfg.host, cfg.port, Duration::from_millis(cfg.timeout_ms)).await
}

/// Issues a GET and reports whatever status comes back, including 4xx/5xx.
pub async fn http_probe(client: &Client, url: &str, timeout: Duration) -> HttpProbeResult {
    let start = Instant::now();
    let req = client.get(url).timeout(timeout);

    let (status, error) = match req.send().await {
        Ok(resp) => (Some(resp.status().as_u16()), None),
        Err(err) => {
            let status = err.status().map(|s| s.as_u16());
            warn!(url = %url, error = %err, "http probe failed");
            (status, Some(err.to_string()))
        }
    };

    HttpProbeResult {
        url: url.to_string(),
        status,
        latency_ms: start.elapsed().as_millis() as u64,
        error,
    }
}

/// Connects to `host:port`, abandoning the attempt (resolution included) once
/// `timeout` elapses. Refusal and timeout both report `open = false`.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> TcpProbeResult {
    let start = Instant::now();

    let open = match time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            warn!(host = %host, port, error = %err, "tcp probe failed");
            false
        }
        Err(_elapsed) => {
            warn!(host = %host, port, "tcp probe timeout");
            false
        }
    };

    TcpProbeResult {
        hostname: host.to_string(),
        port,
        open,
        latency_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn test_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    async fn spawn_http_server() -> SocketAddr {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/boom",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn tcp_probe_open_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = tcp_probe("127.0.0.1", port, Duration::from_millis(300)).await;
        assert!(result.open);
        assert_eq!(result.port, port);
        assert_eq!(result.hostname, "127.0.0.1");
    }

    #[tokio::test]
    async fn tcp_probe_closed_port_is_not_open() {
        let port = closed_port().await;
        let start = Instant::now();
        let result = tcp_probe("127.0.0.1", port, Duration::from_millis(300)).await;
        assert!(!result.open);
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn tcp_probe_returns_by_deadline() {
        // Outcome depends on the network path; only the bound is checked.
        let start = Instant::now();
        let _ = tcp_probe("10.255.255.1", 81, Duration::from_millis(300)).await;
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn tcp_probe_unresolvable_host_is_not_open() {
        let start = Instant::now();
        let result = tcp_probe("no-such-host.invalid", 80, Duration::from_millis(300)).await;
        assert!(!result.open);
        assert_eq!(result.hostname, "no-such-host.invalid");
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn http_probe_silent_server_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let start = Instant::now();
        let result = http_probe(
            &test_client(),
            &format!("http://{addr}/"),
            Duration::from_millis(300),
        )
        .await;
        let elapsed = start.elapsed();

        assert_eq!(result.status, None);
        assert!(result.error.is_some());
        assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
    }

    #[tokio::test]
    async fn http_probe_reports_not_found_as_status() {
        let addr = spawn_http_server().await;
        let result = http_probe(
            &test_client(),
            &format!("http://{addr}/missing"),
            Duration::from_millis(1000),
        )
        .await;
        assert_eq!(result.status, Some(404));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn http_probe_reports_success_and_server_error() {
        let addr = spawn_http_server().await;
        let client = test_client();

        let ok = http_probe(&client, &format!("http://{addr}/ok"), Duration::from_secs(1)).await;
        assert_eq!(ok.status, Some(200));

        let boom = http_probe(&client, &format!("http://{addr}/boom"), Duration::from_secs(1)).await;
        assert_eq!(boom.status, Some(500));
    }

    #[tokio::test]
    async fn http_probe_unreachable_has_no_status() {
        let port = closed_port().await;
        let result = http_probe(
            &test_client(),
            &format!("http://127.0.0.1:{port}/"),
            Duration::from_millis(300),
        )
        .await;
        assert_eq!(result.status, None);
        assert!(!result.is_reachable());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn probe_set_shares_one_timestamp() {
        let addr = spawn_http_server().await;
        let closed = closed_port().await;
        let probes = ProbeSet {
            http_checks: vec![
                HttpCheckConfig {
                    name: "portal".to_string(),
                    url: format!("http://{addr}/ok"),
                    timeout_ms: 1000,
                },
                HttpCheckConfig {
                    name: "missing".to_string(),
                    url: format!("http://{addr}/nope"),
                    timeout_ms: 1000,
                },
            ],
            tcp_checks: vec![
                TcpCheckConfig {
                    name: "web".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: addr.port(),
                    timeout_ms: 300,
                },
                TcpCheckConfig {
                    name: "closed".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: closed,
                    timeout_ms: 300,
                },
            ],
        };
        let stamp = RunStamp::now();

        let (http, tcp) = run_probe_set(&test_client(), &probes, &stamp).await;

        assert_eq!(http.timestamp, stamp.timestamp());
        assert_eq!(tcp.timestamp, stamp.timestamp());
        assert_eq!(http.checks["portal"].status, Some(200));
        assert_eq!(http.checks["missing"].status, Some(404));
        assert!(tcp.checks["web"].open);
        assert!(!tcp.checks["closed"].open);
    }
}
