//! Health probe strategies.
//!
//! Every strategy is bounded by the profile's timeout and folds its own
//! errors (refused connections, bad status codes, non-zero exits, runtime
//! misses) into a [`ProbeOutcome`]. Nothing is raised to the caller.
//!
//! Cleanup on timeout belongs to the strategy: the HTTP connection task is
//! aborted, sockets are dropped, and subprocesses are killed on drop.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use stackwatch_core::{CheckStrategy, ServiceId, ServiceProfile, format_duration};

use crate::runtime::{RuntimeState, RuntimeStatusSource};

/// Characters of command output kept in messages and details.
const OUTPUT_HEAD_CHARS: usize = 200;

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    /// The target answered, but not healthily (or refused to answer).
    Failure,
    /// The probe did not finish within its timeout.
    Timeout,
    /// The probe itself broke (e.g. the probe task panicked).
    Error,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Success => write!(f, "success"),
            ProbeOutcome::Failure => write!(f, "failure"),
            ProbeOutcome::Timeout => write!(f, "timeout"),
            ProbeOutcome::Error => write!(f, "error"),
        }
    }
}

/// Result of one probe against one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub service_id: ServiceId,
    /// Unix timestamp (milliseconds) when the probe finished.
    pub observed_at_ms: u64,
    pub outcome: ProbeOutcome,
    pub latency: Duration,
    pub message: String,
    /// Strategy-specific details, e.g. `status_code` for HTTP.
    pub raw_details: BTreeMap<String, String>,
}

impl ProbeResult {
    /// A result for a probe that could not run to completion at all.
    pub fn error(service_id: &str, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            service_id: service_id.to_string(),
            observed_at_ms: epoch_millis(),
            outcome: ProbeOutcome::Error,
            latency,
            message: message.into(),
            raw_details: BTreeMap::new(),
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_micros() as f64 / 1000.0
    }
}

/// What a strategy observed, before it is stamped with service and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub outcome: ProbeOutcome,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl Check {
    fn new(outcome: ProbeOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    fn success(message: impl Into<String>) -> Self {
        Self::new(ProbeOutcome::Success, message)
    }

    fn failure(message: impl Into<String>) -> Self {
        Self::new(ProbeOutcome::Failure, message)
    }

    fn timeout(timeout: Duration) -> Self {
        Self::new(
            ProbeOutcome::Timeout,
            format!("timed out after {}", format_duration(timeout)),
        )
    }

    fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Runs probes. Cheap to clone; shares the runtime status source.
#[derive(Clone)]
pub struct Prober {
    runtime: Arc<dyn RuntimeStatusSource>,
}

impl Prober {
    pub fn new(runtime: Arc<dyn RuntimeStatusSource>) -> Self {
        Self { runtime }
    }

    /// Probe `profile` once. Never takes (much) longer than `profile.timeout`.
    pub async fn run(&self, profile: &ServiceProfile) -> ProbeResult {
        let started = Instant::now();
        let timeout = profile.timeout;

        let check = match &profile.strategy {
            CheckStrategy::Http { url } => http_probe(url, timeout).await,
            CheckStrategy::Tcp { host, port } => tcp_probe(host, *port, timeout).await,
            CheckStrategy::Command { argv } => command_probe(argv, timeout).await,
            CheckStrategy::RuntimeStatus { .. } => {
                runtime_probe(self.runtime.as_ref(), profile.container_name(), timeout).await
            }
        };

        let latency = started.elapsed();
        debug!(
            service = %profile.service_id,
            check = profile.strategy.kind(),
            outcome = %check.outcome,
            latency_ms = latency.as_millis() as u64,
            "probe finished"
        );

        ProbeResult {
            service_id: profile.service_id.clone(),
            observed_at_ms: epoch_millis(),
            outcome: check.outcome,
            latency,
            message: check.message,
            raw_details: check.details,
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// GET `url`. Healthy iff the response status is below 400.
pub async fn http_probe(url: &str, timeout: Duration) -> Check {
    let uri: http::Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => return Check::failure(format!("invalid url {url}: {e}")),
    };
    let Some(host) = uri.host() else {
        return Check::failure(format!("url has no host: {url}"));
    };
    let address = format!("{host}:{}", uri.port_u16().unwrap_or(80));
    let authority = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| address.clone());
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(&address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %url, "http probe connection failed");
                return Check::failure(format!("connection failed: {e}"));
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %url, "http probe handshake failed");
                return Check::failure(format!("handshake failed: {e}"));
            }
        };

        // Drive the connection until the probe is done, then tear it down.
        let _conn = AbortOnDrop(tokio::spawn(async move {
            let _ = conn.await;
        }));

        let req = match http::Request::builder()
            .method("GET")
            .uri(path.as_str())
            .header("host", authority.as_str())
            .header("user-agent", "stackwatch/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => return Check::failure(format!("invalid request: {e}")),
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                let status = resp.status();
                let check = if status.as_u16() < 400 {
                    Check::success(format!("HTTP {}", status.as_u16()))
                } else {
                    debug!(%status, %url, "http probe got error status");
                    Check::failure(format!("HTTP {}", status.as_u16()))
                };
                check.detail("status_code", status.as_u16())
            }
            Err(e) => {
                debug!(error = %e, %url, "http probe request failed");
                Check::failure(format!("request failed: {e}"))
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%url, "http probe timed out");
        Check::timeout(timeout)
    })
}

/// Connect to `host:port`. Healthy iff the connection completes.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> Check {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Check::success(format!("port {port} is open")),
        Ok(Err(e)) => Check::failure(format!("port {port} is closed: {e}")),
        Err(_) => Check::timeout(timeout),
    }
}

/// Run `argv`. Healthy iff it exits 0; the process is killed at the timeout.
pub async fn command_probe(argv: &[String], timeout: Duration) -> Check {
    let Some((program, args)) = argv.split_first() else {
        return Check::failure("empty command");
    };

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => return Check::failure(format!("failed to start {program}: {e}")),
    };

    // On timeout the future, and with it the child, is dropped and killed.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => Check::success("command succeeded")
            .detail("output", head(&output.stdout))
            .detail("exit_code", 0),
        Ok(Ok(output)) => {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Check::failure(format!("command failed: {}", head(&output.stderr)))
                .detail("output", head(&output.stdout))
                .detail("exit_code", code)
        }
        Ok(Err(e)) => Check::failure(format!("failed to wait for {program}: {e}")),
        Err(_) => Check::timeout(timeout),
    }
}

/// Ask the runtime about `container`. Healthy iff it is running.
pub async fn runtime_probe(
    source: &dyn RuntimeStatusSource,
    container: &str,
    timeout: Duration,
) -> Check {
    match tokio::time::timeout(timeout, source.runtime_state(container)).await {
        Ok(RuntimeState::Running) => {
            Check::success("container is running").detail("state", RuntimeState::Running)
        }
        Ok(state) => Check::failure(format!("container status: {state}")).detail("state", state),
        Err(_) => Check::timeout(timeout),
    }
}

fn head(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim()
        .chars()
        .take(OUTPUT_HEAD_CHARS)
        .collect()
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn http_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}/healthz")
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    struct FixedRuntime(RuntimeState);

    #[async_trait]
    impl RuntimeStatusSource for FixedRuntime {
        async fn runtime_state(&self, _container: &str) -> RuntimeState {
            self.0
        }
    }

    #[tokio::test]
    async fn http_probe_ok_status() {
        let url = http_server("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
        let check = http_probe(&url, Duration::from_secs(2)).await;
        assert_eq!(check.outcome, ProbeOutcome::Success);
        assert_eq!(check.message, "HTTP 200");
        assert_eq!(check.details.get("status_code").map(String::as_str), Some("200"));
    }

    #[tokio::test]
    async fn http_probe_redirect_counts_as_success() {
        let url = http_server(
            "HTTP/1.1 302 Found\r\nlocation: /login\r\ncontent-length: 0\r\n\r\n",
        )
        .await;
        let check = http_probe(&url, Duration::from_secs(2)).await;
        assert_eq!(check.outcome, ProbeOutcome::Success);
    }

    #[tokio::test]
    async fn http_probe_server_error_is_failure() {
        let url = http_server("HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
            .await;
        let check = http_probe(&url, Duration::from_secs(2)).await;
        assert_eq!(check.outcome, ProbeOutcome::Failure);
        assert_eq!(check.details.get("status_code").map(String::as_str), Some("503"));
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_is_failure() {
        let port = closed_port().await;
        let url = format!("http://127.0.0.1:{port}/healthz");
        let check = http_probe(&url, Duration::from_millis(500)).await;
        assert_eq!(check.outcome, ProbeOutcome::Failure);
        assert!(check.message.starts_with("connection failed"));
    }

    #[tokio::test]
    async fn http_probe_hanging_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let started = std::time::Instant::now();
        let check = http_probe(&format!("http://{addr}/"), Duration::from_millis(300)).await;
        let elapsed = started.elapsed();

        assert_eq!(check.outcome, ProbeOutcome::Timeout);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn tcp_probe_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let check = tcp_probe("127.0.0.1", open, Duration::from_secs(1)).await;
        assert_eq!(check.outcome, ProbeOutcome::Success);

        let closed = closed_port().await;
        let check = tcp_probe("127.0.0.1", closed, Duration::from_secs(1)).await;
        assert_eq!(check.outcome, ProbeOutcome::Failure);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_probe_exit_codes() {
        let argv = |script: &str| vec!["sh".to_string(), "-c".to_string(), script.to_string()];

        let ok = command_probe(&argv("echo PONG"), Duration::from_secs(5)).await;
        assert_eq!(ok.outcome, ProbeOutcome::Success);
        assert_eq!(ok.details.get("output").map(String::as_str), Some("PONG"));

        let failed = command_probe(&argv("echo broken >&2; exit 3"), Duration::from_secs(5)).await;
        assert_eq!(failed.outcome, ProbeOutcome::Failure);
        assert_eq!(failed.message, "command failed: broken");
        assert_eq!(failed.details.get("exit_code").map(String::as_str), Some("3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_probe_is_killed_at_timeout() {
        let argv = vec!["sleep".to_string(), "30".to_string()];
        let started = std::time::Instant::now();
        let check = command_probe(&argv, Duration::from_millis(200)).await;
        assert_eq!(check.outcome, ProbeOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn command_probe_missing_binary_is_failure() {
        let argv = vec!["/definitely/not/a/binary".to_string()];
        let check = command_probe(&argv, Duration::from_secs(1)).await;
        assert_eq!(check.outcome, ProbeOutcome::Failure);
        assert!(check.message.starts_with("failed to start"));
    }

    #[tokio::test]
    async fn runtime_probe_requires_running() {
        let running = FixedRuntime(RuntimeState::Running);
        let check = runtime_probe(&running, "caddy", Duration::from_secs(1)).await;
        assert_eq!(check.outcome, ProbeOutcome::Success);

        let missing = FixedRuntime(RuntimeState::NotFound);
        let check = runtime_probe(&missing, "caddy", Duration::from_secs(1)).await;
        assert_eq!(check.outcome, ProbeOutcome::Failure);
        assert_eq!(check.message, "container status: not_found");
    }

    #[tokio::test]
    async fn prober_stamps_service_and_latency() {
        let prober = Prober::new(Arc::new(FixedRuntime(RuntimeState::Stopped)));
        let profile = ServiceProfile::new("caddy", CheckStrategy::RuntimeStatus { container: None });
        let result = prober.run(&profile).await;
        assert_eq!(result.service_id, "caddy");
        assert_eq!(result.outcome, ProbeOutcome::Failure);
        assert_eq!(result.raw_details.get("state").map(String::as_str), Some("stopped"));
        assert!(result.observed_at_ms > 0);
    }
}
