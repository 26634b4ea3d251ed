//! Readiness checks for freshly spawned processes

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use bf_core::config::{ReadinessMode, TimingConfig};
use bf_core::error::ReadinessError;

use crate::backoff::ExponentialBackoff;
use crate::process::ChildProcessHandle;

/// Upper bound on a single connection attempt
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Wait until `process` can be considered ready to serve on `port`
pub async fn wait_ready(
    process: &mut ChildProcessHandle,
    port: u16,
    timing: &TimingConfig,
) -> Result<(), ReadinessError> {
    match timing.readiness {
        ReadinessMode::Probe => probe_port(process, port, timing.probe_timeout).await,
        ReadinessMode::Settle => settle(process, timing.settle_delay).await,
    }
}

/// Retry-connect to `127.0.0.1:port` until it succeeds, the process dies,
/// or `timeout` elapses
pub async fn probe_port(
    process: &mut ChildProcessHandle,
    port: u16,
    timeout: Duration,
) -> Result<(), ReadinessError> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut backoff = ExponentialBackoff::probe();

    loop {
        if !process.is_alive() {
            return Err(ReadinessError::Exited {
                name: process.name().to_string(),
                code: process.exit_code(),
            });
        }

        let attempt = tokio::time::timeout(
            CONNECT_ATTEMPT_TIMEOUT,
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await;
        if let Ok(Ok(_stream)) = attempt {
            tracing::debug!(
                process = %process.name(),
                port,
                "Accepting connections after {:?}",
                started.elapsed()
            );
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ReadinessError::Timeout {
                name: process.name().to_string(),
                port,
                waited: timeout,
            });
        }
        tokio::time::sleep(backoff.next_delay_within(deadline - now)).await;
    }
}

/// Wait a fixed delay, then require the process to still be running
pub async fn settle(process: &mut ChildProcessHandle, delay: Duration) -> Result<(), ReadinessError> {
    tokio::time::sleep(delay).await;

    if process.is_alive() {
        Ok(())
    } else {
        Err(ReadinessError::Exited {
            name: process.name().to_string(),
            code: process.exit_code(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{LogSink, ProcessSpec};
    use tokio::net::TcpListener;

    fn sleeper(sink: &LogSink) -> ChildProcessHandle {
        ChildProcessHandle::spawn(
            ProcessSpec::new("worker-1", "sleep", vec!["30".into()]),
            sink,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_probe_succeeds_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (sink, _rx) = LogSink::channel();
        let mut process = sleeper(&sink);

        probe_port(&mut process, port, Duration::from_secs(2))
            .await
            .unwrap();
        process.terminate(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_probe_waits_for_late_listener() {
        let probe_target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe_target.local_addr().unwrap().port();
        drop(probe_target);

        let (sink, _rx) = LogSink::channel();
        let mut process = sleeper(&sink);

        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            drop(listener);
        });

        probe_port(&mut process, port, Duration::from_secs(3))
            .await
            .unwrap();
        late.abort();
        process.terminate(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);

        let (sink, _rx) = LogSink::channel();
        let mut process = sleeper(&sink);
        let err = probe_port(&mut process, port, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Timeout { port: p, .. } if p == port));
        process.terminate(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_probe_fails_fast_on_exit() {
        let (sink, _rx) = LogSink::channel();
        let mut process = ChildProcessHandle::spawn(
            ProcessSpec::new("relay-1", "sh", vec!["-c".into(), "exit 4".into()]),
            &sink,
        )
        .unwrap();
        process.wait().await;

        let started = std::time::Instant::now();
        let err = probe_port(&mut process, 1, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Exited { code: Some(4), .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_settle_mode() {
        let (sink, _rx) = LogSink::channel();
        let mut process = sleeper(&sink);
        let timing = TimingConfig {
            readiness: ReadinessMode::Settle,
            settle_delay: Duration::from_millis(50),
            ..TimingConfig::default()
        };
        wait_ready(&mut process, 1, &timing).await.unwrap();

        process.terminate(Duration::from_secs(1)).await;
        let err = settle(&mut process, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ReadinessError::Exited { .. }));
    }
}
