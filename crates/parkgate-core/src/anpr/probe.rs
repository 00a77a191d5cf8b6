//! Appliance reachability probes

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

/// Answers "is the appliance up" within a bounded time
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool;
}

/// ICMP echo through the system `ping` binary (raw sockets need privileges)
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

impl PingProbe {
    fn command(host: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            let millis = timeout.as_millis().max(1).to_string();
            cmd.args(["-n", "1", "-w", millis.as_str(), host]);
        } else {
            let secs = timeout.as_secs().max(1).to_string();
            cmd.args(["-c", "1", "-W", secs.as_str(), host]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool {
        // Grace period for process start-up on top of the echo timeout
        let bound = timeout + Duration::from_millis(500);
        match tokio::time::timeout(bound, Self::command(host, timeout).status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::warn!("ping {} failed to run: {}", host, e);
                false
            }
            Err(_) => {
                tracing::debug!("ping {} timed out", host);
                false
            }
        }
    }
}

/// TCP connect to a known port, for hosts that drop ICMP
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    pub port: u16,
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host, self.port))).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe { port };
        assert!(probe.is_reachable("127.0.0.1", Duration::from_secs(2)).await);

        drop(listener);
        assert!(!probe.is_reachable("127.0.0.1", Duration::from_secs(2)).await);
    }
}
