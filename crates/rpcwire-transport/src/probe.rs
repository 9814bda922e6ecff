use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::traits::{ProbeOutcome, Prober};

/// Default time allowed for the probe request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Diagnostic probe over plain HTTP(S) GET.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Create a prober with the default request timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create a prober with an explicit request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rpcwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &Url) -> ProbeOutcome {
        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!(url = %url, status, "probe completed");
                ProbeOutcome::from_status(status)
            }
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "probe did not complete");
                ProbeOutcome::Unreachable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn one_shot_server(status_line: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response =
                format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        Url::parse(&format!("http://{addr}/rpc")).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_status_is_reported() {
        let url = one_shot_server("HTTP/1.1 401 Unauthorized").await;
        let outcome = HttpProber::new().probe(&url).await;
        assert_eq!(outcome, ProbeOutcome::Unauthorized);
    }

    #[tokio::test]
    async fn other_statuses_are_reachable() {
        let url = one_shot_server("HTTP/1.1 400 Bad Request").await;
        let outcome = HttpProber::new().probe(&url).await;
        assert_eq!(outcome, ProbeOutcome::Reachable(400));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let outcome = HttpProber::with_timeout(Duration::from_secs(2))
            .probe(&url)
            .await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable(_)));
    }
}
