// ABOUTME: Synthetic API probe capability trait and hyper-based implementation.
// ABOUTME: Issues one request and measures status, latency, and processing time.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper::header::HOST;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::config::ApiCheckConfig;

/// Outcome of one synthetic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub latency: Duration,
    /// Server-side processing time, present only when the response carries
    /// the metadata header.
    pub processing_time: Option<Duration>,
}

/// Issues the end-to-end synthetic request for the health battery.
#[async_trait]
pub trait ApiProbe: Send + Sync {
    async fn probe(&self) -> Result<ApiResponse, ApiProbeError>;
}

/// Errors from the synthetic API probe.
#[derive(Debug, thiserror::Error)]
pub enum ApiProbeError {
    #[error("connection to {0} failed: {1}")]
    ConnectFailed(String, String),

    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// Header carrying server-side processing time in milliseconds.
const PROCESSING_TIME_HEADER: &str = "x-processing-time-ms";

/// Stand-in probe for configurations without an API target. Validation
/// reports the missing target before any deploy reaches the battery.
pub struct UnconfiguredApiProbe;

#[async_trait]
impl ApiProbe for UnconfiguredApiProbe {
    async fn probe(&self) -> Result<ApiResponse, ApiProbeError> {
        Err(ApiProbeError::RequestFailed(
            "no api_check target configured".to_string(),
        ))
    }
}

/// HTTP/1.1 probe over a plain TCP connection.
pub struct HyperApiProbe {
    config: ApiCheckConfig,
}

impl HyperApiProbe {
    pub fn new(config: ApiCheckConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ApiProbe for HyperApiProbe {
    async fn probe(&self) -> Result<ApiResponse, ApiProbeError> {
        let authority = format!("{}:{}", self.config.host, self.config.port);

        // Latency is end-to-end: connect time counts.
        let start = Instant::now();

        let stream = TcpStream::connect(&authority)
            .await
            .map_err(|e| ApiProbeError::ConnectFailed(authority.clone(), e.to_string()))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ApiProbeError::RequestFailed(e.to_string()))?;

        // The connection task ends when the sender is dropped.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("api probe connection closed with error: {e}");
            }
        });

        let request = Request::builder()
            .uri(self.config.path.as_str())
            .header(HOST, authority.as_str())
            .body(Empty::<Bytes>::new())
            .map_err(|e| ApiProbeError::RequestFailed(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ApiProbeError::RequestFailed(e.to_string()))?;

        let status = response.status().as_u16();

        let processing_time = response
            .headers()
            .get(PROCESSING_TIME_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis);

        // Drain the body so the measured latency covers the full response.
        let _ = response.into_body().collect().await;
        let latency = start.elapsed();

        Ok(ApiResponse {
            status,
            latency,
            processing_time,
        })
    }
}
