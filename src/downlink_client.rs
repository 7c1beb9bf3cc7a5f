//! Posting a signed downlink to the LRC.
//!
//! All parameters already live in the query string, so the POST carries no body.
//! There is no retry: a transport failure is returned to the caller as-is.
//! A non-2xx status is not treated as an error; the body is still handed back
//! because the LRC explains rejected tokens there.
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::error::DownlinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkResponse {
    pub status: u16,
    pub body: String,
}

/// POST the signed URL, optionally bounded by `timeout`.
pub async fn post_downlink(url: &str, timeout: Option<Duration>) -> Result<DownlinkResponse, DownlinkError> {
    let req_start = std::time::Instant::now();
    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout { builder = builder.timeout(t); }
    let client = builder.build()?;

    info!(url = %url, timeout = ?timeout, "posting downlink");
    let resp = match client.post(url).send().await {
        Ok(r) => r,
        Err(e) => {
            counter!("kpn.downlink.http.err").increment(1);
            warn!(error = %e, "downlink http failed");
            return Err(e.into());
        }
    };
    let status = resp.status();
    let body = resp.text().await?;
    histogram!("kpn.downlink.latency_ms").record(req_start.elapsed().as_secs_f64() * 1000.0);
    counter!("kpn.downlink.http.ok", "status" => status.as_u16().to_string()).increment(1);
    if status.is_success() {
        info!(status = status.as_u16(), body_len = body.len(), "downlink http ok");
    } else {
        warn!(status = status.as_u16(), body = %body, "downlink rejected by lrc");
    }
    Ok(DownlinkResponse { status: status.as_u16(), body })
}
