/// Errors surfaced while building, verifying or posting a downlink.
///
/// None of these are retried; the binaries print them and exit non-zero.
#[derive(Debug, thiserror::Error)]
pub enum DownlinkError {
    #[error("bad key hex: {0}")]
    InvalidKey(String),
    #[error("bad timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("malformed downlink url: {0}")]
    MalformedUrl(String),
    #[error("downlink http: {0}")]
    Http(#[from] reqwest::Error),
}
