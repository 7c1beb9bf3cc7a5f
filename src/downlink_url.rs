//! KPN ThingPark downlink URL signing.
//!
//! The LRC expects every downlink request to carry a `Token` query parameter:
//! - The unescaped query string `DevEUI=..&FPort=..&Payload=..&AS_ID=..&Time=..` is built first.
//! - `Token` = lowercase hex SHA-256 over `query_bytes || lrc_as_key_bytes` (no separator).
//! - Only after hashing are `:` and `+` percent-encoded, across the whole query string.
//!   No other characters are escaped; the LRC verifies against exactly this form.
//!
//! The shared secret is the LRC-AS key as it is written (hex text), not its decoded value.
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::DownlinkError;

pub const KPN_DOWNLINK_ENDPOINT: &str = "https://api.kpn-lora.com/thingpark/lrc/rest/downlink";

/// Fields of a single downlink; discarded once the URL is built.
#[derive(Clone, PartialEq, Eq)]
pub struct DownlinkRequest {
    pub device_id: String,
    pub port: u32,
    pub payload: String,
    pub application_id: String,
    pub timestamp: String,
    pub shared_secret: Vec<u8>,
}

// Hand-written so the secret never ends up in a log line.
impl std::fmt::Debug for DownlinkRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownlinkRequest")
            .field("device_id", &self.device_id)
            .field("port", &self.port)
            .field("payload", &self.payload)
            .field("application_id", &self.application_id)
            .field("timestamp", &self.timestamp)
            .field("shared_secret", &format_args!("<{} bytes>", self.shared_secret.len()))
            .finish()
    }
}

/// Validate an LRC-AS key given as hex text and return the bytes that get hashed.
pub fn parse_shared_secret(key_hex: &str) -> Result<Vec<u8>, DownlinkError> {
    if key_hex.is_empty() { return Err(DownlinkError::InvalidKey("empty key".into())); }
    hex::decode(key_hex).map_err(|e| DownlinkError::InvalidKey(e.to_string()))?;
    Ok(key_hex.as_bytes().to_vec())
}

/// Check an explicit timestamp is RFC 3339 and hand it back untouched.
pub fn parse_timestamp(time: &str) -> Result<String, DownlinkError> {
    DateTime::parse_from_rfc3339(time).map_err(|e| DownlinkError::InvalidTimestamp(format!("{time}: {e}")))?;
    Ok(time.to_string())
}

/// Millisecond ISO-8601 rendering with an explicit `+00:00` offset.
pub fn utc_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, false)
}

pub fn build_query_string(req: &DownlinkRequest) -> String {
    format!(
        "DevEUI={}&FPort={}&Payload={}&AS_ID={}&Time={}",
        req.device_id, req.port, req.payload, req.application_id, req.timestamp
    )
}

/// SHA-256 of `query_string || shared_secret`, lowercase hex (64 chars).
pub fn compute_token(query_string: &str, shared_secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query_string.as_bytes());
    hasher.update(shared_secret);
    hex::encode(hasher.finalize())
}

/// Escape `:` and `+` everywhere in the string, nothing else.
pub fn encode_time_chars(query_string: &str) -> String {
    query_string.replace(':', "%3A").replace('+', "%2B")
}

fn decode_time_chars(query_string: &str) -> String {
    query_string.replace("%3A", ":").replace("%2B", "+")
}

pub fn construct_url(req: &DownlinkRequest) -> String {
    construct_url_with_endpoint(KPN_DOWNLINK_ENDPOINT, req)
}

/// Same as [`construct_url`] against a different base endpoint (e.g. a test LRC).
pub fn construct_url_with_endpoint(endpoint: &str, req: &DownlinkRequest) -> String {
    let query = build_query_string(req);
    let token = compute_token(&query, &req.shared_secret);
    debug!(dev_eui = %req.device_id, f_port = req.port, payload_len = req.payload.len(), token = %token, "construct_url: signed");
    format!("{}?{}&Token={}", endpoint, encode_time_chars(&query), token)
}

/// Re-derive the token of a signed URL and compare it with the embedded one.
pub fn verify_url(url: &str, shared_secret: &[u8]) -> Result<bool, DownlinkError> {
    let (_, query) = url.split_once('?').ok_or_else(|| DownlinkError::MalformedUrl("no query string".into()))?;
    let (params, token) = query
        .rsplit_once("&Token=")
        .ok_or_else(|| DownlinkError::MalformedUrl("no Token parameter".into()))?;
    let expected = compute_token(&decode_time_chars(params), shared_secret);
    debug!(embedded = %token, computed = %expected, "verify_url: compared");
    Ok(expected == token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXAMPLE_URL: &str = "https://api.kpn-lora.com/thingpark/lrc/rest/downlink?DevEUI=000000000F1D8693&FPort=1&Payload=00&AS_ID=app1.sample.com&Time=2016-01-11T14%3A28%3A00.333%2B02%3A00&Token=63a4ec6532937c9bcba109a75f731d6dc192c9df662dee56757634a8a6dc3f4c";

    fn sample() -> DownlinkRequest {
        DownlinkRequest {
            device_id: "000000000F1D8693".into(),
            port: 1,
            payload: "00".into(),
            application_id: "app1.sample.com".into(),
            timestamp: "2016-01-11T14:28:00.333+02:00".into(),
            shared_secret: parse_shared_secret("46ab678cd45df4a4e4b375eacd096acc").expect("key"),
        }
    }

    #[test]
    fn construct_url_matches_kpn_example() {
        assert_eq!(construct_url(&sample()), EXAMPLE_URL);
    }

    #[test]
    fn query_string_is_unescaped() {
        assert_eq!(
            build_query_string(&sample()),
            "DevEUI=000000000F1D8693&FPort=1&Payload=00&AS_ID=app1.sample.com&Time=2016-01-11T14:28:00.333+02:00"
        );
    }

    #[test]
    fn compute_token_known_digests() {
        assert_eq!(compute_token("", b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        // split point between query and secret must not matter
        assert_eq!(compute_token("ab", b"c"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn compute_token_is_deterministic_lowercase_hex() {
        let q = build_query_string(&sample());
        let a = compute_token(&q, b"secret");
        let b = compute_token(&q, b"secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn every_field_changes_the_token() {
        let base = sample();
        let token = |r: &DownlinkRequest| compute_token(&build_query_string(r), &r.shared_secret);
        let t0 = token(&base);
        let variants = [
            DownlinkRequest { device_id: "000000000F1D8694".into(), ..base.clone() },
            DownlinkRequest { port: 2, ..base.clone() },
            DownlinkRequest { payload: "01".into(), ..base.clone() },
            DownlinkRequest { application_id: "app2.sample.com".into(), ..base.clone() },
            DownlinkRequest { timestamp: "2016-01-11T14:28:00.334+02:00".into(), ..base.clone() },
            DownlinkRequest { shared_secret: b"46ab678cd45df4a4e4b375eacd096acd".to_vec(), ..base.clone() },
        ];
        for v in variants.iter() {
            assert_ne!(token(v), t0, "token unchanged for {:?}", v);
        }
    }

    #[test]
    fn substitution_is_global_and_narrow() {
        assert_eq!(encode_time_chars("a:b+c d/e%f&g=h"), "a%3Ab%2Bc d/e%f&g=h");
        let req = DownlinkRequest { payload: "0a:0b".into(), application_id: "app+1".into(), ..sample() };
        let url = construct_url(&req);
        assert!(url.contains("Payload=0a%3A0b&"));
        assert!(url.contains("AS_ID=app%2B1&"));
        assert!(url.starts_with("https://api.kpn-lora.com/"));
    }

    #[test]
    fn verify_url_round_trips() {
        let req = DownlinkRequest { payload: "de:ad+be".into(), timestamp: "2026-10-16T09:30:00.123+00:00".into(), ..sample() };
        let url = construct_url(&req);
        assert!(verify_url(&url, &req.shared_secret).expect("well formed"));
        assert!(!verify_url(&url, b"other").expect("well formed"));
        assert!(verify_url(EXAMPLE_URL, &sample().shared_secret).expect("well formed"));
    }

    #[test]
    fn verify_url_rejects_malformed() {
        assert!(matches!(verify_url("https://example.com/downlink", b"k"), Err(DownlinkError::MalformedUrl(_))));
        assert!(matches!(verify_url("https://example.com/downlink?DevEUI=00", b"k"), Err(DownlinkError::MalformedUrl(_))));
    }

    #[test]
    fn custom_endpoint_keeps_signature() {
        let url = construct_url_with_endpoint("http://localhost:9000/downlink", &sample());
        let (_, tail) = EXAMPLE_URL.split_once('?').unwrap();
        assert_eq!(url, format!("http://localhost:9000/downlink?{}", tail));
    }

    #[test]
    fn shared_secret_is_key_text() {
        assert_eq!(parse_shared_secret("46AB").unwrap(), b"46AB".to_vec());
        assert!(matches!(parse_shared_secret("xyz1"), Err(DownlinkError::InvalidKey(_))));
        assert!(matches!(parse_shared_secret("abc"), Err(DownlinkError::InvalidKey(_))));
        assert!(matches!(parse_shared_secret(""), Err(DownlinkError::InvalidKey(_))));
    }

    #[test]
    fn timestamps() {
        let t = Utc.with_ymd_and_hms(2016, 1, 11, 12, 28, 0).unwrap() + chrono::Duration::milliseconds(333);
        assert_eq!(utc_timestamp(t), "2016-01-11T12:28:00.333+00:00");
        assert_eq!(parse_timestamp("2016-01-11T14:28:00.333+02:00").unwrap(), "2016-01-11T14:28:00.333+02:00");
        assert!(matches!(parse_timestamp("yesterday"), Err(DownlinkError::InvalidTimestamp(_))));
    }

    #[test]
    fn debug_output_hides_secret() {
        let s = format!("{:?}", sample());
        assert!(!s.contains("46ab678c"));
        assert!(s.contains("<32 bytes>"));
    }
}
