// KPN LoRa downlink generator.
// Builds a signed ThingPark downlink URL for one device and either POSTs it to
// the LRC or, with --compare, checks the signer against KPN's published example.

mod downlink_client;
#[allow(dead_code)]
mod downlink_url;
mod error;

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::downlink_client::post_downlink;
use crate::downlink_url::{construct_url_with_endpoint, parse_shared_secret, parse_timestamp, utc_timestamp, DownlinkRequest, KPN_DOWNLINK_ENDPOINT};
use crate::error::DownlinkError;

// Reference request from the KPN LRC documentation.
const EXAMPLE_TIME: &str = "2016-01-11T14:28:00.333+02:00";
const EXAMPLE_URL: &str = "https://api.kpn-lora.com/thingpark/lrc/rest/downlink?DevEUI=000000000F1D8693&FPort=1&Payload=00&AS_ID=app1.sample.com&Time=2016-01-11T14%3A28%3A00.333%2B02%3A00&Token=63a4ec6532937c9bcba109a75f731d6dc192c9df662dee56757634a8a6dc3f4c";

#[derive(Parser, Debug)]
#[command(version, about = "KPN LoRa Downlink generator", long_about = None)]
struct Args {
    /// compare generated url with example
    #[arg(short, long)]
    compare: bool,

    /// device id as known by KPN in hex string
    #[arg(short = 'd', long = "dev_eui", env = "KPN_DEV_EUI", default_value = "000000000F1D8693")]
    dev_eui: String,

    /// the port to send to
    #[arg(short, long, env = "KPN_FPORT", default_value_t = 1)]
    fport: u32,

    /// payload in hex string
    #[arg(short, long, env = "KPN_PAYLOAD", default_value = "00")]
    payload: String,

    /// the application id
    #[arg(short, long, env = "KPN_AS_ID", default_value = "app1.sample.com")]
    id: String,

    /// the LRC-AS key as known by KPN in hex string
    #[arg(short, long, env = "KPN_LRC_AS_KEY", default_value = "46ab678cd45df4a4e4b375eacd096acc", hide_env_values = true)]
    key: String,

    /// explicit RFC 3339 timestamp instead of the current UTC time (ignored with --compare)
    #[arg(short, long)]
    time: Option<String>,

    /// downlink endpoint
    #[arg(short, long, env = "KPN_DOWNLINK_URL", default_value = KPN_DOWNLINK_ENDPOINT)]
    endpoint: String,

    /// http timeout in seconds (none by default)
    #[arg(long, env = "KPN_HTTP_TIMEOUT_SECS")]
    timeout: Option<u64>,

    /// print the signed url without posting it
    #[arg(short = 'n', long)]
    dry_run: bool,
}

/// First/last four characters of a key unless LOG_KEYS_FULL is set.
fn mask_key(key: &str) -> String {
    let log_keys_full = std::env::var("LOG_KEYS_FULL").ok().map(|s| s == "1" || s.eq_ignore_ascii_case("true")).unwrap_or(false);
    if log_keys_full { return key.to_string(); }
    if key.len() <= 8 || !key.is_ascii() { return "****".to_string(); }
    format!("{}..{}", &key[..4], &key[key.len() - 4..])
}

fn is_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Lines printed by --compare; a mismatch is a diagnostic, not an error.
fn compare_with_example(url: &str) -> Vec<String> {
    if url == EXAMPLE_URL {
        vec!["built url matches example".to_string()]
    } else {
        vec![
            "built url does NOT match example".to_string(),
            format!("example:   {}", EXAMPLE_URL),
            format!("generated: {}", url),
        ]
    }
}

fn build_request(args: &Args) -> Result<DownlinkRequest, DownlinkError> {
    let shared_secret = parse_shared_secret(&args.key)?;
    let timestamp = match (&args.time, args.compare) {
        (_, true) => EXAMPLE_TIME.to_string(),
        (Some(t), false) => parse_timestamp(t)?,
        (None, false) => utc_timestamp(Utc::now()),
    };
    if !is_hex(&args.dev_eui) { warn!(dev_eui = %args.dev_eui, "dev_eui is not a hex string; signing it verbatim"); }
    if !is_hex(&args.payload) { warn!(payload = %args.payload, "payload is not a hex string; signing it verbatim"); }
    Ok(DownlinkRequest {
        device_id: args.dev_eui.clone(),
        port: args.fport,
        payload: args.payload.clone(),
        application_id: args.id.clone(),
        timestamp,
        shared_secret,
    })
}

async fn run(args: Args) -> Result<(), DownlinkError> {
    info!(dev_eui = %args.dev_eui, f_port = args.fport, as_id = %args.id, key = %mask_key(&args.key), compare = args.compare, "building downlink");
    let req = build_request(&args)?;
    debug!(request = ?req, "downlink request");
    let url = construct_url_with_endpoint(&args.endpoint, &req);

    if args.compare {
        for line in compare_with_example(&url) { println!("{}", line); }
        return Ok(());
    }

    println!("Request: {}", url);
    if args.dry_run { return Ok(()); }
    let resp = post_downlink(&url, args.timeout.map(Duration::from_secs)).await?;
    debug!(status = resp.status, "downlink response");
    println!("Response: {}", resp.body);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "downlink failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
