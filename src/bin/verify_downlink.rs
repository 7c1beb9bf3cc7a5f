#[path = "../error.rs"]
#[allow(dead_code)]
mod error;
#[path = "../downlink_url.rs"]
#[allow(dead_code)]
mod downlink_url;

use clap::Parser;
use crate::downlink_url::{parse_shared_secret, verify_url};
use tracing_subscriber::EnvFilter;

// Small CLI to check a signed downlink URL against an LRC-AS key, e.g. when the
// LRC rejects a token.
// Usage:
//   cargo run --bin verify_downlink -- '<url>' [--key <hex>]
#[derive(Parser, Debug)]
#[command(about = "verify the Token of a signed KPN downlink url")]
struct Args {
    /// signed downlink url (quote it, it contains '&')
    url: String,

    /// the LRC-AS key in hex string
    #[arg(short, long, env = "KPN_LRC_AS_KEY", default_value = "46ab678cd45df4a4e4b375eacd096acc", hide_env_values = true)]
    key: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let result = parse_shared_secret(&args.key).and_then(|secret| verify_url(&args.url, &secret));
    match result {
        Ok(true) => println!("token: OK"),
        Ok(false) => {
            println!("token: MISMATCH");
            std::process::exit(1);
        }
        Err(e) => {
            println!("verify: ERR  {}", e);
            std::process::exit(1);
        }
    }
}
