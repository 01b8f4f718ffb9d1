//! List VISA resources and identify the instruments behind them.
//!
//! Walks every resource the VISA library reports, optionally filtered by a
//! substring pattern, queries `*IDN?`, and prints the parsed identity.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use daq_visa_plugins::adapters::{BusAdapter, VisaAdapter};
use daq_visa_plugins::config::Settings;
use daq_visa_plugins::core::Identity;

#[derive(Parser)]
#[command(name = "discovery", about = "Identify instruments on the VISA bus")]
struct Args {
    /// Substring filter applied to resource names (empty matches all).
    /// Defaults to the configured bus.resource_pattern.
    #[arg(short, long)]
    pattern: Option<String>,

    /// Per-instrument query timeout in milliseconds.
    #[arg(short, long, default_value_t = 2000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let pattern = match args.pattern {
        Some(pattern) => pattern,
        None => Settings::new(None)?.bus.resource_pattern,
    };

    let resources = VisaAdapter::list_resources(&pattern).await?;
    if resources.is_empty() {
        println!("No VISA resources matching '{pattern}'");
        return Ok(());
    }

    for resource in resources {
        let mut adapter = VisaAdapter::new(resource.clone())
            .with_timeout(Duration::from_millis(args.timeout_ms));

        match identify(&mut adapter).await {
            Ok(identity) => println!("{resource}: {}", identity.summary()),
            Err(e) => println!("{resource}: no identification ({e:#})"),
        }

        let _ = adapter.disconnect().await;
    }

    Ok(())
}

async fn identify(adapter: &mut VisaAdapter) -> Result<Identity> {
    adapter.connect().await?;
    let reply = adapter.query("*IDN?").await?;
    Ok(Identity::parse(&reply)?)
}
