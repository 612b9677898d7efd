//! Scans one live page with Chromium.
//!
//! ```text
//! cargo run -p cmpilot_browser --example visit -- rules.json https://example.com REJECT_ALL
//! ```

use anyhow::{Context, Result, bail};
use cmpilot_browser::{ChromiumWorker, TimeoutConfig, VisitJob};
use cmpilot_core::{CmpAction, RuleCatalog};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(rules), Some(url)) = (args.next(), args.next()) else {
        bail!("usage: visit <rules.json> <url> [NO_ACTION|ACCEPT_ALL|REJECT_ALL]");
    };
    let action: CmpAction = match args.next() {
        Some(name) => serde_json::from_value(Value::String(name.clone()))
            .with_context(|| format!("unknown CMP action `{}`", name))?,
        None => CmpAction::NoAction,
    };

    let source = std::fs::read_to_string(&rules).with_context(|| format!("reading {}", rules))?;
    let catalog = RuleCatalog::from_json(&source)?;

    let worker = ChromiumWorker::new(catalog).with_timeouts(TimeoutConfig::default());
    let result = worker.visit(&VisitJob::new(url, action)).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
