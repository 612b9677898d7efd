//! Detection-only audit of a list of URLs over plain HTTP, no browser needed.
//! Banners injected by scripts are invisible to this mode.
//!
//! ```text
//! cargo run -p cmpilot_browser --example audit -- rules.json https://a.example https://b.example
//! ```

use anyhow::{Context, Result, bail};
use cmpilot_browser::{CmpFinder, TimeoutConfig};
use cmpilot_core::{CmpAction, RuleCatalog};
use cmpilot_parser::HtmlDocument;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(rules) = args.next() else {
        bail!("usage: audit <rules.json> <url>...");
    };
    let source = std::fs::read_to_string(&rules).with_context(|| format!("reading {}", rules))?;
    let finder = CmpFinder::new(RuleCatalog::from_json(&source)?).with_timeouts(TimeoutConfig::fast());

    for url in args {
        let doc = match HtmlDocument::fetch(&url).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(%url, error = %e, "skipping");
                continue;
            }
        };
        let result = finder.find(&url, Arc::new(doc), CmpAction::NoAction).await;
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(())
}
