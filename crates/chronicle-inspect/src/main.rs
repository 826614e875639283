//! Read-only inspection of a configured Chronicle tracker store.
//!
//! ```text
//! chronicle-inspect <config.yaml> keys
//! chronicle-inspect <config.yaml> show <sender_id>
//! chronicle-inspect <config.yaml> events <sender_id>
//! ```
//!
//! `keys` lists every stored conversation id, `show` prints the rebuilt
//! tracker state (requires a domain in the configuration), and `events`
//! prints the raw stored events. Output is JSON on stdout; logs go to
//! stderr and follow `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{Context, bail};
use chronicle_store::{ChronicleConfig, StoreResolver, TrackerStore};
use chronicle_types::Event;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: chronicle-inspect <config.yaml> (keys | show <sender_id> | events <sender_id>)";

/// A parsed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    config: PathBuf,
    command: Command,
}

/// What to print.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Keys,
    Show(String),
    Events(String),
}

/// Parse the arguments following the program name.
fn parse_args<I>(args: I) -> anyhow::Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(config) = args.next() else {
        bail!("missing configuration file\n{USAGE}");
    };
    let command = match (args.next().as_deref(), args.next()) {
        (Some("keys"), None) => Command::Keys,
        (Some("show"), Some(sender_id)) => Command::Show(sender_id),
        (Some("events"), Some(sender_id)) => Command::Events(sender_id),
        _ => bail!("unrecognised command\n{USAGE}"),
    };
    if args.next().is_some() {
        bail!("too many arguments\n{USAGE}");
    }
    Ok(Invocation {
        config: PathBuf::from(config),
        command,
    })
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the arguments, configuration or store are invalid.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let invocation = parse_args(std::env::args().skip(1))?;
    let mut config = ChronicleConfig::from_file(&invocation.config)
        .with_context(|| format!("loading {}", invocation.config.display()))?;
    // Inspection never publishes.
    config.event_broker = None;

    let store = TrackerStore::from_config(&config, &StoreResolver::new()).await?;
    info!(backend = store.backend().name(), "tracker store opened");

    let output = match invocation.command {
        Command::Keys => {
            let keys = store.keys().await?;
            json!(keys)
        }
        Command::Show(sender_id) => {
            if store.domain().is_none() {
                bail!("`show` needs a domain in the configuration; try `events`");
            }
            let Some(tracker) = store.retrieve(&sender_id).await? else {
                bail!("no conversation stored for '{sender_id}'");
            };
            tracker.current_state()
        }
        Command::Events(sender_id) => {
            let Some(dialogue) = store.retrieve_dialogue(&sender_id).await? else {
                bail!("no conversation stored for '{sender_id}'");
            };
            let events: Vec<Value> = dialogue.events.iter().map(Event::to_value).collect();
            json!({ "sender_id": dialogue.sender_id, "events": events })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
