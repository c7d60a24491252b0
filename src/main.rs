//! Command line interface for generating Nostr events: assembles an event
//! from flags, signs it, and either prints it in one of three encodings or
//! sends it to a set of relays, reporting one outcome per relay.

mod event;
mod nson;
mod relay;
mod sign;

use anyhow::{Context, Result};
use clap::Parser;

use event::{assemble_tags, parse_created_at, Event};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "postr",
    author,
    version,
    about = "Generate a signed Nostr event and print it or send it to relays"
)]
struct Cli {
    /// Secret key to sign the event (64-character hex).
    #[arg(long, env = "POSTR_SEC", default_value = sign::DEFAULT_SECRET_KEY, value_name = "KEY")]
    sec: String,
    /// Print the event enveloped in an ["EVENT", ...] message ready to be
    /// sent to a relay.
    #[arg(long)]
    envelope: bool,
    /// Encode the event using NSON.
    #[arg(long)]
    nson: bool,
    /// Event kind.
    #[arg(short, long, default_value_t = 1)]
    kind: u32,
    /// Event content.
    #[arg(short, long, default_value = "hello from postr")]
    content: String,
    /// Set a tag on the event, e.g. -t e=<id>; extra elements go after a ';'.
    #[arg(short, long, value_name = "KEY=VALUE")]
    tag: Vec<String>,
    /// Shortcut for --tag e=<value>.
    #[arg(short, value_name = "ID")]
    e: Vec<String>,
    /// Shortcut for --tag p=<value>.
    #[arg(short, value_name = "PUBKEY")]
    p: Vec<String>,
    /// Unix timestamp for the created_at field, or the literal "now".
    #[arg(
        long,
        visible_alias = "time",
        visible_alias = "ts",
        default_value = "now",
        value_name = "TS"
    )]
    created_at: String,
    /// Optional SOCKS5 proxy for relay connections (host:port).
    #[arg(long, env = "POSTR_SOCKS", value_name = "ADDR")]
    socks: Option<String>,
    /// Relays to publish the event to; with none given, the event is printed
    /// to stdout instead.
    #[arg(value_name = "RELAY")]
    relays: Vec<String>,
}

/// Mutually exclusive stdout encodings for render-only mode.
#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputMode {
    /// ["EVENT", ...] wire message.
    Envelope,
    /// Compact NSON text.
    Nson,
    /// Bare event JSON.
    Json,
}

impl OutputMode {
    /// Fixed flag precedence: `--envelope` wins over `--nson`, default is
    /// bare JSON.
    fn select(envelope: bool, nson: bool) -> Self {
        if envelope {
            OutputMode::Envelope
        } else if nson {
            OutputMode::Nson
        } else {
            OutputMode::Json
        }
    }
}

/// Serialize the signed event for render-only mode.
fn render(ev: &Event, mode: OutputMode) -> Result<String> {
    match mode {
        OutputMode::Envelope => Ok(serde_json::json!(["EVENT", ev]).to_string()),
        OutputMode::Nson => nson::encode(ev),
        OutputMode::Json => Ok(serde_json::to_string(ev)?),
    }
}

/// Assemble, sign, and either print or publish the event.
async fn run(cli: Cli) -> Result<()> {
    let created_at = parse_created_at(&cli.created_at)?;
    let mut ev = Event {
        id: String::new(),
        pubkey: String::new(),
        kind: cli.kind,
        created_at,
        tags: assemble_tags(&cli.tag, &cli.e, &cli.p),
        content: cli.content,
        sig: String::new(),
    };
    sign::sign(&mut ev, &cli.sec).context("error signing with provided key")?;

    if cli.relays.is_empty() {
        println!("{}", render(&ev, OutputMode::select(cli.envelope, cli.nson))?);
    } else {
        // The signed event goes to stdout before any network activity so it
        // can be captured regardless of relay outcomes.
        println!("{}", serde_json::to_string(&ev)?);
        relay::publish_all(&ev, &cli.relays, cli.socks.as_deref()).await;
    }
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    run(cli).await
}
