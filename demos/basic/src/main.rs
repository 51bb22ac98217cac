/**
 * Minimal harness for the telepub publisher.
 *
 * Publishes one text and one binary payload to an HTTP endpoint, then shuts
 * down, draining both sends. Run:
 *
 *   cargo run -p telepub_demo -- -c http://127.0.0.1:8080/events
 *   cargo run -p telepub_demo -- -c http://127.0.0.1:8080/events --options transport.json
 *   RUST_LOG=telepub=trace cargo run -p telepub_demo -- -c ...
 *
 * The options file holds transport options as JSON, e.g.
 * `{"timeout_ms": 5000, "batching": false}`.
 */
use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use telepub::{Config, Metadata, Options, TransportOptions};

#[derive(Parser, Debug)]
#[command(name = "telepub-demo", about = "Publish sample telemetry over HTTP")]
struct Args {
    /// Endpoint URL to publish to.
    #[arg(short, long)]
    connection_string: String,

    /// JSON file with transport options.
    #[arg(long)]
    options: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("telepub=info"))
        .init();

    let args = Args::parse();

    let transport = match &args.options {
        Some(path) => TransportOptions::from_json(&std::fs::read_to_string(path)?)?,
        None => TransportOptions::default(),
    };

    let mut publisher = telepub::connect(Config {
        connection: args.connection_string,
        options: Options {
            transport,
            ..Default::default()
        },
    })?;

    let mut metadata = Metadata::new();
    metadata.insert("sex".into(), "male".into());
    metadata.insert("true_age".into(), "40".into());

    /*
     * A text payload with metadata attached.
     */
    let key = publisher.send(&metadata, r#"{"name":"test","age":20}"#, || {
        println!("[demo] text payload was not delivered");
    })?;
    println!("[demo] Queued text payload as {key}");

    /*
     * Raw bytes, no metadata.
     */
    let key = publisher.send(&Metadata::new(), vec![0u8, 1], || {
        println!("[demo] byte payload was not delivered");
    })?;
    println!("[demo] Queued byte payload as {key}");

    log::info!("{} sends pending, shutting down", publisher.pending_count());
    publisher.shutdown();
    println!("[demo] Done.");

    Ok(())
}
