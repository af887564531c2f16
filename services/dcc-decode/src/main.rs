//! DCC Decode - decodes a captured DCC track signal
//!
//! Reads an edge capture, prints every decoded packet as text or JSON
//! lines, then the time ranges matching the configured search.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dcc_decode::config::{Config, OutputFormat};
use dcc_decode::{Capture, DecodedPacket, DecoderRunner};

fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the packets
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.capture_path.clone())
        .context("no capture file given (pass a path or set DCC_CAPTURE)")?;

    let registry = config
        .profile_registry()
        .context("invalid timing configuration")?;
    let query = config.query().context("invalid search")?;

    info!("Configuration:");
    info!("  Capture: {}", path.display());
    info!("  Sample rate: {} Hz", config.sample_rate);
    info!("  Timing mode: {}", registry.mode());
    info!("  Accessory offset: {}", config.accessory_offset);

    let capture = Capture::from_path(&path, config.sample_rate)
        .with_context(|| format!("failed to load capture {}", path.display()))?;
    let us = |sample: u64| capture.samples_to_us(sample);

    let mut runner = DecoderRunner::new(&capture, &registry, config.interpret_context())
        .context("cannot decode capture")?;

    let mut packets: Vec<DecodedPacket> = Vec::new();
    for packet in runner.by_ref().filter_map(|a| match a.kind {
        dcc_decode::AnnotationKind::Packet(p) => Some(*p),
        _ => None,
    }) {
        match config.output {
            OutputFormat::Text => {
                println!("{:>12.1} us  {}", us(packet.start), packet.summary())
            }
            OutputFormat::Json => println!("{}", serde_json::to_string(&packet)?),
        }
        packets.push(packet);
    }

    if let Some(query) = &query {
        let hits: Vec<_> = query.search(&packets)?.collect();
        if hits.is_empty() {
            warn!("No packets match the search");
        }
        for hit in hits {
            match config.output {
                OutputFormat::Text => println!(
                    "match {:.1}..{:.1} us  {}",
                    us(hit.start),
                    us(hit.end),
                    hit.mnemonic()
                ),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "match": { "start_us": us(hit.start), "end_us": us(hit.end) } })
                ),
            }
        }
    }

    let stats = runner.stats();
    if config.output == OutputFormat::Json {
        println!("{}", serde_json::json!({ "stats": stats }));
    }
    info!(
        "Decoder stopped. Packets: {}, Checksum errors: {}, Framing errors: {}, Invalid symbols: {}",
        stats.packets, stats.checksum_errors, stats.framing_errors, stats.invalid_symbols
    );
    info!(
        "  Preambles: {} ({} too short), Cutouts: {}, Elided pulses: {}, Violations: {}",
        stats.preambles,
        stats.short_preambles,
        stats.railcom_cutouts,
        stats.pulses_elided,
        stats.violations
    );

    Ok(())
}
