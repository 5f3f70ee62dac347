//! Replays a wlog stream against a target device or file.
//!
//! Usage: `wlog-redo <input.wlog> <target>`

use std::fs::OpenOptions;
use std::io::BufReader;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use walb_core::config::redo_config_from_env;
use walb_core::convert::log_to_diff;
use walb_core::redo::{device_size_lb, RedoEngine};
use walb_core::wlog::Reader as WlogReader;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "walb_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run() {
        tracing::error!("wlog-redo failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: wlog-redo <input.wlog> <target>");
        std::process::exit(2);
    }

    let input = BufReader::new(std::fs::File::open(&args[1])?);
    let mut reader = WlogReader::new(input)?;
    let pbs = reader.pbs();

    let target = OpenOptions::new().write(true).open(&args[2])?;
    let size_lb = device_size_lb(&target)?;
    let config = redo_config_from_env()?;
    let mut engine = RedoEngine::new(target, pbs, size_lb, config)?;

    while let Some(pack) = reader.fetch_next()? {
        for (record, payload) in pack.header.records.iter().zip(pack.payloads.iter()) {
            match log_to_diff(record, payload) {
                Some(rec_io) => engine.apply(&rec_io, record.lsid)?,
                None => engine.note_padding(record.lsid),
            }
        }
    }

    let stats = engine.finish()?;
    tracing::info!(
        "redo complete: {} written, {} overwritten, {} clipped, {} discarded, {} padding, {} coalesced, lsid [{:?}, {:?})",
        stats.n_written,
        stats.n_overwritten,
        stats.n_clipped,
        stats.n_discard,
        stats.n_padding,
        stats.n_coalesced,
        stats.begin_lsid,
        stats.end_lsid,
    );
    Ok(())
}
