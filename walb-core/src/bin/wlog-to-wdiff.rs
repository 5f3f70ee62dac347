//! Converts a wlog stream into a wdiff stream.
//!
//! Usage: `wlog-to-wdiff <input.wlog> <output.wdiff> [max_io_blocks]`

use std::fs::File;
use std::io::{BufReader, BufWriter};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use walb_core::convert::Converter;
use walb_core::wdiff::Writer as WdiffWriter;
use walb_core::wlog::Reader as WlogReader;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "walb_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run() {
        tracing::error!("wlog-to-wdiff failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: wlog-to-wdiff <input.wlog> <output.wdiff> [max_io_blocks]");
        std::process::exit(2);
    }
    let max_io_blocks: u16 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(2048);

    let input = BufReader::new(File::open(&args[1])?);
    let reader = WlogReader::new(input)?;
    let uuid = reader.uuid();

    let output = BufWriter::new(File::create(&args[2])?);
    let writer = WdiffWriter::new(output, uuid, max_io_blocks)?;

    let mut converter = Converter::new(reader, writer);
    converter.run()?;
    converter.finish()?;

    tracing::info!("converted {} -> {}", args[1], args[2]);
    Ok(())
}
