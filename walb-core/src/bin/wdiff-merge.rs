//! Merges two or more wdiff streams, oldest first, into one.
//!
//! Usage: `wdiff-merge <output.wdiff> <oldest.wdiff> <newer.wdiff> ...`

use std::fs::File;
use std::io::{BufReader, BufWriter};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use walb_core::config::merge_config_from_env;
use walb_core::diffmap::DiffRecIo;
use walb_core::merge::Merger;
use walb_core::wdiff::{DiffFlags, Reader as WdiffReader, Writer as WdiffWriter};

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "walb_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run() {
        tracing::error!("wdiff-merge failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: wdiff-merge <output.wdiff> <oldest.wdiff> <newer.wdiff> ...");
        std::process::exit(2);
    }

    let mut readers = Vec::new();
    for path in &args[2..] {
        readers.push(WdiffReader::new(BufReader::new(File::open(path)?))?);
    }
    let uuid = readers[0].uuid();
    let max_io_blocks = readers.iter().map(WdiffReader::max_io_blocks).max().unwrap_or(2048);

    let config = merge_config_from_env()?;
    let mut merger = Merger::new(readers, config)?;

    let output = BufWriter::new(File::create(&args[1])?);
    let mut writer = WdiffWriter::new(output, uuid, max_io_blocks)?;

    let lb = walb_core::block::LB_SIZE as usize;
    let mut n_records = 0u64;
    while let Some(rec) = merger.next_record()? {
        apply_record(&mut writer, &rec, lb)?;
        n_records += 1;
    }
    writer.finish()?;

    tracing::info!("merged {} streams into {} ({n_records} records)", args.len() - 2, args[1]);
    Ok(())
}

fn apply_record(
    writer: &mut WdiffWriter<BufWriter<File>>,
    rec: &DiffRecIo,
    lb: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if rec.flags.contains(DiffFlags::DISCARD) {
        writer.add_discard(rec.io_address, rec.io_blocks)?;
    } else if rec.flags.contains(DiffFlags::ALLZERO) {
        let zeros = vec![0u8; rec.io_blocks as usize * lb];
        writer.add_io(rec.io_address, rec.io_blocks, &zeros)?;
    } else {
        writer.add_io(rec.io_address, rec.io_blocks, &rec.payload)?;
    }
    Ok(())
}
