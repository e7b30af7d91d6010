//! Purpose: `tradtail` CLI entry point.
//! Role: Parses args, installs signal handlers, runs the pipeline, and maps
//! the outcome onto a stable process exit code.
//! Invariants: SIGINT/SIGTERM set the shared shutdown flag; the process then
//! drains the ring and exits 0. Worker errors exit via `to_exit_code`.
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use tradtail::core::error::{to_exit_code, Error, ErrorKind};
use tradtail::core::reader::CrcMode;
use tradtail::pipeline::{Pipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(version, about = "Tail a TRAD event log and validate records in real time")]
struct Args {
    /// Path to the append-only event log
    #[arg(default_value = "../data/event_log.bin")]
    log_path: PathBuf,

    /// Keep going past CRC mismatches instead of stopping
    #[arg(long)]
    lenient_crc: bool,

    /// Force size polling instead of kernel file notification
    #[arg(long)]
    poll: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let exit_code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tradtail: {err}");
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run(args: Args) -> Result<i32, Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown)).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to register signal handler")
                .with_source(err)
        })?;
    }

    let mut config = PipelineConfig::new(&args.log_path);
    config.crc_mode = if args.lenient_crc {
        CrcMode::Lenient
    } else {
        CrcMode::Strict
    };
    config.force_polling = args.poll;

    log::info!("tradtail starting on {}", args.log_path.display());
    let report = Pipeline::new(config).run(shutdown);

    println!();
    println!("=== Final Statistics ===");
    println!("  events read:      {}", report.events_read);
    println!("  events processed: {}", report.events_processed);
    println!("{}", report.validation);
    if report.latency.count > 0 {
        println!("{}", report.latency);
    }
    if let Some(err) = &report.error {
        eprintln!("tradtail: {err}");
    }
    Ok(report.exit_code())
}
