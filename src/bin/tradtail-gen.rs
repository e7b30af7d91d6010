// Load generator: appends synthetic trade events to a TRAD log, creating the
// file (and its header) when new. The writer side of the format contract.
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use fs2::FileExt;
use serde::Serialize;

use tradtail::core::error::{to_exit_code, Error, ErrorKind};
use tradtail::core::record::{encode_record, EventType, FileHeader};

const SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "TSLA", "NVDA"];

#[derive(Debug, Parser)]
#[command(version, about = "Append synthetic trade events to a TRAD event log")]
struct Args {
    /// Output log file, created with a file header when new
    #[arg(long, default_value = "../data/event_log.bin")]
    out: PathBuf,

    /// Number of records to append
    #[arg(long, default_value_t = 10_000)]
    count: u64,

    /// Sequence number of the first record
    #[arg(long, default_value_t = 1)]
    start_seq: u64,

    /// Records per second; 0 writes as fast as possible
    #[arg(long, default_value_t = 0)]
    rate: u64,

    /// Pad payloads to roughly this many bytes (0 = natural size)
    #[arg(long, default_value_t = 0)]
    payload_bytes: usize,
}

#[derive(Serialize)]
struct TradePayload {
    trade_id: String,
    symbol: &'static str,
    quantity: i64,
    price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pad: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("tradtail-gen: {err}");
        std::process::exit(to_exit_code(err.kind()));
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let io_err = |err: std::io::Error| {
        Error::new(ErrorKind::Io)
            .with_path(&args.out)
            .with_source(err)
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(&args.out)
        .map_err(io_err)?;
    // Single-writer contract: readers never lock, but a second generator
    // interleaving appends would tear records.
    file.lock_exclusive().map_err(io_err)?;

    let existing = file.metadata().map(|meta| meta.len()).map_err(io_err)?;
    let mut writer = BufWriter::new(&file);
    if existing == 0 {
        writer.write_all(&FileHeader::new().encode()).map_err(io_err)?;
        log::info!("created new event log at {}", args.out.display());
    }

    let interval = (args.rate > 0).then(|| Duration::from_nanos(1_000_000_000 / args.rate));
    for i in 0..args.count {
        let seq = args.start_seq + i;
        let payload = trade_payload(seq, args.payload_bytes)?;
        let record = encode_record(seq, now_ns(), EventType::TradeCreated, payload.as_bytes());
        writer.write_all(&record).map_err(io_err)?;
        if let Some(interval) = interval {
            // Paced mode flushes per record so tailing consumers see steady
            // growth instead of one burst at the end.
            writer.flush().map_err(io_err)?;
            std::thread::sleep(interval);
        }
    }
    writer.flush().map_err(io_err)?;

    log::info!(
        "appended {} records (seq {}..={}) to {}",
        args.count,
        args.start_seq,
        args.start_seq + args.count.saturating_sub(1),
        args.out.display()
    );
    Ok(())
}

fn trade_payload(seq: u64, pad_to: usize) -> Result<String, Error> {
    let mut payload = TradePayload {
        trade_id: format!("T-{seq}"),
        symbol: SYMBOLS[(seq % SYMBOLS.len() as u64) as usize],
        quantity: ((seq % 900) + 100) as i64,
        price: 100.0 + (seq % 250) as f64 / 4.0,
        pad: None,
    };
    let to_json = |payload: &TradePayload| {
        serde_json::to_string(payload).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode trade payload")
                .with_source(err)
        })
    };

    let base = to_json(&payload)?;
    if base.len() < pad_to {
        // `"pad":"…"` adds 9 bytes of JSON framing around the filler.
        let filler = (pad_to - base.len()).saturating_sub(9);
        payload.pad = Some("x".repeat(filler.max(1)));
        return to_json(&payload);
    }
    Ok(base)
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
