// Producer / consumer / monitor wiring: log reader -> SPSC ring -> validator,
// with a shared shutdown flag and periodic progress reporting.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::error::{to_exit_code, Error, ErrorKind};
use crate::core::reader::{CrcMode, LogReader};
use crate::core::record::Event;
use crate::core::ring::{spsc_channel, Consumer, Producer};
use crate::core::tail::TailWatcher;
use crate::histogram::{LatencyHistogram, LatencySummary};
use crate::validator::{LedgerValidator, ValidationSummary};

/// Ring slot count; usable capacity is one less.
pub const RING_SLOTS: usize = 4096;

/// Bounded tail wait so shutdown latency stays under this value.
const TAIL_WAIT: Duration = Duration::from_millis(100);
const MONITOR_PERIOD: Duration = Duration::from_secs(5);
const MONITOR_SLICE: Duration = Duration::from_millis(100);
const HISTOGRAM_WINDOW: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub log_path: PathBuf,
    pub crc_mode: CrcMode,
    /// Skip kernel notification and poll the file size instead.
    pub force_polling: bool,
}

impl PipelineConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            crc_mode: CrcMode::Strict,
            force_polling: false,
        }
    }
}

/// Cloneable counters shared with the monitor thread and with callers that
/// want to observe progress from outside.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    events_read: Arc<AtomicU64>,
    events_processed: Arc<AtomicU64>,
}

impl PipelineStats {
    pub fn events_read(&self) -> u64 {
        self.events_read.load(Ordering::Relaxed)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct PipelineReport {
    pub events_read: u64,
    pub events_processed: u64,
    pub validation: ValidationSummary,
    pub latency: LatencySummary,
    pub error: Option<Error>,
}

impl PipelineReport {
    pub fn exit_code(&self) -> i32 {
        self.error
            .as_ref()
            .map(|err| to_exit_code(err.kind()))
            .unwrap_or(0)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Run until `shutdown` is set (by a signal or by a worker error) and
    /// the ring has drained. Always returns a report; a worker error rides
    /// along in `report.error`.
    pub fn run(self, shutdown: Arc<AtomicBool>) -> PipelineReport {
        let (producer, consumer) = spsc_channel::<Event, RING_SLOTS>();

        let producer_handle = {
            let config = self.config.clone();
            let shutdown = Arc::clone(&shutdown);
            let events_read = Arc::clone(&self.stats.events_read);
            thread::spawn(move || {
                let result = producer_loop(&config, producer, &events_read, &shutdown);
                if let Err(err) = &result {
                    log::error!("producer: {err}");
                    shutdown.store(true, Ordering::Release);
                }
                result
            })
        };

        let consumer_handle = {
            let shutdown = Arc::clone(&shutdown);
            let events_processed = Arc::clone(&self.stats.events_processed);
            thread::spawn(move || consumer_loop(consumer, &events_processed, &shutdown))
        };

        let monitor_handle = {
            let shutdown = Arc::clone(&shutdown);
            let stats = self.stats.clone();
            thread::spawn(move || monitor_loop(&stats, &shutdown))
        };

        let producer_result = producer_handle
            .join()
            .unwrap_or_else(|_| Err(Error::new(ErrorKind::Internal).with_message("producer panicked")));
        let consumer_result = consumer_handle.join();

        // Workers are done; release the monitor even on a clean EOF drain.
        shutdown.store(true, Ordering::Release);
        let _ = monitor_handle.join();

        let (validation, latency, consumer_error) = match consumer_result {
            Ok((validation, latency)) => (validation, latency, None),
            Err(_) => (
                ValidationSummary::default(),
                LatencySummary::default(),
                Some(Error::new(ErrorKind::Internal).with_message("consumer panicked")),
            ),
        };

        PipelineReport {
            events_read: self.stats.events_read(),
            events_processed: self.stats.events_processed(),
            validation,
            latency,
            error: producer_result.err().or(consumer_error),
        }
    }
}

fn producer_loop(
    config: &PipelineConfig,
    mut producer: Producer<Event, RING_SLOTS>,
    events_read: &AtomicU64,
    shutdown: &AtomicBool,
) -> Result<(), Error> {
    let mut reader = LogReader::open(&config.log_path, config.crc_mode)?;
    let mut watcher = if config.force_polling {
        TailWatcher::new_polling(&config.log_path)?
    } else {
        TailWatcher::new(&config.log_path)?
    };
    log::info!(
        "producer: tail-following {} via {}",
        config.log_path.display(),
        if watcher.is_kernel_notified() {
            "inotify"
        } else {
            "size polling"
        }
    );

    while !shutdown.load(Ordering::Acquire) {
        match reader.read_next()? {
            Some(event) => {
                let mut item = event;
                loop {
                    match producer.try_push(item) {
                        Ok(()) => break,
                        Err(back) => {
                            if shutdown.load(Ordering::Acquire) {
                                return Ok(());
                            }
                            item = back;
                            thread::yield_now();
                        }
                    }
                }
                events_read.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                // At the mapped tail. Re-map if the file already grew,
                // otherwise wait (bounded, so shutdown stays responsive)
                // and re-check.
                if !reader.remap_if_grown()? {
                    let _ = watcher.wait_for_modification(Some(TAIL_WAIT))?;
                    reader.remap_if_grown()?;
                }
            }
        }
    }
    Ok(())
}

fn consumer_loop(
    mut consumer: Consumer<Event, RING_SLOTS>,
    events_processed: &AtomicU64,
    shutdown: &AtomicBool,
) -> (ValidationSummary, LatencySummary) {
    let mut validator = LedgerValidator::new();
    let mut histogram = LatencyHistogram::new();

    loop {
        match consumer.try_pop() {
            Some(event) => {
                let start = Instant::now();
                validator.process_event(&event);
                histogram.record(start.elapsed().as_nanos() as u64);

                let processed = events_processed.fetch_add(1, Ordering::Relaxed) + 1;
                if processed % HISTOGRAM_WINDOW == 0 {
                    println!("{}", histogram.summary());
                    histogram.clear();
                }
            }
            None => {
                // Keep draining after shutdown until the ring is empty.
                if shutdown.load(Ordering::Acquire) && consumer.is_empty() {
                    break;
                }
                thread::yield_now();
            }
        }
    }

    (validator.summary(), histogram.summary())
}

fn monitor_loop(stats: &PipelineStats, shutdown: &AtomicBool) {
    let mut last_read = 0u64;
    let mut last_processed = 0u64;
    let mut window_start = Instant::now();

    while !shutdown.load(Ordering::Acquire) {
        thread::sleep(MONITOR_SLICE);
        if window_start.elapsed() < MONITOR_PERIOD {
            continue;
        }

        let elapsed = window_start.elapsed().as_secs_f64();
        let read = stats.events_read();
        let processed = stats.events_processed();
        log::info!(
            "monitor: read {read} ({:.0}/s), processed {processed} ({:.0}/s)",
            (read - last_read) as f64 / elapsed,
            (processed - last_processed) as f64 / elapsed,
        );
        last_read = read;
        last_processed = processed;
        window_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelineConfig};
    use crate::core::record::{encode_record, EventType, FileHeader};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn trade_record(seq: u64) -> Vec<u8> {
        let payload =
            format!("{{\"trade_id\":\"T-{seq}\",\"symbol\":\"AAPL\",\"quantity\":100}}");
        encode_record(seq, seq * 1000, EventType::TradeCreated, payload.as_bytes())
    }

    fn write_log(path: &Path, count: u64) {
        let mut bytes = FileHeader::new().encode().to_vec();
        for seq in 1..=count {
            bytes.extend_from_slice(&trade_record(seq));
        }
        std::fs::write(path, bytes).expect("write log");
    }

    #[test]
    fn pipeline_processes_existing_records_and_drains_on_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        write_log(&path, 25);

        let mut config = PipelineConfig::new(&path);
        config.force_polling = true;
        let pipeline = Pipeline::new(config);
        let stats = pipeline.stats();
        let shutdown = Arc::new(AtomicBool::new(false));

        let runner = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || pipeline.run(shutdown))
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while stats.events_processed() < 25 {
            assert!(Instant::now() < deadline, "pipeline stalled");
            std::thread::sleep(Duration::from_millis(10));
        }
        shutdown.store(true, Ordering::Release);

        let report = runner.join().expect("join");
        assert!(report.error.is_none(), "unexpected error: {:?}", report.error);
        assert_eq!(report.events_read, 25);
        assert_eq!(report.events_processed, 25);
        assert_eq!(report.validation.trades_validated, 25);
        assert_eq!(report.validation.validation_errors, 0);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn pipeline_surfaces_corruption_as_nonzero_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        let mut bytes = FileHeader::new().encode().to_vec();
        let mut bad = trade_record(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        bytes.extend_from_slice(&bad);
        std::fs::write(&path, bytes).expect("write log");

        let mut config = PipelineConfig::new(&path);
        config.force_polling = true;
        let pipeline = Pipeline::new(config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let report = pipeline.run(shutdown);

        assert!(report.error.is_some());
        assert_ne!(report.exit_code(), 0);
        assert_eq!(report.events_processed, 0);
    }
}
