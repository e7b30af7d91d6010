// Placeholder double-entry validator: counts events and checks that trade
// payloads carry the fields a real accounting check will need.
use std::fmt;

use serde_json::Value;

use crate::core::record::{Event, EventType};

const REQUIRED_TRADE_FIELDS: [&str; 3] = ["trade_id", "symbol", "quantity"];

#[derive(Debug, Default)]
pub struct LedgerValidator {
    events_processed: u64,
    trades_validated: u64,
    validation_errors: u64,
    skipped_unknown: u64,
}

impl LedgerValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called exactly once per event, from a single thread.
    pub fn process_event(&mut self, event: &Event) {
        self.events_processed += 1;

        match event.event_type {
            EventType::TradeCreated => self.validate_trade_created(event),
            EventType::LedgerEntriesGenerated | EventType::PositionUpdated => {
                // Counted but not yet validated; the double-entry balance
                // check lands here once ledger payloads are finalized.
            }
            EventType::Unknown(code) => {
                self.skipped_unknown += 1;
                log::debug!(
                    "skipping unknown event type {code} at seq {}",
                    event.sequence_num
                );
            }
        }
    }

    fn validate_trade_created(&mut self, event: &Event) {
        if event.payload.is_empty() {
            self.validation_errors += 1;
            log::warn!(
                "validation error: trade event with empty payload at seq {}",
                event.sequence_num
            );
            return;
        }

        let parsed: Value = match serde_json::from_slice(&event.payload) {
            Ok(value) => value,
            Err(err) => {
                self.validation_errors += 1;
                log::warn!(
                    "validation error: unparseable trade payload at seq {}: {err}",
                    event.sequence_num
                );
                return;
            }
        };

        let missing: Vec<&str> = REQUIRED_TRADE_FIELDS
            .iter()
            .copied()
            .filter(|field| parsed.get(field).is_none())
            .collect();
        if !missing.is_empty() {
            self.validation_errors += 1;
            log::warn!(
                "validation error: trade event missing {:?} at seq {}",
                missing,
                event.sequence_num
            );
            return;
        }

        self.trades_validated += 1;
        if self.trades_validated % 1000 == 0 {
            log::info!("validated {} trades", self.trades_validated);
        }
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            events_processed: self.events_processed,
            trades_validated: self.trades_validated,
            validation_errors: self.validation_errors,
            skipped_unknown: self.skipped_unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationSummary {
    pub events_processed: u64,
    pub trades_validated: u64,
    pub validation_errors: u64,
    pub skipped_unknown: u64,
}

impl ValidationSummary {
    pub fn passed(&self) -> bool {
        self.validation_errors == 0
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Validation Summary ===")?;
        writeln!(f, "  events processed:  {}", self.events_processed)?;
        writeln!(f, "  trades validated:  {}", self.trades_validated)?;
        writeln!(f, "  validation errors: {}", self.validation_errors)?;
        writeln!(f, "  unknown skipped:   {}", self.skipped_unknown)?;
        write!(
            f,
            "  status: {}",
            if self.passed() {
                "all validations passed"
            } else {
                "validation failures detected"
            }
        )
    }
}
