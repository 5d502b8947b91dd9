use std::time::Duration;

/// Counters and outcome of one pipeline invocation, returned to the caller
/// for logging and exit-code mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunStats {
    pub products_upserted: usize,
    pub prices_inserted: usize,
    pub signals_inserted: usize,
    pub alerts_inserted: usize,
    pub records_skipped: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
    /// False only on a fatal initialization error (store unavailable after
    /// all retries). Record-level errors leave this true.
    pub success: bool,
    /// True when the invocation was dropped because another run was already
    /// in flight.
    pub skipped_overlapping: bool,
}

impl RunStats {
    pub fn record_error(&mut self, error: impl std::fmt::Display) {
        self.errors.push(error.to_string());
    }

    /// A run is clean when it succeeded and swallowed no record errors.
    pub fn is_clean(&self) -> bool {
        self.success && self.errors.is_empty() && self.records_skipped == 0
    }

    pub fn merge(&mut self, other: RunStats) {
        self.products_upserted += other.products_upserted;
        self.prices_inserted += other.prices_inserted;
        self.signals_inserted += other.signals_inserted;
        self.alerts_inserted += other.alerts_inserted;
        self.records_skipped += other.records_skipped;
        self.errors.extend(other.errors);
        self.success &= other.success;
    }
}
