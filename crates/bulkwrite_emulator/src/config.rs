//! Emulator configuration.

use crate::error::{EmulatorError, EmulatorResult};
use bulkwrite_protocol::Status;

/// Configuration for the emulator.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Name of the single table served.
    pub table_name: String,
    /// Column families of that table.
    pub column_families: Vec<String>,
    /// Maximum number of entry statuses per response message.
    pub max_entries_per_response: usize,
    /// Fault injection settings.
    pub faults: FaultConfig,
}

impl EmulatorConfig {
    /// Creates a configuration serving `table_name` with the `cf` family and
    /// no faults.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_families: vec!["cf".to_string()],
            max_entries_per_response: 100,
            faults: FaultConfig::default(),
        }
    }

    /// Replaces the column families.
    pub fn with_column_families<I, S>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_families = families.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the maximum number of entry statuses per response message.
    pub fn with_max_entries_per_response(mut self, max: usize) -> Self {
        self.max_entries_per_response = max;
        self
    }

    /// Sets the fault injection settings.
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> EmulatorResult<()> {
        if self.table_name.is_empty() {
            return Err(EmulatorError::InvalidConfig("table name is empty".into()));
        }
        if self.max_entries_per_response == 0 {
            return Err(EmulatorError::InvalidConfig(
                "max_entries_per_response must be positive".into(),
            ));
        }
        self.faults.validate()
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::new("projects/emulator/instances/local/tables/test")
    }
}

/// Fault injection settings.
///
/// Rates are probabilities in `[0, 1]`, drawn per entry (or per call for
/// truncation) from an RNG seeded with `seed`, so a given configuration
/// replays the same faults for the same sequence of requests.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// RNG seed.
    pub seed: u64,
    /// Entry rejected with `Unavailable` before being applied.
    pub transient_rate: f64,
    /// Entry applied, then reported as `DeadlineExceeded`.
    pub lost_ack_rate: f64,
    /// Entry rejected with `FailedPrecondition`.
    pub permanent_rate: f64,
    /// Call applies every entry but the stream is cut short and ends with a
    /// transient status.
    pub truncate_rate: f64,
    /// Deliver entry statuses in random order.
    pub shuffle: bool,
    /// Call statuses returned, in order, by the first calls before anything
    /// is applied.
    pub call_failures: Vec<Status>,
}

impl FaultConfig {
    /// No faults, seeded with `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Sets the transient rejection rate.
    pub fn with_transient_rate(mut self, rate: f64) -> Self {
        self.transient_rate = rate;
        self
    }

    /// Sets the lost acknowledgement rate.
    pub fn with_lost_ack_rate(mut self, rate: f64) -> Self {
        self.lost_ack_rate = rate;
        self
    }

    /// Sets the permanent rejection rate.
    pub fn with_permanent_rate(mut self, rate: f64) -> Self {
        self.permanent_rate = rate;
        self
    }

    /// Sets the stream truncation rate.
    pub fn with_truncate_rate(mut self, rate: f64) -> Self {
        self.truncate_rate = rate;
        self
    }

    /// Enables shuffled delivery.
    pub fn with_shuffle(mut self) -> Self {
        self.shuffle = true;
        self
    }

    /// Appends a scripted call failure.
    pub fn with_call_failure(mut self, status: Status) -> Self {
        self.call_failures.push(status);
        self
    }

    /// Returns true if no fault can ever fire.
    pub fn is_quiet(&self) -> bool {
        self.transient_rate == 0.0
            && self.lost_ack_rate == 0.0
            && self.permanent_rate == 0.0
            && self.truncate_rate == 0.0
            && !self.shuffle
            && self.call_failures.is_empty()
    }

    /// Checks that every rate is a probability and that the per-entry rates
    /// do not add up to more than one.
    pub fn validate(&self) -> EmulatorResult<()> {
        let rates = [
            ("transient_rate", self.transient_rate),
            ("lost_ack_rate", self.lost_ack_rate),
            ("permanent_rate", self.permanent_rate),
            ("truncate_rate", self.truncate_rate),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(EmulatorError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {rate}"
                )));
            }
        }
        let per_entry = self.transient_rate + self.lost_ack_rate + self.permanent_rate;
        if per_entry > 1.0 {
            return Err(EmulatorError::InvalidConfig(format!(
                "per-entry fault rates add up to {per_entry}"
            )));
        }
        for status in &self.call_failures {
            if status.is_ok() {
                return Err(EmulatorError::InvalidConfig(
                    "scripted call failures must not be OK".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            transient_rate: 0.0,
            lost_ack_rate: 0.0,
            permanent_rate: 0.0,
            truncate_rate: 0.0,
            shuffle: false,
            call_failures: Vec::new(),
        }
    }
}
