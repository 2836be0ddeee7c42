//! Simulate command implementation.

use bulkwrite_emulator::{Emulator, EmulatorConfig, EmulatorStats, FaultConfig};
use bulkwrite_engine::{
    BackoffConfig, BulkMutator, EngineError, FailedMutation, IdempotencyMode, MutatorConfig,
    RetryConfig,
};
use bulkwrite_protocol::{Mutation, SingleRowMutation, TimestampRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Column family used by generated rows.
const DEFAULT_FAMILY: &str = "cf";

/// Fault injection flags.
#[derive(Debug, Clone, Default)]
pub struct FaultOptions {
    /// Seed for the fault generator.
    pub seed: u64,
    /// Probability of a transient per-entry rejection.
    pub transient_rate: f64,
    /// Probability of applying an entry but reporting a timeout.
    pub lost_ack_rate: f64,
    /// Probability of a permanent per-entry rejection.
    pub permanent_rate: f64,
    /// Probability of cutting a response stream short.
    pub truncate_rate: f64,
    /// Deliver entry statuses out of order.
    pub shuffle: bool,
}

impl FaultOptions {
    fn to_config(&self) -> FaultConfig {
        let config = FaultConfig::seeded(self.seed)
            .with_transient_rate(self.transient_rate)
            .with_lost_ack_rate(self.lost_ack_rate)
            .with_permanent_rate(self.permanent_rate)
            .with_truncate_rate(self.truncate_rate);
        if self.shuffle {
            config.with_shuffle()
        } else {
            config
        }
    }
}

/// Options of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Table name.
    pub table: String,
    /// Number of generated rows.
    pub rows: usize,
    /// Every n-th generated row writes a server-stamped cell.
    pub stamped_every: usize,
    /// Rows to load instead of generating them.
    pub input: Option<PathBuf>,
    /// Fault injection.
    pub faults: FaultOptions,
    /// Retryable failures tolerated before giving up.
    pub max_retries: u32,
    /// Initial backoff in milliseconds.
    pub backoff_ms: u64,
    /// Replay server-stamped cells too.
    pub always_retry: bool,
    /// Fail the command if any mutation failed.
    pub strict: bool,
}

/// One row of an input file.
#[derive(Debug, Deserialize)]
pub struct InputRow {
    /// Row key.
    pub row_key: String,
    /// Operations applied to the row.
    pub operations: Vec<InputOperation>,
}

/// One operation of an input row.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InputOperation {
    /// Write a cell; without a timestamp the server stamps it.
    SetCell {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: String,
        /// Cell value.
        value: String,
        /// Timestamp in microseconds.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Delete every version of a column.
    DeleteColumn {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: String,
    },
    /// Delete a column family from the row.
    DeleteFamily {
        /// Column family.
        family: String,
    },
    /// Delete the whole row.
    DeleteRow,
}

impl InputRow {
    fn into_mutation(self) -> SingleRowMutation {
        let mutations = self
            .operations
            .into_iter()
            .map(|op| match op {
                InputOperation::SetCell {
                    family,
                    column,
                    value,
                    timestamp: Some(ts),
                } => Mutation::set_cell(family, column, ts, value),
                InputOperation::SetCell {
                    family,
                    column,
                    value,
                    timestamp: None,
                } => Mutation::set_cell_server_time(family, column, value),
                InputOperation::DeleteColumn { family, column } => {
                    Mutation::delete_from_column(family, column, TimestampRange::default())
                }
                InputOperation::DeleteFamily { family } => Mutation::delete_from_family(family),
                InputOperation::DeleteRow => Mutation::delete_from_row(),
            })
            .collect();
        SingleRowMutation::new(self.row_key, mutations)
    }
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulateResult {
    /// Table name.
    pub table: String,
    /// Mutations submitted.
    pub submitted: usize,
    /// Mutations confirmed.
    pub succeeded: usize,
    /// Mutations that failed.
    pub failed: usize,
    /// Calls made by the engine.
    pub attempts: u64,
    /// Calls beyond the first.
    pub retries: u64,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u64,
    /// Server-side counters.
    pub server: ServerSummary,
    /// Failed mutations, by original position.
    pub failures: Vec<FailureReport>,
}

/// Server-side view of a run.
#[derive(Debug, Serialize)]
pub struct ServerSummary {
    /// Calls received.
    pub calls: u64,
    /// Entries received, counting replays.
    pub entries_received: u64,
    /// Entries applied, counting replays.
    pub entries_applied: u64,
    /// Injected faults.
    pub faults_injected: u64,
    /// Calls whose stream was cut short.
    pub truncated_calls: u64,
    /// Rows in the table afterwards.
    pub rows: usize,
    /// Cell versions in the table afterwards.
    pub cells: usize,
}

impl ServerSummary {
    fn new(stats: &EmulatorStats, emulator: &Emulator) -> Self {
        Self {
            calls: stats.calls,
            entries_received: stats.entries_received,
            entries_applied: stats.entries_applied,
            faults_injected: stats.faults_injected,
            truncated_calls: stats.truncated_calls,
            rows: emulator.table().row_count(),
            cells: emulator.table().cell_count(),
        }
    }
}

/// A failed mutation.
#[derive(Debug, Serialize)]
pub struct FailureReport {
    /// Position in the submitted batch.
    pub index: usize,
    /// Row key, lossily decoded.
    pub row_key: String,
    /// Final status code.
    pub code: String,
    /// Final status message.
    pub message: String,
}

impl From<&FailedMutation> for FailureReport {
    fn from(failure: &FailedMutation) -> Self {
        Self {
            index: failure.original_index(),
            row_key: String::from_utf8_lossy(&failure.mutation().row_key).into_owned(),
            code: failure.status().code.to_string(),
            message: failure.status().message.clone(),
        }
    }
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (result, failures) = simulate(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    if options.strict && !failures.is_empty() {
        return Err(EngineError::PermanentMutationFailure {
            total: result.submitted,
            failures,
        }
        .into());
    }
    Ok(())
}

/// Applies the configured batch and collects the outcome.
pub fn simulate(
    options: &SimulateOptions,
) -> Result<(SimulateResult, Vec<FailedMutation>), Box<dyn std::error::Error>> {
    let batch = match &options.input {
        Some(path) => load_batch(path)?,
        None => generate_batch(options.rows, options.stamped_every),
    };

    let emulator = Emulator::new(
        EmulatorConfig::new(options.table.clone())
            .with_column_families(column_families(&batch))
            .with_faults(options.faults.to_config()),
    )?;

    let backoff = if options.backoff_ms == 0 {
        BackoffConfig::none()
    } else {
        let initial = Duration::from_millis(options.backoff_ms);
        BackoffConfig::new(initial, initial.saturating_mul(32))
    };
    let idempotency = if options.always_retry {
        IdempotencyMode::AlwaysRetry
    } else {
        IdempotencyMode::Safe
    };
    let config = MutatorConfig::new(options.table.clone())
        .with_retry(RetryConfig::error_count(options.max_retries))
        .with_backoff(backoff)
        .with_idempotency(idempotency);
    let mutator = BulkMutator::new(config, emulator)?;

    info!(rows = batch.len(), table = %options.table, "starting simulation");
    let submitted = batch.len();
    let start = Instant::now();
    let mut failures = mutator.apply(batch);
    let elapsed = start.elapsed();
    failures.sort_by_key(FailedMutation::original_index);

    let stats = mutator.stats();
    let emulator = mutator.transport();
    let result = SimulateResult {
        table: options.table.clone(),
        submitted,
        succeeded: submitted - failures.len(),
        failed: failures.len(),
        attempts: stats.attempts,
        retries: stats.retries,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        server: ServerSummary::new(&emulator.stats(), emulator),
        failures: failures.iter().map(FailureReport::from).collect(),
    };
    Ok((result, failures))
}

/// Reads rows from a JSON array of [`InputRow`]s.
pub fn load_batch(path: &Path) -> Result<Vec<SingleRowMutation>, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let rows: Vec<InputRow> = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(rows.into_iter().map(InputRow::into_mutation).collect())
}

/// Generates `rows` rows with explicit timestamps; every `stamped_every`-th
/// row also writes a server-stamped cell.
pub fn generate_batch(rows: usize, stamped_every: usize) -> Vec<SingleRowMutation> {
    (0..rows)
        .map(|i| {
            let mut ops = vec![
                Mutation::set_cell(DEFAULT_FAMILY, "payload", 1_000, format!("value-{i}")),
                Mutation::set_cell(DEFAULT_FAMILY, "seq", 1_000, i.to_string()),
            ];
            if stamped_every != 0 && i % stamped_every == 0 {
                ops.push(Mutation::set_cell_server_time(DEFAULT_FAMILY, "seen", "1"));
            }
            SingleRowMutation::new(format!("row{i:06}"), ops)
        })
        .collect()
}

fn column_families(batch: &[SingleRowMutation]) -> BTreeSet<String> {
    let mut families: BTreeSet<String> = batch
        .iter()
        .flat_map(|row| row.mutations.iter())
        .filter_map(|m| m.family().map(str::to_owned))
        .collect();
    families.insert(DEFAULT_FAMILY.to_owned());
    families
}

fn print_text_output(result: &SimulateResult) {
    println!("Bulk Mutation Simulation");
    println!("========================");
    println!();
    println!("Table: {}", result.table);
    println!();
    println!("Client:");
    println!("  Submitted:  {}", result.submitted);
    println!("  Succeeded:  {}", result.succeeded);
    println!("  Failed:     {}", result.failed);
    println!("  Attempts:   {}", result.attempts);
    println!("  Retries:    {}", result.retries);
    println!("  Elapsed:    {} ms", result.elapsed_ms);
    println!();
    println!("Server:");
    println!("  Calls:            {}", result.server.calls);
    println!("  Entries received: {}", result.server.entries_received);
    println!("  Entries applied:  {}", result.server.entries_applied);
    println!("  Faults injected:  {}", result.server.faults_injected);
    println!("  Truncated calls:  {}", result.server.truncated_calls);
    println!("  Rows:             {}", result.server.rows);
    println!("  Cell versions:    {}", result.server.cells);

    if !result.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &result.failures {
            println!(
                "  [{}] {} {}: {}",
                failure.index, failure.row_key, failure.code, failure.message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options() -> SimulateOptions {
        SimulateOptions {
            table: "t".to_string(),
            rows: 20,
            stamped_every: 0,
            input: None,
            faults: FaultOptions::default(),
            max_retries: 10,
            backoff_ms: 0,
            always_retry: false,
            strict: false,
        }
    }

    #[test]
    fn clean_run_confirms_everything() {
        let (result, failures) = simulate(&options()).unwrap();
        assert!(failures.is_empty());
        assert_eq!(result.succeeded, 20);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.server.rows, 20);
        assert_eq!(result.server.cells, 40);
    }

    #[test]
    fn permanent_faults_are_reported_in_order() {
        let mut options = options();
        options.faults = FaultOptions {
            seed: 3,
            permanent_rate: 0.5,
            ..FaultOptions::default()
        };
        let (result, failures) = simulate(&options).unwrap();
        assert_eq!(result.failed, failures.len());
        assert!(result.failed > 0);
        assert!(result
            .failures
            .windows(2)
            .all(|pair| pair[0].index < pair[1].index));
        assert!(result
            .failures
            .iter()
            .all(|f| f.code == "FAILED_PRECONDITION"));
    }

    #[test]
    fn strict_run_fails_when_mutations_fail() {
        let mut options = options();
        options.faults.permanent_rate = 1.0;
        options.strict = true;
        let err = run(&options, "json").unwrap_err();
        assert!(err.to_string().contains("of 20 mutations"));
    }

    #[test]
    fn invalid_fault_rate_is_rejected() {
        let mut options = options();
        options.faults.transient_rate = 1.5;
        assert!(simulate(&options).is_err());
    }

    #[test]
    fn loads_rows_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"row_key": "a", "operations": [
                    {{"op": "set_cell", "family": "meta", "column": "q", "value": "v", "timestamp": 7}},
                    {{"op": "set_cell", "family": "cf", "column": "seen", "value": "1"}}
                ]}},
                {{"row_key": "b", "operations": [{{"op": "delete_row"}}]}}
            ]"#
        )
        .unwrap();

        let batch = load_batch(file.path()).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].mutations[1].uses_server_timestamp());
        assert!(!batch[0].mutations[0].uses_server_timestamp());

        let mut options = options();
        options.input = Some(file.path().to_path_buf());
        let (result, failures) = simulate(&options).unwrap();
        assert!(failures.is_empty());
        assert_eq!(result.submitted, 2);
        assert_eq!(result.server.rows, 1);
    }

    #[test]
    fn generated_rows_stamp_every_nth() {
        let batch = generate_batch(6, 3);
        let stamped: Vec<bool> = batch
            .iter()
            .map(|row| row.mutations.iter().any(Mutation::uses_server_timestamp))
            .collect();
        assert_eq!(stamped, vec![true, false, false, true, false, false]);
    }
}
