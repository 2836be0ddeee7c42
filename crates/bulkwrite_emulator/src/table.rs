//! In-memory table storage.

use crate::error::{EmulatorError, EmulatorResult};
use bulkwrite_protocol::{Mutation, SingleRowMutation, TimestampRange, SERVER_SET_TIMESTAMP};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// One version of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Version timestamp in microseconds.
    pub timestamp_micros: i64,
    /// Cell value.
    pub value: Bytes,
}

/// Column address inside a row: family and qualifier.
type ColumnKey = (String, Bytes);

/// Cell versions of one column, newest first.
type Versions = Vec<Cell>;

/// A row: every column with at least one version.
pub type Row = BTreeMap<ColumnKey, Versions>;

/// An in-memory table.
///
/// Rows are kept in key order. Writing a cell with a timestamp that already
/// exists in its column overwrites that version, so a replayed write with an
/// explicit timestamp leaves the table unchanged. Server-assigned timestamps
/// are strictly increasing, so a replayed write using them adds a version.
pub struct Table {
    families: BTreeSet<String>,
    rows: RwLock<BTreeMap<Bytes, Row>>,
    last_timestamp: Mutex<i64>,
}

impl Table {
    /// Creates an empty table with the given column families.
    pub fn new<I, S>(families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            families: families.into_iter().map(Into::into).collect(),
            rows: RwLock::new(BTreeMap::new()),
            last_timestamp: Mutex::new(0),
        }
    }

    /// Returns true if the table has the column family.
    pub fn has_family(&self, family: &str) -> bool {
        self.families.contains(family)
    }

    /// Applies every operation of `row` atomically.
    ///
    /// Nothing is written unless every operation is valid.
    pub fn apply(&self, row: &SingleRowMutation) -> EmulatorResult<()> {
        row.validate()?;
        for mutation in &row.mutations {
            if let Some(family) = mutation.family() {
                if !self.has_family(family) {
                    return Err(EmulatorError::UnknownColumnFamily(family.to_string()));
                }
            }
            if let Mutation::SetCell {
                timestamp_micros, ..
            } = mutation
            {
                if *timestamp_micros < SERVER_SET_TIMESTAMP {
                    return Err(EmulatorError::InvalidRequest(format!(
                        "invalid timestamp {timestamp_micros}"
                    )));
                }
            }
        }

        let mut rows = self.rows.write();
        let mut columns = rows.remove(&row.row_key).unwrap_or_default();
        for mutation in &row.mutations {
            match mutation {
                Mutation::SetCell {
                    family,
                    column,
                    timestamp_micros,
                    value,
                } => {
                    let timestamp = if *timestamp_micros == SERVER_SET_TIMESTAMP {
                        self.next_server_timestamp()
                    } else {
                        *timestamp_micros
                    };
                    let versions = columns
                        .entry((family.clone(), column.clone()))
                        .or_default();
                    write_version(versions, timestamp, value.clone());
                }
                Mutation::DeleteFromColumn {
                    family,
                    column,
                    range,
                } => {
                    let key = (family.clone(), column.clone());
                    if let Some(versions) = columns.get_mut(&key) {
                        delete_versions(versions, range);
                        if versions.is_empty() {
                            columns.remove(&key);
                        }
                    }
                }
                Mutation::DeleteFromFamily { family } => {
                    columns.retain(|(f, _), _| f != family);
                }
                Mutation::DeleteFromRow => columns.clear(),
            }
        }
        if !columns.is_empty() {
            rows.insert(row.row_key.clone(), columns);
        }
        Ok(())
    }

    /// Returns a copy of a row.
    pub fn read_row(&self, row_key: &[u8]) -> Option<Row> {
        self.rows.read().get(row_key).cloned()
    }

    /// Returns the versions of one column, newest first.
    pub fn cell_versions(&self, row_key: &[u8], family: &str, column: &[u8]) -> Vec<Cell> {
        let rows = self.rows.read();
        rows.get(row_key)
            .and_then(|row| {
                row.iter()
                    .find(|((f, c), _)| f == family && &c[..] == column)
                    .map(|(_, versions)| versions.clone())
            })
            .unwrap_or_default()
    }

    /// Number of non-empty rows.
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Total number of cell versions across the table.
    pub fn cell_count(&self) -> usize {
        self.rows
            .read()
            .values()
            .flat_map(|row| row.values())
            .map(Vec::len)
            .sum()
    }

    /// Row keys in order.
    pub fn row_keys(&self) -> Vec<Bytes> {
        self.rows.read().keys().cloned().collect()
    }

    /// Strictly increasing wall-clock microseconds.
    fn next_server_timestamp(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let mut last = self.last_timestamp.lock();
        *last = now.max(last.saturating_add(1));
        *last
    }
}

fn write_version(versions: &mut Versions, timestamp_micros: i64, value: Bytes) {
    match versions.binary_search_by(|cell| timestamp_micros.cmp(&cell.timestamp_micros)) {
        Ok(pos) => versions[pos].value = value,
        Err(pos) => versions.insert(
            pos,
            Cell {
                timestamp_micros,
                value,
            },
        ),
    }
}

fn delete_versions(versions: &mut Versions, range: &TimestampRange) {
    versions.retain(|cell| !range.contains(cell.timestamp_micros));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(["cf", "meta"])
    }

    #[test]
    fn set_and_overwrite_explicit_timestamp() {
        let table = table();
        let write = SingleRowMutation::new("r", vec![Mutation::set_cell("cf", "q", 10, "a")]);
        table.apply(&write).unwrap();
        table.apply(&write).unwrap();

        let versions = table.cell_versions(b"r", "cf", b"q");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].value, Bytes::from_static(b"a"));

        let newer = SingleRowMutation::new("r", vec![Mutation::set_cell("cf", "q", 20, "b")]);
        table.apply(&newer).unwrap();
        let versions = table.cell_versions(b"r", "cf", b"q");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].timestamp_micros, 20);
    }

    #[test]
    fn server_timestamp_replay_adds_versions() {
        let table = table();
        let write =
            SingleRowMutation::new("r", vec![Mutation::set_cell_server_time("cf", "q", "v")]);
        table.apply(&write).unwrap();
        table.apply(&write).unwrap();

        let versions = table.cell_versions(b"r", "cf", b"q");
        assert_eq!(versions.len(), 2);
        assert!(versions[0].timestamp_micros > versions[1].timestamp_micros);
    }

    #[test]
    fn unknown_family_is_atomic() {
        let table = table();
        let write = SingleRowMutation::new(
            "r",
            vec![
                Mutation::set_cell("cf", "q", 1, "v"),
                Mutation::set_cell("nope", "q", 1, "v"),
            ],
        );
        let err = table.apply(&write).unwrap_err();
        assert!(matches!(err, EmulatorError::UnknownColumnFamily(f) if f == "nope"));
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn deletes() {
        let table = table();
        table
            .apply(&SingleRowMutation::new(
                "r",
                vec![
                    Mutation::set_cell("cf", "a", 1, "1"),
                    Mutation::set_cell("cf", "a", 5, "5"),
                    Mutation::set_cell("cf", "b", 1, "1"),
                    Mutation::set_cell("meta", "m", 1, "1"),
                ],
            ))
            .unwrap();
        assert_eq!(table.cell_count(), 4);

        let range = TimestampRange {
            start_micros: 0,
            end_micros: 3,
        };
        table
            .apply(&SingleRowMutation::new(
                "r",
                vec![Mutation::delete_from_column("cf", "a", range)],
            ))
            .unwrap();
        assert_eq!(table.cell_versions(b"r", "cf", b"a").len(), 1);

        table
            .apply(&SingleRowMutation::new(
                "r",
                vec![Mutation::delete_from_family("cf")],
            ))
            .unwrap();
        assert_eq!(table.cell_count(), 1);

        table
            .apply(&SingleRowMutation::new("r", vec![Mutation::delete_from_row()]))
            .unwrap();
        assert_eq!(table.row_count(), 0);
        assert!(table.read_row(b"r").is_none());
    }

    #[test]
    fn rejects_invalid_rows() {
        let table = table();
        assert!(table
            .apply(&SingleRowMutation::new("", vec![Mutation::delete_from_row()]))
            .is_err());
        assert!(table
            .apply(&SingleRowMutation::new(
                "r",
                vec![Mutation::set_cell("cf", "q", -7, "v")]
            ))
            .is_err());
    }
}
