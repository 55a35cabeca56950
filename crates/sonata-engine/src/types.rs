//! Node and edge type tables: shared defaults keyed by an integer type id.

use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// One row of a type table.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRow {
    type_id: i32,
    fields: HashMap<String, String>,
    source: PathBuf,
}

impl TypeRow {
    pub fn new(type_id: i32) -> Self {
        Self {
            type_id,
            fields: HashMap::new(),
            source: PathBuf::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// File the row was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Field value; `NULL` and blank cells count as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty() && *s != "NULL")
    }

    pub fn float(&self, key: &str) -> Result<Option<f64>> {
        self.parse(key, "a number")
    }

    pub fn integer(&self, key: &str) -> Result<Option<i64>> {
        self.parse(key, "an integer")
    }

    fn parse<T: FromStr>(&self, key: &str, what: &str) -> Result<Option<T>> {
        match self.text(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| StoreError::Config {
                path: self.source.clone(),
                reason: format!("row {}: {} = {:?} is not {}", self.type_id, key, raw, what),
            }),
        }
    }
}

pub trait TypeTable: Send + Sync {
    fn lookup(&self, type_id: i32) -> Option<&TypeRow>;

    fn require(&self, type_id: i32) -> Result<&TypeRow> {
        self.lookup(type_id)
            .ok_or_else(|| StoreError::not_found("type", type_id.to_string()))
    }
}

impl TypeTable for HashMap<i32, TypeRow> {
    fn lookup(&self, type_id: i32) -> Option<&TypeRow> {
        self.get(&type_id)
    }
}

/// Type rows read from delimiter-separated files with a header line.
#[derive(Debug, Clone)]
pub struct CsvTypeTable {
    pub delimiter: u8,
    key_column: String,
    rows: HashMap<i32, TypeRow>,
}

impl CsvTypeTable {
    /// Empty table keyed by `key_column`, space delimited.
    pub fn new(key_column: &str) -> Self {
        Self {
            delimiter: b' ',
            key_column: key_column.to_string(),
            rows: HashMap::new(),
        }
    }

    pub fn open<P: AsRef<Path>>(key_column: &str, paths: &[P]) -> Result<Self> {
        let mut table = Self::new(key_column);
        for path in paths {
            table.load(path.as_ref())?;
        }
        Ok(table)
    }

    /// Adds every row of one file. A type id seen before is an error.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let csv_err = |source: csv::Error| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = rdr.headers().map_err(csv_err)?.clone();
        let key = headers
            .iter()
            .position(|h| h == self.key_column)
            .ok_or_else(|| {
                StoreError::structural(format!(
                    "{}: no {} column",
                    path.display(),
                    self.key_column
                ))
            })?;

        let before = self.rows.len();
        for record in rdr.records() {
            let record = record.map_err(csv_err)?;
            let raw_id = record.get(key).unwrap_or_default();
            let type_id: i32 = raw_id.parse().map_err(|_| StoreError::Config {
                path: path.to_path_buf(),
                reason: format!("{} = {:?} is not an integer", self.key_column, raw_id),
            })?;
            if self.rows.contains_key(&type_id) {
                return Err(StoreError::structural(format!(
                    "{}: type {} defined more than once",
                    path.display(),
                    type_id
                )));
            }

            let fields = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect();
            self.rows.insert(
                type_id,
                TypeRow {
                    type_id,
                    fields,
                    source: path.to_path_buf(),
                },
            );
        }
        debug!(
            path = %path.display(),
            rows = self.rows.len() - before,
            "loaded type table"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row, by ascending key.
    pub fn rows(&self) -> Vec<&TypeRow> {
        let mut rows: Vec<&TypeRow> = self.rows.values().collect();
        rows.sort_by_key(|r| r.type_id);
        rows
    }
}

impl TypeTable for CsvTypeTable {
    fn lookup(&self, type_id: i32) -> Option<&TypeRow> {
        self.rows.get(&type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_space_separated_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge_types.csv");
        fs::write(
            &path,
            "edge_type_id model_template syn_weight delay\n\
             101 expsyn 0.01 NULL\n\
             102 exp2syn -0.02 0.1\n",
        )
        .unwrap();

        let table = CsvTypeTable::open("edge_type_id", &[&path]).unwrap();
        assert_eq!(table.len(), 2);
        let row = table.require(102).unwrap();
        assert_eq!(row.text("model_template"), Some("exp2syn"));
        assert_eq!(row.float("syn_weight").unwrap(), Some(-0.02));
        assert_eq!(table.require(101).unwrap().float("delay").unwrap(), None);
        assert!(matches!(
            table.require(7),
            Err(StoreError::NotFound { kind: "type", .. })
        ));
    }

    #[test]
    fn duplicate_ids_across_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "node_type_id model_type\n1 biophysical\n").unwrap();
        fs::write(&b, "node_type_id model_type\n1 virtual\n").unwrap();

        assert!(matches!(
            CsvTypeTable::open("node_type_id", &[&a, &b]),
            Err(StoreError::Structural(_))
        ));
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        let row = TypeRow::new(3).with("delay", "soon").with("sec_id", "2.5");
        assert!(matches!(row.float("delay"), Err(StoreError::Config { .. })));
        assert!(matches!(row.integer("sec_id"), Err(StoreError::Config { .. })));
        assert_eq!(row.integer("missing").unwrap(), None);
    }
}
