use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

pub type FlatRow = BTreeMap<String, Value>;

/// Query results flattened to one row per result object, with nested object
/// keys joined by `.` (`properties.Yes.checkbox`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<FlatRow>,
}

impl Table {
    pub fn from_results(results: &[Value]) -> Self {
        let mut columns = Vec::new();
        let mut seen = HashSet::new();

        let rows = results
            .iter()
            .map(|result| {
                let mut row = FlatRow::new();
                if let Value::Object(object) = result {
                    flatten_into(&mut row, &mut columns, &mut seen, "", object);
                }
                row
            })
            .collect::<Vec<_>>();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }
}

fn flatten_into(
    row: &mut FlatRow,
    columns: &mut Vec<String>,
    seen: &mut HashSet<String>,
    prefix: &str,
    object: &Map<String, Value>,
) {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(row, columns, seen, &path, nested);
            }
            _ => {
                if seen.insert(path.clone()) {
                    columns.push(path.clone());
                }
                row.insert(path, value.clone());
            }
        }
    }
}
