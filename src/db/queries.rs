pub const CREATE_ACTIVITY_ROWS: &str = r#"
CREATE TABLE IF NOT EXISTS activity_rows (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  position     INTEGER NOT NULL,
  created_time TEXT NOT NULL,
  ref_id       TEXT NOT NULL,
  completed    INTEGER NOT NULL,
  reference_id TEXT NOT NULL,
  activity     TEXT NOT NULL,
  category     TEXT,
  difficulty   REAL
);
"#;

pub const CREATE_EXTRACTION_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS extraction_runs (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  finished_at  INTEGER NOT NULL,
  pages        INTEGER NOT NULL,
  failed_pages INTEGER NOT NULL,
  fetched      INTEGER NOT NULL,
  dropped      INTEGER NOT NULL,
  stored_rows  INTEGER NOT NULL
);
"#;

pub const CREATE_INDEX_ACTIVITY_ROWS_CREATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_activity_rows_created_time ON activity_rows(created_time);";

pub const CREATE_INDEX_ACTIVITY_ROWS_ACTIVITY: &str =
    "CREATE INDEX IF NOT EXISTS idx_activity_rows_activity ON activity_rows(activity);";

pub fn schema_statements() -> [&'static str; 4] {
    [
        CREATE_ACTIVITY_ROWS,
        CREATE_EXTRACTION_RUNS,
        CREATE_INDEX_ACTIVITY_ROWS_CREATED,
        CREATE_INDEX_ACTIVITY_ROWS_ACTIVITY,
    ]
}
