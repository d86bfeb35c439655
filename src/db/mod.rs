pub mod queries;

use crate::extract::JoinedTable;
use crate::extract::records::JoinedActivityRow;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRunRow {
    pub id: i64,
    pub finished_at: i64,
    pub pages: i64,
    pub failed_pages: i64,
    pub fetched: i64,
    pub dropped: i64,
    pub rows: i64,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })
    }

    /// Swaps the stored table for a fresh extraction in one transaction and
    /// records the run.
    pub fn replace_activity_rows(&mut self, table: &JoinedTable, finished_at: i64) -> Result<()> {
        let transaction = self
            .conn
            .transaction()
            .context("Failed to start transaction")?;

        transaction
            .execute("DELETE FROM activity_rows", [])
            .context("Failed to delete existing activity rows")?;

        {
            let mut statement = transaction
                .prepare(
                    "INSERT INTO activity_rows
                     (position, created_time, ref_id, completed, reference_id, activity, category, difficulty)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .context("Failed to prepare activity row insert")?;

            table
                .rows
                .iter()
                .enumerate()
                .try_for_each(|(position, row)| {
                    statement
                        .execute(params![
                            position as i64,
                            row.created_time,
                            &row.ref_id,
                            row.completed,
                            &row.id,
                            &row.activity,
                            &row.category,
                            row.difficulty,
                        ])
                        .context("Failed to insert activity row")
                        .map(|_| ())
                })?;
        }

        transaction
            .execute(
                "INSERT INTO extraction_runs (finished_at, pages, failed_pages, fetched, dropped, stored_rows)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    finished_at,
                    table.parents as i64,
                    table.failed_parents as i64,
                    table.fetched as i64,
                    table.dropped as i64,
                    table.rows.len() as i64,
                ],
            )
            .context("Failed to record extraction run")?;

        transaction
            .commit()
            .context("Failed to commit activity rows")?;
        Ok(())
    }

    pub fn activity_rows(&self) -> Result<Vec<JoinedActivityRow>> {
        let mut statement = self.conn.prepare(
            "SELECT created_time, ref_id, completed, reference_id, activity, category, difficulty
             FROM activity_rows
             ORDER BY position ASC",
        )?;

        let rows = statement
            .query_map([], map_activity_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query activity rows")?;

        Ok(rows)
    }

    pub fn activity_rows_for(&self, activity: &str) -> Result<Vec<JoinedActivityRow>> {
        let mut statement = self.conn.prepare(
            "SELECT created_time, ref_id, completed, reference_id, activity, category, difficulty
             FROM activity_rows
             WHERE activity = ?1
             ORDER BY position ASC",
        )?;

        let rows = statement
            .query_map(params![activity], map_activity_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query activity rows")?;

        Ok(rows)
    }

    pub fn activity_row_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM activity_rows", [], |row| row.get(0))
            .context("Failed to count activity rows")
    }

    pub fn latest_run(&self) -> Result<Option<ExtractionRunRow>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, finished_at, pages, failed_pages, fetched, dropped, stored_rows
                 FROM extraction_runs
                 ORDER BY finished_at DESC, id DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(ExtractionRunRow {
                        id: row.get(0)?,
                        finished_at: row.get(1)?,
                        pages: row.get(2)?,
                        failed_pages: row.get(3)?,
                        fetched: row.get(4)?,
                        dropped: row.get(5)?,
                        rows: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to query latest extraction run")?;

        Ok(run)
    }
}

fn map_activity_row(row: &Row<'_>) -> rusqlite::Result<JoinedActivityRow> {
    let created_time: DateTime<Utc> = row.get(0)?;

    Ok(JoinedActivityRow {
        created_time,
        ref_id: row.get(1)?,
        completed: row.get(2)?,
        id: row.get(3)?,
        activity: row.get(4)?,
        category: row.get(5)?,
        difficulty: row.get(6)?,
    })
}
