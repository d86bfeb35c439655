//! Extraction stage: loads the reference and dashboard collections, fetches
//! each dashboard page's daily-check collection on a bounded pool of tokio
//! tasks, and joins the results against the reference table.

pub mod join;
pub mod records;

use crate::config::MAX_WORKERS;
use crate::notion::table::Table;
use crate::notion::{ApiError, WorkspaceApi};
use anyhow::{Context, Result};
use records::{
    DailyCheckRecord, DashboardRecord, ExtractionError, JoinedActivityRow, PropertySchema,
    ReferenceRecord,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub reference_collection_id: String,
    pub dashboard_collection_id: String,
    pub schema: PropertySchema,
}

/// Collection query that reports failures in the log instead of to the caller.
#[derive(Clone)]
pub struct RemoteQuery {
    api: Arc<dyn WorkspaceApi>,
}

impl RemoteQuery {
    pub fn new(api: Arc<dyn WorkspaceApi>) -> Self {
        Self { api }
    }

    /// `None` means the collection is unavailable, not that it is empty.
    pub async fn query(&self, collection_id: &str) -> Option<Table> {
        match self.api.query_collection(collection_id).await {
            Ok(results) => {
                let table = Table::from_results(&results);
                debug!(
                    collection_id,
                    rows = table.len(),
                    columns = table.columns().len(),
                    "collection retrieved"
                );
                Some(table)
            }
            Err(ApiError::Status { status, body }) => {
                warn!(collection_id, status, body = %body, "failed to retrieve collection");
                None
            }
            Err(error) => {
                warn!(collection_id, error = %error, "failed to retrieve collection");
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct DailyCheckFetcher {
    api: Arc<dyn WorkspaceApi>,
    query: RemoteQuery,
    schema: Arc<PropertySchema>,
}

impl DailyCheckFetcher {
    pub fn new(api: Arc<dyn WorkspaceApi>, schema: PropertySchema) -> Self {
        Self {
            query: RemoteQuery::new(Arc::clone(&api)),
            api,
            schema: Arc::new(schema),
        }
    }

    /// Daily checks of one dashboard page. `None` when anything about the page
    /// is malformed or unreachable; the failure is logged and the page
    /// contributes no records.
    pub async fn fetch(&self, parent: &DashboardRecord) -> Option<Vec<DailyCheckRecord>> {
        match self.try_fetch(parent).await {
            Ok(records) => Some(records),
            Err(error) => {
                log_failure(parent, &error);
                None
            }
        }
    }

    pub async fn try_fetch(
        &self,
        parent: &DashboardRecord,
    ) -> Result<Vec<DailyCheckRecord>, ExtractionError> {
        let blocks = self
            .api
            .list_children(&parent.id)
            .await
            .map_err(ExtractionError::Children)?;

        // Only the first child block is read.
        let child_id = blocks
            .first()
            .ok_or(ExtractionError::NoChildBlocks)?
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractionError::MissingField("results[0].id".to_string()))?;

        let table = self
            .query
            .query(child_id)
            .await
            .ok_or_else(|| ExtractionError::Unavailable(child_id.to_string()))?;

        table
            .rows()
            .iter()
            .map(|row| DailyCheckRecord::from_row(row, parent.created_time, &self.schema))
            .collect()
    }
}

fn log_failure(parent: &DashboardRecord, error: &ExtractionError) {
    warn!(
        page_id = %parent.id,
        created_time = %parent.created_time,
        error = %error,
        "daily check extraction failed"
    );
}

/// Denormalized extraction result plus the bookkeeping needed to explain why
/// it may be smaller than the dashboard.
#[derive(Debug, Clone, Default)]
pub struct JoinedTable {
    pub rows: Vec<JoinedActivityRow>,
    pub parents: usize,
    pub failed_parents: usize,
    pub fetched: usize,
    pub dropped: usize,
}

pub struct Extractor {
    fetcher: DailyCheckFetcher,
    references: Vec<ReferenceRecord>,
    dashboard: Vec<DashboardRecord>,
}

impl Extractor {
    pub fn new(
        api: Arc<dyn WorkspaceApi>,
        schema: PropertySchema,
        references: Vec<ReferenceRecord>,
        dashboard: Vec<DashboardRecord>,
    ) -> Self {
        Self {
            fetcher: DailyCheckFetcher::new(api, schema),
            references,
            dashboard,
        }
    }

    /// Loads both dimension tables. Either one being unavailable or malformed
    /// leaves nothing to extract against, so that is an error.
    pub async fn load(api: Arc<dyn WorkspaceApi>, settings: ExtractSettings) -> Result<Self> {
        let query = RemoteQuery::new(Arc::clone(&api));

        let reference_table = query
            .query(&settings.reference_collection_id)
            .await
            .with_context(|| {
                format!(
                    "Reference collection {} is unavailable",
                    settings.reference_collection_id
                )
            })?;
        let references = project_references(&reference_table, &settings.schema)
            .context("Failed to load reference table")?;
        info!(rows = references.len(), "reference table loaded");

        let dashboard_table = query
            .query(&settings.dashboard_collection_id)
            .await
            .with_context(|| {
                format!(
                    "Dashboard collection {} is unavailable",
                    settings.dashboard_collection_id
                )
            })?;
        if dashboard_table.is_empty() {
            warn!(
                collection_id = %settings.dashboard_collection_id,
                "dashboard collection is empty; nothing to extract"
            );
        }
        let dashboard =
            project_dashboard(&dashboard_table).context("Failed to load dashboard table")?;
        info!(rows = dashboard.len(), "dashboard table loaded");

        Ok(Self::new(api, settings.schema, references, dashboard))
    }

    pub fn references(&self) -> &[ReferenceRecord] {
        &self.references
    }

    pub async fn extract_everything(&self, workers: usize) -> JoinedTable {
        self.extract_all(&self.dashboard, workers).await
    }

    /// Fetches every page's daily checks with at most `workers` requests in
    /// flight. Results are concatenated in `dashboard` order whatever order
    /// the fetches finish in.
    pub async fn extract_all(&self, dashboard: &[DashboardRecord], workers: usize) -> JoinedTable {
        let workers = workers.clamp(1, MAX_WORKERS);
        let total = dashboard.len();
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();

        info!(pages = total, workers, "fetching daily checks");

        for (index, parent) in dashboard.iter().cloned().enumerate() {
            let fetcher = self.fetcher.clone();
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, fetcher.fetch(&parent).await)
            });
        }

        let mut slots: Vec<Option<Vec<DailyCheckRecord>>> = vec![None; total];
        let mut finished = 0_usize;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, records)) => {
                    finished += 1;
                    debug!(finished, total, "daily check page done");
                    slots[index] = records;
                }
                Err(join_error) => {
                    error!(error = %join_error, "daily check worker task failed");
                }
            }
        }

        let failed_parents = slots.iter().filter(|slot| slot.is_none()).count();
        let checks = slots.into_iter().flatten().flatten().collect::<Vec<_>>();
        let fetched = checks.len();

        let outcome = join::inner_join(checks, &self.references);
        if !outcome.dropped.is_empty() {
            let unmatched = outcome
                .dropped
                .iter()
                .map(|check| check.ref_id.as_str())
                .collect::<HashSet<_>>();
            warn!(
                dropped = outcome.dropped.len(),
                unmatched_ref_ids = ?unmatched,
                "daily checks without a matching reference were dropped"
            );
        }

        info!(
            pages = total,
            failed = failed_parents,
            fetched,
            rows = outcome.rows.len(),
            "extraction finished"
        );

        JoinedTable {
            rows: outcome.rows,
            parents: total,
            failed_parents,
            fetched,
            dropped: outcome.dropped.len(),
        }
    }
}

fn project_references(
    table: &Table,
    schema: &PropertySchema,
) -> Result<Vec<ReferenceRecord>, ExtractionError> {
    let records = table
        .rows()
        .iter()
        .map(|row| ReferenceRecord::from_row(row, schema))
        .collect::<Result<Vec<_>, _>>()?;

    ensure_unique("reference", records.iter().map(|record| record.id.as_str()))?;
    Ok(records)
}

fn project_dashboard(table: &Table) -> Result<Vec<DashboardRecord>, ExtractionError> {
    let records = table
        .rows()
        .iter()
        .map(DashboardRecord::from_row)
        .collect::<Result<Vec<_>, _>>()?;

    ensure_unique("dashboard", records.iter().map(|record| record.id.as_str()))?;
    Ok(records)
}

fn ensure_unique<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), ExtractionError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ExtractionError::DuplicateId {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::records::{DashboardRecord, ExtractionError, PropertySchema};
    use super::{DailyCheckFetcher, ExtractSettings, Extractor, RemoteQuery};
    use crate::notion::{ApiError, WorkspaceApi};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeWorkspace {
        collections: HashMap<String, Vec<Value>>,
        children: HashMap<String, Vec<Value>>,
        failing_pages: Vec<String>,
        panicking_pages: Vec<String>,
        delays: HashMap<String, Duration>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl FakeWorkspace {
        fn with_collection(mut self, id: &str, results: Vec<Value>) -> Self {
            self.collections.insert(id.to_string(), results);
            self
        }

        /// Registers `page_id` with one child block whose collection holds `rows`.
        fn with_daily_check(mut self, page_id: &str, rows: Vec<Value>) -> Self {
            let child_id = format!("{page_id}-checks");
            self.children.insert(
                page_id.to_string(),
                vec![json!({ "id": child_id, "type": "child_database" })],
            );
            self.collections.insert(child_id, rows);
            self
        }

        fn with_delay(mut self, page_id: &str, millis: u64) -> Self {
            self.delays
                .insert(page_id.to_string(), Duration::from_millis(millis));
            self
        }
    }

    #[async_trait]
    impl WorkspaceApi for FakeWorkspace {
        async fn query_collection(&self, collection_id: &str) -> Result<Vec<Value>, ApiError> {
            self.collections
                .get(collection_id)
                .cloned()
                .ok_or_else(|| ApiError::Status {
                    status: 404,
                    body: json!({ "code": "object_not_found" }).to_string(),
                })
        }

        async fn list_children(&self, block_id: &str) -> Result<Vec<Value>, ApiError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(block_id) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panicking_pages.iter().any(|page| page == block_id) {
                panic!("children listing for {block_id} blew up");
            }

            if self.failing_pages.iter().any(|page| page == block_id) {
                return Err(ApiError::Status {
                    status: 502,
                    body: "connection reset".to_string(),
                });
            }

            Ok(self.children.get(block_id).cloned().unwrap_or_default())
        }
    }

    fn reference_page(id: &str, name: &str, category: &str, difficulty: u8) -> Value {
        json!({
            "object": "page",
            "id": id,
            "properties": {
                "Productions": {
                    "type": "title",
                    "title": [{ "text": { "content": name }, "plain_text": name }]
                },
                "P_PC": { "type": "select", "select": { "name": category } },
                "difficulty1-5": { "type": "number", "number": difficulty }
            }
        })
    }

    fn dashboard_page(id: &str, created_time: &str) -> Value {
        json!({ "object": "page", "id": id, "created_time": created_time })
    }

    fn check_row(ref_id: &str, checked: bool) -> Value {
        json!({
            "object": "page",
            "properties": {
                "Activity": { "type": "relation", "relation": [{ "id": ref_id }] },
                "Yes": { "type": "checkbox", "checkbox": checked }
            }
        })
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn parent(id: &str, day: u32) -> DashboardRecord {
        DashboardRecord {
            id: id.to_string(),
            created_time: at(day),
        }
    }

    fn settings() -> ExtractSettings {
        ExtractSettings {
            reference_collection_id: "ref-db".to_string(),
            dashboard_collection_id: "dash-db".to_string(),
            schema: PropertySchema::default(),
        }
    }

    #[tokio::test]
    async fn end_to_end_single_page_joins_reference_fields() {
        let api = FakeWorkspace::default()
            .with_collection("ref-db", vec![reference_page("r1", "Run", "PC", 3)])
            .with_collection(
                "dash-db",
                vec![dashboard_page("d1", "2024-01-01T00:00:00Z")],
            )
            .with_daily_check("d1", vec![check_row("r1", true)]);

        let extractor = Extractor::load(Arc::new(api), settings())
            .await
            .expect("extractor loads");
        let table = extractor.extract_everything(4).await;

        assert_eq!(table.rows.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.created_time, at(1));
        assert_eq!(row.ref_id, "r1");
        assert!(row.completed);
        assert_eq!(row.id, "r1");
        assert_eq!(row.activity, "Run");
        assert_eq!(row.category.as_deref(), Some("PC"));
        assert_eq!(row.difficulty, Some(3.0));
    }

    #[tokio::test]
    async fn failing_page_contributes_nothing_and_batch_completes() {
        let mut api = FakeWorkspace::default()
            .with_daily_check("d1", vec![check_row("r1", true)])
            .with_daily_check("d3", vec![check_row("r1", false)]);
        api.failing_pages.push("d2".to_string());

        let extractor = Extractor::new(
            Arc::new(api),
            PropertySchema::default(),
            vec![run_reference()],
            Vec::new(),
        );

        let table = extractor
            .extract_all(&[parent("d1", 1), parent("d2", 2), parent("d3", 3)], 2)
            .await;

        assert_eq!(table.parents, 3);
        assert_eq!(table.failed_parents, 1);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows.iter().all(|row| row.created_time != at(2)));
    }

    fn run_reference() -> super::records::ReferenceRecord {
        super::records::ReferenceRecord {
            id: "r1".to_string(),
            activity: "Run".to_string(),
            category: None,
            difficulty: None,
        }
    }

    #[tokio::test]
    async fn panicked_task_counts_as_failed_page_and_others_keep_order() {
        let mut api = FakeWorkspace::default()
            .with_daily_check("d1", vec![check_row("r1", true)])
            .with_daily_check("d3", vec![check_row("r1", false)])
            .with_delay("d1", 30);
        api.panicking_pages.push("d2".to_string());

        let extractor = Extractor::new(
            Arc::new(api),
            PropertySchema::default(),
            vec![run_reference()],
            Vec::new(),
        );

        let table = extractor
            .extract_all(&[parent("d1", 1), parent("d2", 2), parent("d3", 3)], 3)
            .await;

        assert_eq!(table.parents, 3);
        assert_eq!(table.failed_parents, 1);
        let days = table
            .rows
            .iter()
            .map(|row| (row.created_time, row.completed))
            .collect::<Vec<_>>();
        assert_eq!(days, vec![(at(1), true), (at(3), false)]);
    }

    #[tokio::test]
    async fn zero_workers_still_drains_the_pool() {
        let api = FakeWorkspace::default()
            .with_daily_check("d1", vec![check_row("r1", true)])
            .with_daily_check("d2", vec![check_row("r1", true)]);
        let api = Arc::new(api);
        let extractor = Extractor::new(
            api.clone(),
            PropertySchema::default(),
            vec![run_reference()],
            Vec::new(),
        );

        let table = tokio::time::timeout(
            Duration::from_secs(3),
            extractor.extract_all(&[parent("d1", 1), parent("d2", 2)], 0),
        )
        .await
        .expect("zero workers is clamped to one permit");

        assert_eq!(table.rows.len(), 2);
        assert_eq!(api.peak_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn output_follows_submission_order_not_completion_order() {
        let api = FakeWorkspace::default()
            .with_daily_check("d1", vec![check_row("r1", true), check_row("r2", false)])
            .with_daily_check("d2", vec![check_row("r2", true)])
            .with_daily_check("d3", vec![check_row("r1", false)])
            .with_delay("d1", 80)
            .with_delay("d2", 40);

        let references = ["r1", "r2"]
            .iter()
            .map(|id| super::records::ReferenceRecord {
                id: id.to_string(),
                activity: id.to_uppercase(),
                category: None,
                difficulty: None,
            })
            .collect();
        let extractor = Extractor::new(
            Arc::new(api),
            PropertySchema::default(),
            references,
            Vec::new(),
        );

        let table = extractor
            .extract_all(&[parent("d1", 1), parent("d2", 2), parent("d3", 3)], 3)
            .await;

        let order = table
            .rows
            .iter()
            .map(|row| (row.created_time, row.ref_id.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![(at(1), "r1"), (at(1), "r2"), (at(2), "r2"), (at(3), "r1")]
        );
    }

    #[tokio::test]
    async fn unmatched_reference_is_dropped_and_counted() {
        let api = FakeWorkspace::default()
            .with_collection("ref-db", vec![reference_page("r1", "Run", "PC", 3)])
            .with_collection(
                "dash-db",
                vec![
                    dashboard_page("d1", "2024-01-01T00:00:00Z"),
                    dashboard_page("d2", "2024-01-02T00:00:00Z"),
                ],
            )
            .with_daily_check("d1", vec![check_row("r1", true)])
            .with_daily_check("d2", vec![check_row("bogus", true)]);

        let extractor = Extractor::load(Arc::new(api), settings())
            .await
            .expect("extractor loads");
        let table = extractor.extract_everything(2).await;

        assert_eq!(table.fetched, 2);
        assert_eq!(table.dropped, 1);
        assert_eq!(table.rows.len(), 1);
        assert!(table.rows.iter().all(|row| row.ref_id != "bogus"));
        assert!(
            table
                .rows
                .iter()
                .all(|row| extractor.references().iter().any(|r| r.id == row.ref_id))
        );
    }

    #[tokio::test]
    async fn pool_width_bounds_outstanding_requests() {
        let mut api = FakeWorkspace::default();
        let mut parents = Vec::new();
        for day in 1..=6 {
            let id = format!("d{day}");
            api = api
                .with_daily_check(&id, vec![check_row("r1", true)])
                .with_delay(&id, 20);
            parents.push(parent(&id, day));
        }
        let api = Arc::new(api);

        let extractor = Extractor::new(
            api.clone(),
            PropertySchema::default(),
            Vec::new(),
            Vec::new(),
        );
        let table = extractor.extract_all(&parents, 2).await;

        assert_eq!(table.fetched, 6);
        assert!(api.peak_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn repeated_extraction_is_identical() {
        let api = FakeWorkspace::default()
            .with_collection(
                "ref-db",
                vec![reference_page("r1", "Run", "PC", 3), reference_page("r2", "Read", "Book", 1)],
            )
            .with_collection(
                "dash-db",
                vec![
                    dashboard_page("d1", "2024-01-01T00:00:00Z"),
                    dashboard_page("d2", "2024-01-02T00:00:00Z"),
                ],
            )
            .with_daily_check("d1", vec![check_row("r1", true), check_row("r2", false)])
            .with_daily_check("d2", vec![check_row("r2", true)])
            .with_delay("d1", 10);

        let extractor = Extractor::load(Arc::new(api), settings())
            .await
            .expect("extractor loads");

        let first = extractor.extract_everything(4).await;
        let second = extractor.extract_everything(4).await;

        assert_eq!(first.rows, second.rows);
    }

    #[tokio::test]
    async fn fetcher_yields_nothing_for_malformed_pages() {
        let mut api = FakeWorkspace::default()
            .with_daily_check(
                "no-relation",
                vec![json!({ "properties": { "Yes": { "checkbox": true } } })],
            )
            .with_daily_check("ok", vec![check_row("r1", true), check_row("r2", false)]);
        api.children.insert("no-children".to_string(), Vec::new());
        api.children
            .insert("dangling".to_string(), vec![json!({ "id": "nowhere" })]);
        let fetcher = DailyCheckFetcher::new(Arc::new(api), PropertySchema::default());

        assert!(fetcher.fetch(&parent("no-children", 1)).await.is_none());
        assert!(fetcher.fetch(&parent("no-relation", 1)).await.is_none());
        assert!(fetcher.fetch(&parent("dangling", 1)).await.is_none());
        assert_eq!(
            fetcher.fetch(&parent("ok", 1)).await.map(|records| records.len()),
            Some(2)
        );

        assert!(matches!(
            fetcher.try_fetch(&parent("no-children", 1)).await,
            Err(ExtractionError::NoChildBlocks)
        ));
        assert!(matches!(
            fetcher.try_fetch(&parent("dangling", 1)).await,
            Err(ExtractionError::Unavailable(id)) if id == "nowhere"
        ));
    }

    #[tokio::test]
    async fn remote_query_flattens_rows_and_reports_unavailable() {
        let api = FakeWorkspace::default().with_collection(
            "ref-db",
            vec![reference_page("r1", "Run", "PC", 3), reference_page("r2", "Read", "Book", 1)],
        );
        let query = RemoteQuery::new(Arc::new(api));

        let table = query.query("ref-db").await.expect("collection available");
        assert_eq!(table.len(), 2);
        assert!(
            table
                .columns()
                .iter()
                .any(|column| column == "properties.P_PC.select.name")
        );

        assert!(query.query("missing").await.is_none());
    }

    #[tokio::test]
    async fn load_fails_when_dimension_tables_are_unusable() {
        let unavailable = FakeWorkspace::default()
            .with_collection("dash-db", vec![dashboard_page("d1", "2024-01-01T00:00:00Z")]);
        assert!(Extractor::load(Arc::new(unavailable), settings()).await.is_err());

        let duplicated = FakeWorkspace::default()
            .with_collection(
                "ref-db",
                vec![reference_page("r1", "Run", "PC", 3), reference_page("r1", "Run", "PC", 3)],
            )
            .with_collection("dash-db", Vec::new());
        let error = Extractor::load(Arc::new(duplicated), settings())
            .await
            .err()
            .expect("duplicate ids rejected");
        assert!(format!("{error:#}").contains("duplicate reference id r1"));
    }
}
