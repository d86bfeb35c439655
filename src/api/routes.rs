use crate::analyzer::report::{self, ROLLING_WINDOW};
use crate::config::Config;
use crate::db::{Database, ExtractionRunRow};
use crate::extract::records::JoinedActivityRow;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/rows", get(rows))
        .route("/api/v1/analysis", get(analysis))
        .route("/api/v1/analysis/heatmap", get(analysis_heatmap))
        .route("/api/v1/analysis/trend", get(analysis_trend))
        .route("/api/v1/analysis/weekly", get(analysis_weekly))
        .route("/api/v1/analysis/markdown", get(analysis_markdown))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RowsQuery {
    activity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrendQuery {
    window: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    rows: i64,
    latest_run: Option<ExtractionRunRow>,
    api_port: u16,
}

#[derive(Debug, Serialize)]
struct RowView {
    created_time: DateTime<Utc>,
    day_of_week: &'static str,
    ref_id: String,
    completed: bool,
    id: String,
    activity: String,
    category: Option<String>,
    difficulty: Option<f64>,
}

impl From<JoinedActivityRow> for RowView {
    fn from(row: JoinedActivityRow) -> Self {
        Self {
            day_of_week: report::day_of_week(&row),
            created_time: row.created_time,
            ref_id: row.ref_id,
            completed: row.completed,
            id: row.id,
            activity: row.activity,
            category: row.category,
            difficulty: row.difficulty,
        }
    }
}

#[derive(Debug, Serialize)]
struct RowsPayload {
    count: usize,
    rows: Vec<RowView>,
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusPayload>> {
    let database = Database::open(&state.config.db_path)?;

    Ok(Json(StatusPayload {
        rows: database.activity_row_count()?,
        latest_run: database.latest_run()?,
        api_port: state.config.api_port,
    }))
}

async fn rows(
    State(state): State<ApiState>,
    Query(query): Query<RowsQuery>,
) -> ApiResult<Json<RowsPayload>> {
    let database = Database::open(&state.config.db_path)?;
    let records = match query.activity.as_deref().map(str::trim) {
        Some(activity) if !activity.is_empty() => database.activity_rows_for(activity)?,
        _ => database.activity_rows()?,
    };

    let rows = records.into_iter().map(RowView::from).collect::<Vec<_>>();

    Ok(Json(RowsPayload {
        count: rows.len(),
        rows,
    }))
}

async fn analysis(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let rows = load_rows(&state)?;
    let analysis = report::build_analysis(Local::now().date_naive(), &rows);

    Ok(Json(serde_json::to_value(analysis).map_err(anyhow::Error::from)?))
}

async fn analysis_heatmap(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let rows = load_rows(&state)?;

    Ok(Json(json!({ "heatmap": report::build_heatmap(&rows) })))
}

async fn analysis_trend(
    State(state): State<ApiState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<Json<Value>> {
    let window = query.window.unwrap_or(ROLLING_WINDOW);
    if window == 0 || window > 90 {
        return Err(ApiError::BadRequest(
            "window must be between 1 and 90".to_string(),
        ));
    }

    let rows = load_rows(&state)?;

    Ok(Json(json!({
        "window": window,
        "points": report::build_daily_trend(&rows, window)
    })))
}

async fn analysis_weekly(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let rows = load_rows(&state)?;

    Ok(Json(json!({ "series": report::build_weekly_rates(&rows) })))
}

async fn analysis_markdown(State(state): State<ApiState>) -> ApiResult<Response> {
    let rows = load_rows(&state)?;
    let analysis = report::build_analysis(Local::now().date_naive(), &rows);

    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/markdown; charset=utf-8"),
        )],
        report::render_markdown(&analysis),
    )
        .into_response())
}

fn load_rows(state: &ApiState) -> ApiResult<Vec<JoinedActivityRow>> {
    let database = Database::open(&state.config.db_path)?;
    let rows = database.activity_rows()?;

    if rows.is_empty() {
        return Err(ApiError::NotFound(
            "No activity rows stored yet. Run `HabitLens extract` first.".to_string(),
        ));
    }

    Ok(rows)
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response(),
        }
    }
}
