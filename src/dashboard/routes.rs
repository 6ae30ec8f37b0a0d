//! HTTP handlers

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::dashboard::charts::{self, DataSeries, PALETTE};
use crate::dashboard::pages;
use crate::dashboard::runs::{self, HistogramPoint, RunSummary, ScalarPoint};
use crate::dashboard::SharedState;
use crate::training::fit::History;
use crate::utils::error::Error;

/// Handler error rendered as a status code plus message
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Dashboard(_) => StatusCode::BAD_REQUEST,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => {
                error!("Dashboard request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub log_dir: String,
}

/// GET /health
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: crate::VERSION.to_string(),
        log_dir: state.log_dir.display().to_string(),
    })
}

/// GET /runs
pub async fn list_runs(State(state): State<SharedState>) -> ApiResult<Vec<RunSummary>> {
    Ok(Json(runs::list_runs(&state.log_dir)?))
}

/// GET /runs/:run/scalars
pub async fn get_scalars(
    State(state): State<SharedState>,
    Path(run): Path<String>,
) -> ApiResult<BTreeMap<String, Vec<ScalarPoint>>> {
    Ok(Json(runs::scalars(&state.log_dir, &run)?))
}

/// GET /runs/:run/histograms
pub async fn get_histograms(
    State(state): State<SharedState>,
    Path(run): Path<String>,
) -> ApiResult<BTreeMap<String, Vec<HistogramPoint>>> {
    Ok(Json(runs::histograms(&state.log_dir, &run)?))
}

/// GET /
pub async fn index(State(state): State<SharedState>) -> Result<Html<String>, ApiError> {
    Ok(Html(pages::index_page(&runs::list_runs(&state.log_dir)?)))
}

/// GET /runs/:run
pub async fn run_overview(
    State(state): State<SharedState>,
    Path(run): Path<String>,
) -> Result<Html<String>, ApiError> {
    let scalars = runs::scalars(&state.log_dir, &run)?;
    let histogram_tags: Vec<String> = runs::histograms(&state.log_dir, &run)?.into_keys().collect();
    Ok(Html(pages::run_page(&run, &scalars, &histogram_tags)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ScalarChartQuery {
    /// Comma-separated tags; every `epoch_*` tag when absent
    pub tags: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistogramChartQuery {
    pub tag: String,
    /// Latest logged step when absent
    pub step: Option<usize>,
}

fn svg(body: String) -> Response {
    ([(header::CONTENT_TYPE, "image/svg+xml")], body).into_response()
}

/// GET /runs/:run/scalars.svg?tags=epoch_loss,epoch_val_loss
pub async fn scalars_chart(
    State(state): State<SharedState>,
    Path(run): Path<String>,
    Query(query): Query<ScalarChartQuery>,
) -> Result<Response, ApiError> {
    let series = runs::scalars(&state.log_dir, &run)?;
    let tags: Vec<String> = match &query.tags {
        Some(tags) => tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        None => series.keys().filter(|t| t.starts_with("epoch_")).cloned().collect(),
    };

    let mut lines = Vec::with_capacity(tags.len());
    for (i, tag) in tags.iter().enumerate() {
        let points = series
            .get(tag)
            .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("run {run} has no scalar {tag}")))?;
        lines.push(DataSeries::from_scalars(tag, points, PALETTE[i % PALETTE.len()]));
    }

    let y_label = match tags.as_slice() {
        [tag] => tag.as_str(),
        _ => "value",
    };
    Ok(svg(charts::line_chart(&run, "epoch", y_label, &lines)))
}

/// GET /runs/:run/histograms.svg?tag=output/kernel
pub async fn histogram_chart(
    State(state): State<SharedState>,
    Path(run): Path<String>,
    Query(query): Query<HistogramChartQuery>,
) -> Result<Response, ApiError> {
    let series = runs::histograms(&state.log_dir, &run)?;
    let points = series.get(&query.tag).map(Vec::as_slice).unwrap_or_default();

    let point = match query.step {
        Some(step) => points.iter().find(|p| p.step == step),
        None => points.iter().max_by_key(|p| p.step),
    }
    .ok_or_else(|| {
        ApiError(
            StatusCode::NOT_FOUND,
            format!("run {run} has no histogram {}", query.tag),
        )
    })?;

    let title = format!("{} (epoch {})", query.tag, point.step);
    Ok(svg(charts::histogram_chart(&title, &point.histogram)))
}

/// GET /runs/:run/history
pub async fn get_history(
    State(state): State<SharedState>,
    Path(run): Path<String>,
) -> ApiResult<History> {
    match runs::history(&state.log_dir, &run)? {
        Some(history) => Ok(Json(history)),
        None => Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("run {run} has no history yet"),
        )),
    }
}
