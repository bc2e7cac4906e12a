// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::document::{DocumentRenderer, Format, RenderOptions};
use crate::matcher;
use crate::metrics::ServiceMetrics;
use crate::service::{DataService, Series, ServiceError, DEFAULT_DATA_NUM, DEFAULT_DAYS};
use crate::tags::{tag_map, TagDictionary, TagMap, HCFX_TAGS, LOSS_TAGS, XNJS_TAGS};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Characters left as-is in the RFC 5987 `filename*` parameter.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

/// Shared state for every request handled by the API.
#[derive(Debug)]
pub struct RequestContext {
    service: DataService,
    dictionary: Arc<TagDictionary>,
    renderer: DocumentRenderer,
    metrics: ServiceMetrics,
    registry: Registry,
    hcfx: TagMap,
    loss: TagMap,
    xnjs: TagMap,
}

impl RequestContext {
    pub fn new(
        service: DataService,
        dictionary: Arc<TagDictionary>,
        renderer: DocumentRenderer,
        metrics: ServiceMetrics,
        registry: Registry,
    ) -> Self {
        RequestContext {
            service,
            dictionary,
            renderer,
            metrics,
            registry,
            hcfx: tag_map(HCFX_TAGS),
            loss: tag_map(LOSS_TAGS),
            xnjs: tag_map(XNJS_TAGS),
        }
    }
}

/// Error returned by a handler, rendered as a JSON body with the matching status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    NotImplemented(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response(),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response(),
            Self::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, Json(json!({ "message": msg }))).into_response(),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(msg) => ApiError::BadRequest(msg),
            ServiceError::Store(e) => {
                tracing::error!(message = "store operation failed", error = %e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

/// Build the router for every API route, `/health`, and `/metrics`.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/api/hcfx/mock", get(hcfx_mock))
        .route("/api/hcfx/real", get(hcfx_real))
        .route("/api/hcfx/top1", get(hcfx_top1))
        .route("/api/hcfx/history", post(hcfx_history))
        .route("/api/loss/real", get(loss_real))
        .route("/api/xnjs/real", get(xnjs_real))
        .route("/api/common/real", post(common_real))
        .route("/api/common/getReason", get(common_reason))
        .route("/api/common/getTagNames", post(common_tag_names))
        .route("/api/database/query", post(database_query))
        .route("/api/generate/word", post(generate_word))
        .route("/api/generate/pdf", post(generate_pdf))
        .route("/health", get(health))
        .route("/metrics", get(text_metrics))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

type ApiResult<T> = Result<T, ApiError>;

async fn hcfx_mock(State(context): State<Arc<RequestContext>>) -> ApiResult<Json<Value>> {
    match context.service.latest_stored_record().await? {
        Some(record) => Ok(Json(Value::Object(record))),
        None => Err(ApiError::NotFound("No record found".to_owned())),
    }
}

async fn hcfx_real(State(context): State<Arc<RequestContext>>) -> Json<BTreeMap<String, Option<f64>>> {
    Json(context.service.realtime_by_tag_map(&context.hcfx).await)
}

async fn hcfx_top1(State(context): State<Arc<RequestContext>>) -> ApiResult<Json<BTreeMap<String, f64>>> {
    let max = context.service.max_value(&context.hcfx).await;
    if max.is_empty() {
        return Err(ApiError::NotFound("No data found".to_owned()));
    }

    Ok(Json(max))
}

async fn loss_real(State(context): State<Arc<RequestContext>>) -> Json<BTreeMap<String, Option<f64>>> {
    Json(context.service.realtime_by_tag_map(&context.loss).await)
}

async fn xnjs_real(State(context): State<Arc<RequestContext>>) -> Json<BTreeMap<String, Option<f64>>> {
    Json(context.service.realtime_by_tag_map(&context.xnjs).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest {
    tag_name: Option<String>,
    days: Option<Value>,
}

async fn hcfx_history(
    State(context): State<Arc<RequestContext>>,
    body: Result<Json<HistoryRequest>, JsonRejection>,
) -> ApiResult<Json<Series>> {
    let Json(req) = body?;
    let tag = required(req.tag_name).ok_or_else(|| ApiError::BadRequest("tagName is required".to_owned()))?;
    let days = integer(req.days.as_ref(), "days")?.unwrap_or(DEFAULT_DAYS);

    non_empty(context.service.history_by_days(&tag, days).await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommonHistoryRequest {
    tag_name: Option<String>,
    end_time_str: Option<String>,
    time_span: Option<Value>,
    data_num: Option<Value>,
}

async fn common_real(
    State(context): State<Arc<RequestContext>>,
    body: Result<Json<CommonHistoryRequest>, JsonRejection>,
) -> ApiResult<Json<Series>> {
    let Json(req) = body?;
    let (tag, end_time) = match (required(req.tag_name), required(req.end_time_str)) {
        (Some(tag), Some(end_time)) => (tag, end_time),
        _ => return Err(ApiError::BadRequest("tagName and endTimeStr are required".to_owned())),
    };

    let time_span = integer(req.time_span.as_ref(), "timeSpan")?
        .ok_or_else(|| ApiError::BadRequest("timeSpan is required".to_owned()))?;
    let data_num = integer(req.data_num.as_ref(), "dataNum")?.unwrap_or(DEFAULT_DATA_NUM);

    non_empty(
        context
            .service
            .common_history(&tag, &end_time, time_span, data_num)
            .await?,
    )
}

async fn common_reason() -> ApiError {
    ApiError::NotImplemented("This endpoint is not implemented yet".to_owned())
}

#[derive(Debug, Deserialize)]
struct TagNamesRequest {
    keywords: Option<String>,
}

async fn common_tag_names(
    State(context): State<Arc<RequestContext>>,
    body: Result<Json<TagNamesRequest>, JsonRejection>,
) -> ApiResult<Json<TagMap>> {
    let Json(req) = body?;
    let keywords = required(req.keywords).ok_or_else(|| ApiError::BadRequest("keywords is required".to_owned()))?;

    Ok(Json(matcher::search(
        &context.dictionary,
        &keywords,
        matcher::DEFAULT_THRESHOLD,
    )))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    sql: Option<String>,
}

async fn database_query(
    State(context): State<Arc<RequestContext>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    let sql = required(req.sql).ok_or_else(|| ApiError::BadRequest("SQL query is required".to_owned()))?;
    let rows = context.service.execute_raw_query(&sql).await?;

    Ok(Json(Value::Array(rows.into_iter().map(Value::Object).collect())))
}

#[derive(Debug, Deserialize)]
struct DocumentRequest {
    content: Option<String>,
    options: Option<RenderOptions>,
    filename: Option<String>,
}

async fn generate_word(
    State(context): State<Arc<RequestContext>>,
    body: Result<Json<DocumentRequest>, JsonRejection>,
) -> ApiResult<Response> {
    generate(context, Format::Word, body?.0).await
}

async fn generate_pdf(
    State(context): State<Arc<RequestContext>>,
    body: Result<Json<DocumentRequest>, JsonRejection>,
) -> ApiResult<Response> {
    generate(context, Format::Pdf, body?.0).await
}

async fn generate(context: Arc<RequestContext>, format: Format, req: DocumentRequest) -> ApiResult<Response> {
    let renderer = context.renderer.clone();
    let content = req.content.unwrap_or_default();
    let options = req.options.unwrap_or_default();

    let bytes = tokio::task::spawn_blocking(move || renderer.render(format, &content, &options))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| {
            tracing::error!(message = "failed to render document", format = ?format, error = %e);
            ApiError::Internal(e.to_string())
        })?;

    context.metrics.document_rendered(format);
    tracing::debug!(message = "rendered document", format = ?format, num_bytes = bytes.len());

    let filename = required(req.filename).unwrap_or_else(|| format.default_filename().to_owned());
    Ok((
        [
            (CONTENT_TYPE, format.content_type().to_owned()),
            (CONTENT_DISPOSITION, content_disposition(&filename)),
        ],
        bytes,
    )
        .into_response())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_owned())
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Treat an empty string the same as a missing one.
fn required(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn non_empty(series: Series) -> ApiResult<Json<Series>> {
    if series.is_empty() {
        return Err(ApiError::NotFound("No data found for the given tag name".to_owned()));
    }

    Ok(Json(series))
}

/// Integer request field that clients may send as a JSON number or a numeric string.
/// Fractional numbers are truncated toward zero.
fn integer(v: Option<&Value>, name: &str) -> ApiResult<Option<i64>> {
    let invalid = || ApiError::BadRequest(format!("{} must be an integer", name));

    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// `Content-Disposition` for a download named `filename`, with an ASCII fallback for
/// clients that do not understand the RFC 5987 form.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, FILENAME_ENCODE_SET)
    )
}
