//! Copy, delete, list and metadata routes.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use stash_blob::{CancellationToken, CopyOptions, DeleteOutcome, DeleteTarget, ListMode, ListOptions, ListPage, StoredObjectDescriptor};
use stash_core::StashError;

use crate::form::FormFields;
use crate::{ApiError, StashState};

pub const METADATA_CACHE_CONTROL: &str = "public, max-age=0, s-maxage=600, stale-while-revalidate=3600";
pub const METADATA_CDN_CACHE_CONTROL: &str = "public, max-age=600, stale-while-revalidate=3600";

fn bad_query(state: &StashState, rejection: QueryRejection) -> ApiError {
    state.error(StashError::bad_request(format!("Invalid query: {}", rejection.body_text())))
}

/// `PUT /api/copy`
pub async fn copy(State(state): State<StashState>, fields: FormFields) -> Result<Json<StoredObjectDescriptor>, ApiError> {
    let (Some(from_url), Some(to_pathname)) = (fields.get("fromUrl"), fields.get("toPathname")) else {
        return Err(state.error(StashError::bad_request(
            "Missing required parameters: fromUrl and toPathname are required",
        )));
    };

    let mut options = CopyOptions::new();
    if let Some(content_type) = fields.get("contentType") {
        options = options.with_content_type(content_type);
    }
    if fields
        .get_bool("addRandomSuffix")
        .map_err(|e| e.with_details(state.development))?
        .unwrap_or(false)
    {
        options = options.with_random_suffix();
    }
    if let Some(max_age) = fields.get_u64("cacheControlMaxAge").map_err(|e| e.with_details(state.development))? {
        options = options.with_cache_control_max_age(max_age);
    }

    let blob = state
        .client
        .copy(from_url, to_pathname, &options, &CancellationToken::new())
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(blob))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub url: Option<String>,
    pub urls: Option<String>,
}

/// `DELETE /api/delete?url=…` or `?urls=["…","…"]`
pub async fn delete(
    State(state): State<StashState>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    let Query(query) = query.map_err(|e| bad_query(&state, e))?;
    let target = DeleteTarget::from_params(query.url.as_deref(), query.urls.as_deref()).map_err(|e| state.error(e))?;

    let outcome = state
        .client
        .delete(target, &CancellationToken::new())
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
    pub prefix: Option<String>,
    pub cursor: Option<String>,
    pub mode: Option<String>,
}

impl ListQuery {
    fn into_options(self) -> Result<ListOptions, StashError> {
        let mut options = ListOptions::new();
        if let Some(limit) = self.limit.filter(|l| !l.is_empty()) {
            match limit.parse::<usize>() {
                Ok(limit) if limit > 0 => options = options.with_limit(limit),
                _ => return Err(StashError::bad_request("limit must be a positive integer")),
            }
        }
        if let Some(prefix) = self.prefix.filter(|p| !p.is_empty()) {
            options = options.with_prefix(prefix);
        }
        if let Some(cursor) = self.cursor.filter(|c| !c.is_empty()) {
            options = options.with_cursor(cursor);
        }
        if let Some(mode) = self.mode.filter(|m| !m.is_empty()) {
            options.mode = mode.parse::<ListMode>()?;
        }
        Ok(options)
    }
}

/// `GET /api/list`
pub async fn list(
    State(state): State<StashState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListPage>, ApiError> {
    let Query(query) = query.map_err(|e| bad_query(&state, e))?;
    let options = query.into_options().map_err(|e| state.error(e))?;

    let page = state
        .client
        .list(&options, &CancellationToken::new())
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub url: Option<String>,
}

/// `GET /api/metadata?url=…`
pub async fn metadata(
    State(state): State<StashState>,
    query: Result<Query<MetadataQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| bad_query(&state, e))?;
    let url = query.url.unwrap_or_default();

    let blob = state
        .client
        .head(&url, &CancellationToken::new())
        .await
        .map_err(|e| state.error(e))?;

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static(METADATA_CACHE_CONTROL)),
        (HeaderName::from_static("cdn-cache-control"), HeaderValue::from_static(METADATA_CDN_CACHE_CONTROL)),
    ];
    Ok((headers, Json(blob)).into_response())
}
