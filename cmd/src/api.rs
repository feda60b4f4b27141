// Copyright 2022 Zinc Labs Inc. and Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use promagg::{AggregationStore, Format, Label};
use serde::Serialize;

use crate::{auth::Accounts, metrics::Metrics, metrics::OPENMETRICS_CONTENT_TYPE};

pub const ERR_ODD_LABEL_PARTS: &str = "labels must be defined in pairs";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AggregationStore>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(store: Arc<AggregationStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiRouterConfig {
    /// `Access-Control-Allow-Origin` value; `*` allows every origin.
    pub cors_domain: String,
    /// Basic-auth accounts guarding the push routes; empty disables auth.
    pub accounts: Accounts,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The store rejected (part of) a push.
    Ingest(promagg::Error),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Ingest(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, format!("{message}\n")).into_response()
    }
}

impl From<promagg::Error> for ApiError {
    fn from(err: promagg::Error) -> Self {
        match err {
            promagg::Error::Encode { .. } => ApiError::Internal(err.to_string()),
            err => ApiError::Ingest(err),
        }
    }
}

/// Turns `/job/x/instance/y` into `job="x"`, `instance="y"`.
pub fn parse_path_labels(raw: &str) -> Result<Vec<Label>, ApiError> {
    let raw = raw.trim_matches('/');
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let parts = raw.split('/').collect::<Vec<_>>();
    if parts.len() % 2 != 0 {
        return Err(ApiError::BadRequest(ERR_ODD_LABEL_PARTS.to_owned()));
    }
    Ok(parts
        .chunks_exact(2)
        .map(|pair| Label::new(pair[0], pair[1]))
        .collect())
}

/// `GET /metrics`
pub async fn render(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());
    let format = Format::negotiate(accept);
    let body = state.store.render_to_vec(format)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

/// `POST|PUT /metrics[/label/value...]`
pub async fn push(
    State(state): State<AppState>,
    labels: Option<Path<String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let raw = labels.map(|Path(raw)| raw).unwrap_or_default();
    let injected = parse_path_labels(&raw).map_err(|err| {
        tracing::info!(path = %raw, "rejected push: odd label path");
        err
    })?;

    let options = state.store.options();
    let job = injected
        .iter()
        .rev()
        .find(|l| l.name == options.job_label)
        .map(|l| l.value.as_str());
    if options.metric_ttl.is_some() && job.is_none() {
        return Err(ApiError::BadRequest(format!(
            "the {:?} label is required when a metric TTL is set",
            options.job_label
        )));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let format = Format::from_content_type(content_type);
    match state.store.ingest(&body, format, &injected) {
        Ok(families) => {
            tracing::debug!(families, job = job.unwrap_or_default(), "accepted push");
            state.metrics.record_push(job.unwrap_or_default());
            Ok(StatusCode::ACCEPTED)
        }
        Err(err) => {
            tracing::info!(error = %err, job = job.unwrap_or_default(), "rejected push");
            Err(ApiError::Ingest(err))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub name: &'static str,
    pub alive: bool,
    pub version: &'static str,
}

/// `GET /healthy` and `GET /ready`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        name: env!("CARGO_PKG_NAME"),
        alive: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /metrics` on the lifecycle listener.
pub async fn self_metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.metrics.observe_store(&state.store);
    let body = state
        .metrics
        .encode()
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {e}")))?;
    Ok(([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(labels: &[Label]) -> Vec<(&str, &str)> {
        labels
            .iter()
            .map(|l| (l.name.as_str(), l.value.as_str()))
            .collect()
    }

    #[test]
    fn test_parse_path_labels() {
        assert!(parse_path_labels("").unwrap().is_empty());
        assert!(parse_path_labels("/").unwrap().is_empty());
        assert_eq!(
            pairs(&parse_path_labels("job/test").unwrap()),
            [("job", "test")]
        );
        assert_eq!(
            pairs(&parse_path_labels("/job/test/instance/host-1/").unwrap()),
            [("job", "test"), ("instance", "host-1")]
        );
    }

    #[test]
    fn test_parse_path_labels_odd() {
        let err = parse_path_labels("/job/test/instance").unwrap_err();
        assert!(matches!(&err, ApiError::BadRequest(msg) if msg == ERR_ODD_LABEL_PARTS));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_status() {
        let render = ApiError::from(promagg::Error::Encode {
            family: "x".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        });
        assert_eq!(render.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ingest = ApiError::from(promagg::Error::Parse("bad".to_owned()));
        assert_eq!(ingest.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
