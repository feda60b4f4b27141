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
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use color_eyre::eyre::{Result, WrapErr};
use promagg::{sweep, AggregationStore};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{self, TraceLayer},
};
use tracing::Level;

use crate::{
    api::{self, ApiRouterConfig, AppState},
    auth,
    config::Cli,
    metrics::Metrics,
};

fn cors_layer(cors_domain: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::PUT]);
    if cors_domain == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(cors_domain) {
        Ok(origin) => layer.allow_origin(origin),
        Err(error) => {
            tracing::warn!(%error, cors_domain, "invalid CORS origin, no origin allowed");
            layer
        }
    }
}

/// Push and scrape routes.
pub fn api_router(state: AppState, config: &ApiRouterConfig) -> Router {
    let mut push = post(api::push).put(api::push);
    if !config.accounts.is_empty() {
        push = push.route_layer(middleware::from_fn_with_state(
            Arc::new(config.accounts.clone()),
            auth::basic_auth,
        ));
    }

    Router::new()
        .route("/metrics", get(api::render).merge(push.clone()))
        .route("/metrics/*labels", push)
        .layer(cors_layer(&config.cors_domain))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Health checks and the gateway's own metrics.
pub fn lifecycle_router(state: AppState) -> Router {
    Router::new()
        .route("/healthy", get(api::health))
        .route("/ready", get(api::health))
        .route("/metrics", get(api::self_metrics))
        .with_state(state)
}

pub async fn serve(cli: Cli) -> Result<()> {
    let store = Arc::new(AggregationStore::new(cli.store_options()));
    let metrics = Arc::new(Metrics::new());
    let state = AppState::new(Arc::clone(&store), Arc::clone(&metrics));

    let sweeper = store.options().metric_ttl.map(|ttl| {
        let interval = cli.sweep_interval();
        tracing::info!(?ttl, ?interval, "metric TTL enabled");
        let metrics = Arc::clone(&metrics);
        sweep::spawn(Arc::clone(&store), interval, move |stats| {
            metrics.sweep_evicted_metrics.inc_by(stats.metrics as u64);
        })
    });

    let api = api_router(state.clone(), &cli.api_router_config());
    let lifecycle = lifecycle_router(state);

    tracing::info!("api server listening at {}", cli.api_listen);
    let api_server = axum::Server::try_bind(&cli.api_listen)
        .wrap_err_with(|| format!("failed to bind api listener {}", cli.api_listen))?
        .serve(api.into_make_service());
    tracing::info!("lifecycle server listening at {}", cli.lifecycle_listen);
    let lifecycle_server = axum::Server::try_bind(&cli.lifecycle_listen)
        .wrap_err_with(|| format!("failed to bind lifecycle listener {}", cli.lifecycle_listen))?
        .serve(lifecycle.into_make_service());

    let result = tokio::select! {
        res = api_server => res.wrap_err("error while serving api"),
        res = lifecycle_server => res.wrap_err("error while serving lifecycle"),
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };
    if let Some(handle) = sweeper {
        handle.abort();
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
