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
    extract::State,
    headers::{authorization::Basic, Authorization},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    TypedHeader,
};
use rustc_hash::FxHashMap;

const REALM: &str = r#"Basic realm="Authorization Required""#;

/// User name to password.
pub type Accounts = FxHashMap<String, String>;

/// Builds the accounts table from `user=password` entries. Entries that do
/// not split into exactly two parts are skipped.
pub fn process_auth_config<S: AsRef<str>>(auth_list: &[S]) -> Accounts {
    auth_list
        .iter()
        .filter_map(|item| {
            let parts = item.as_ref().split('=').collect::<Vec<_>>();
            match parts.as_slice() {
                [user, password] => Some((user.to_string(), password.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Rejects requests without valid basic-auth credentials.
pub async fn basic_auth<B>(
    State(accounts): State<Arc<Accounts>>,
    credentials: Option<TypedHeader<Authorization<Basic>>>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let authorized = credentials.map_or(false, |TypedHeader(Authorization(basic))| {
        accounts
            .get(basic.username())
            .map_or(false, |password| password == basic.password())
    });
    if !authorized {
        tracing::debug!(uri = %request.uri(), "unauthorized push");
        return (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, REALM)]).into_response();
    }
    next.run(request).await
}
