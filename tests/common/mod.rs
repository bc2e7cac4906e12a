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

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use powerplant_api::client::{Credentials, HistorianClient};
use powerplant_api::metrics::ServiceMetrics;
use prometheus_client::registry::Registry;
use serde_json::{json, Map, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DB_NAME: &str = "db102";
pub const USERNAME: &str = "user1";
pub const PASSWORD: &str = "secret";

/// In-memory stand-in for the plant historian API.
#[derive(Clone, Debug, Default)]
pub struct MockHistorian {
    logins: Arc<AtomicUsize>,
    token: Arc<Mutex<Option<String>>>,
    realtime: Arc<Mutex<Map<String, Value>>>,
    history: Arc<Mutex<Option<Vec<Value>>>>,
    history_requests: Arc<Mutex<Vec<Value>>>,
}

impl MockHistorian {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn set_realtime(&self, values: Value) {
        *self.realtime.lock().unwrap() = values.as_object().cloned().unwrap_or_default();
    }

    /// Set the `data` array returned for history requests, `None` to omit it.
    pub fn set_history(&self, points: Option<Vec<Value>>) {
        *self.history.lock().unwrap() = points;
    }

    pub fn history_requests(&self) -> Vec<Value> {
        self.history_requests.lock().unwrap().clone()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let token = self.token.lock().unwrap();
        match (headers.get("token").and_then(|v| v.to_str().ok()), token.as_deref()) {
            (Some(given), Some(issued)) => given == issued,
            _ => false,
        }
    }

    /// Serve the mock on an ephemeral local port and return its base URL.
    pub fn start(&self) -> String {
        let app = Router::new()
            .route("/v1/login", post(login))
            .route("/v1/getRealtimeValue", post(realtime))
            .route("/v1/getHisResampleValue", post(history))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());
        tokio::spawn(server);

        format!("http://{}", addr)
    }
}

async fn login(State(mock): State<MockHistorian>, Json(body): Json<Value>) -> Response {
    let n = mock.logins.fetch_add(1, Ordering::SeqCst) + 1;
    if body["dbName"] != DB_NAME || body["userName"] != USERNAME || body["password"] != PASSWORD {
        return (StatusCode::UNAUTHORIZED, Json(json!({"msg": "invalid credentials"}))).into_response();
    }

    let token = format!("token-{}", n);
    *mock.token.lock().unwrap() = Some(token.clone());
    Json(json!({ "token": token })).into_response()
}

async fn realtime(State(mock): State<MockHistorian>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let values = mock.realtime.lock().unwrap().clone();
    let data: Vec<Value> = body["tagNames"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|tag| {
            let mut item = Map::new();
            item.insert(tag.to_owned(), values.get(tag)?.clone());
            Some(Value::Object(item))
        })
        .collect();

    Json(json!({ "data": data })).into_response()
}

async fn history(State(mock): State<MockHistorian>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    mock.history_requests.lock().unwrap().push(body);
    match mock.history.lock().unwrap().clone() {
        Some(points) => Json(json!({ "data": points })).into_response(),
        None => Json(json!({})).into_response(),
    }
}

pub fn credentials(password: &str) -> Credentials {
    Credentials {
        db_name: DB_NAME.to_owned(),
        username: USERNAME.to_owned(),
        password: password.to_owned(),
    }
}

/// Historian client for `base_url` with its own metrics registry.
pub fn historian_client(base_url: &str, password: &str) -> (HistorianClient, ServiceMetrics, Registry) {
    let mut registry = Registry::default();
    let metrics = ServiceMetrics::new(&mut registry);
    let client = HistorianClient::new(reqwest::Client::new(), base_url, credentials(password), metrics.clone()).unwrap();
    (client, metrics, registry)
}

/// Base URL of a local port with nothing listening on it.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
