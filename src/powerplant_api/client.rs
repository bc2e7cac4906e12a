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

use crate::metrics::ServiceMetrics;
use prometheus_client::encoding::EncodeLabelValue;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Smallest resample period the historian is asked for, in milliseconds.
pub const MIN_PERIOD_MS: i64 = 1000;

/// Resample mode understood by the historian as "mean of raw samples in each bucket".
const RESAMPLE_MODE_MEAN: u8 = 1;

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    Unexpected(StatusCode, Url),
    Decode(Url, serde_json::Error),
    MissingToken(Url),
    Auth(Box<ClientError>),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(u) => write!(f, "invalid historian URL {}", u),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Decode(url, e) => write!(f, "malformed response from {}: {}", url, e),
            Self::MissingToken(url) => write!(f, "no token in login response from {}", url),
            Self::Auth(e) => write!(f, "historian authentication failed: {}", e),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Decode(_, e) => Some(e),
            Self::Auth(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Historian API endpoints, also used to label request metrics.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    Login,
    Realtime,
    History,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Realtime => "getRealtimeValue",
            Self::History => "getHisResampleValue",
        }
    }
}

/// Database and account used to log in to the historian.
#[derive(Clone)]
pub struct Credentials {
    pub db_name: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("db_name", &self.db_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Single value of a series. `value` is `None` when the historian has no value for
/// the bucket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSeriesPoint {
    pub timestamp_ms: i64,
    pub value: Option<f64>,
}

/// Window and bucket width for a server-side resampled history query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResampleRequest {
    pub tag: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub period_ms: i64,
}

impl ResampleRequest {
    /// Request with an explicit bucket width, raised to `MIN_PERIOD_MS` if smaller.
    pub fn new<S: Into<String>>(tag: S, start_ms: i64, end_ms: i64, period_ms: i64) -> Self {
        ResampleRequest {
            tag: tag.into(),
            start_ms,
            end_ms,
            period_ms: period_ms.max(MIN_PERIOD_MS),
        }
    }

    /// Request with a bucket width chosen to return about `points` values over the window.
    pub fn with_points<S: Into<String>>(tag: S, start_ms: i64, end_ms: i64, points: u32) -> Self {
        let period = (end_ms - start_ms) / i64::from(points.max(1));
        Self::new(tag, start_ms, end_ms, period)
    }
}

#[derive(Debug)]
struct AuthToken {
    value: String,
    expires_at: Instant,
}

/// Client for the plant historian HTTP API.
///
/// The login token is cached for `TOKEN_TTL` (see `with_token_ttl`) and shared by all
/// requests made with this client. The cache lock is never held while a request is in
/// flight, so concurrent callers that observe an expired token may each log in once; the
/// last token stored wins.
#[derive(Debug)]
pub struct HistorianClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    token: Mutex<Option<AuthToken>>,
    token_ttl: Duration,
    metrics: ServiceMetrics,
}

impl HistorianClient {
    pub const TOKEN_TTL: Duration = Duration::from_secs(3600);
    const TOKEN_HEADER: &'static str = "token";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: &str, credentials: Credentials, metrics: ServiceMetrics) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(HistorianClient {
            client,
            base_url,
            credentials,
            token: Mutex::new(None),
            token_ttl: Self::TOKEN_TTL,
            metrics,
        })
    }

    /// Cache login tokens for `ttl` instead of the default hour.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Return a valid login token, logging in only when no unexpired token is cached.
    pub async fn authenticate(&self) -> Result<String, ClientError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let token = self.login().await.map_err(|e| ClientError::Auth(Box::new(e)))?;
        let mut cache = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some(AuthToken {
            value: token.clone(),
            expires_at: Instant::now() + self.token_ttl,
        });

        Ok(token)
    }

    /// Current values for a batch of tags, keyed by tag. Every requested tag is present
    /// in the result, with `None` for tags the historian did not return a number for.
    pub async fn realtime<I, S>(&self, tags: I) -> Result<BTreeMap<String, Option<f64>>, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: Vec<String> = tags.into_iter().map(|t| t.as_ref().to_owned()).collect();
        let token = self.authenticate().await?;
        let req = RealtimeRequest {
            db_name: &self.credentials.db_name,
            tag_names: tags.iter().map(String::as_str).collect(),
        };

        let res: DataResponse = self.make_request(Endpoint::Realtime, Some(&token), &req).await?;
        let mut merged = Map::new();
        for item in res.data.unwrap_or_default() {
            merged.extend(item);
        }

        Ok(tags
            .into_iter()
            .map(|tag| {
                let value = merged.get(&tag).and_then(Value::as_f64);
                (tag, value)
            })
            .collect())
    }

    /// Mean-resampled history for a single tag, ascending by timestamp. A response
    /// without data is an empty series rather than an error.
    pub async fn history(&self, req: &ResampleRequest) -> Result<Vec<TimeSeriesPoint>, ClientError> {
        let token = self.authenticate().await?;
        let body = HistoryRequest {
            db_name: &self.credentials.db_name,
            tag_name: &req.tag,
            start_ms_time: req.start_ms,
            end_ms_time: req.end_ms,
            resample_mode: RESAMPLE_MODE_MEAN,
            resample_period_ms: req.period_ms,
        };

        let res: DataResponse = self.make_request(Endpoint::History, Some(&token), &body).await?;
        let mut points = BTreeMap::new();
        for item in res.data.unwrap_or_default() {
            if let Some(ts) = item.get("t").and_then(Value::as_i64) {
                points.insert(ts, item.get(&req.tag).and_then(Value::as_f64));
            }
        }

        Ok(points
            .into_iter()
            .map(|(timestamp_ms, value)| TimeSeriesPoint { timestamp_ms, value })
            .collect())
    }

    fn cached_token(&self) -> Option<String> {
        let cache = self.token.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.value.clone())
    }

    async fn login(&self) -> Result<String, ClientError> {
        let req = LoginRequest {
            db_name: &self.credentials.db_name,
            user_name: &self.credentials.username,
            password: &self.credentials.password,
        };

        let res: LoginResponse = self.make_request(Endpoint::Login, None, &req).await?;
        self.metrics.login();

        res.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::MissingToken(self.endpoint_url(Endpoint::Login)))
    }

    async fn make_request<B, T>(&self, endpoint: Endpoint, token: Option<&str>, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint);
        tracing::debug!(message = "making historian request", endpoint = ?endpoint, url = %url);

        let res = self.send(url, token, body).await;
        self.metrics.historian_request(endpoint, res.is_ok());
        res
    }

    async fn send<B, T>(&self, url: Url, token: Option<&str>, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut req = self
            .client
            .post(url.clone())
            .header(ACCEPT, Self::JSON_RESPONSE)
            .json(body);

        if let Some(t) = token {
            req = req.header(Self::TOKEN_HEADER, t);
        }

        let res = req.send().await.map_err(ClientError::Internal)?;
        let status = res.status();
        if !status.is_success() {
            return Err(ClientError::Unexpected(status, url));
        }

        let bytes = res.bytes().await.map_err(ClientError::Internal)?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(url, e))
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> Url {
        let mut url = self.base_url.clone();
        {
            url.path_segments_mut()
                .map(|mut p| {
                    p.pop_if_empty().push("v1").push(endpoint.path());
                })
                .expect("base URL validated as a base when the client was created");
        }

        url
    }
}

#[derive(Serialize, Debug)]
struct LoginRequest<'a> {
    #[serde(rename = "dbName")]
    db_name: &'a str,
    #[serde(rename = "userName")]
    user_name: &'a str,
    password: &'a str,
}

#[derive(Deserialize, Debug)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Serialize, Debug)]
struct RealtimeRequest<'a> {
    #[serde(rename = "dbName")]
    db_name: &'a str,
    #[serde(rename = "tagNames")]
    tag_names: Vec<&'a str>,
}

#[derive(Serialize, Debug)]
struct HistoryRequest<'a> {
    #[serde(rename = "dbName")]
    db_name: &'a str,
    #[serde(rename = "tagName")]
    tag_name: &'a str,
    #[serde(rename = "startMsTime")]
    start_ms_time: i64,
    #[serde(rename = "endMsTime")]
    end_ms_time: i64,
    #[serde(rename = "resampleMode")]
    resample_mode: u8,
    #[serde(rename = "resamplePriodMs")]
    resample_period_ms: i64,
}

#[derive(Deserialize, Debug)]
struct DataResponse {
    data: Option<Vec<Map<String, Value>>>,
}
