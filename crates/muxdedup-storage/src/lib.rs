//! Record repository seam and the Tvheadend JSON API client behind it.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use digest_auth::{AuthContext, HttpMethod};
use muxdedup_core::{Mux, RecordError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "muxdedup-storage";

const JSON_CONTENT_TYPES: [&str; 2] = ["application/json", "text/x-json"];

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("http status {status} {reason} for {url}")]
    Transport {
        status: u16,
        reason: String,
        url: String,
    },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}: {message}")]
    Protocol { url: String, message: String },
    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::Transport { .. } | RepositoryError::Request { .. } => {
                ErrorKind::Transport
            }
            RepositoryError::Protocol { .. } | RepositoryError::Record(_) => ErrorKind::Protocol,
        }
    }
}

/// Fetch/update/delete access to the remote configuration store.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn fetch(&self, class: &str) -> Result<Vec<JsonValue>, RepositoryError>;
    async fn update(&self, mux: &Mux) -> Result<(), RepositoryError>;
    async fn delete(&self, uuid: &str) -> Result<(), RepositoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Basic,
    Digest,
    Any,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthMode::Basic),
            "digest" => Ok(AuthMode::Digest),
            "any" => Ok(AuthMode::Any),
            other => Err(format!("unknown auth mode '{other}' (expected basic, digest or any)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub api_url: String,
    pub user: String,
    pub password: String,
    pub auth: AuthMode,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Log every request and response at debug level.
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct HttpRepository {
    client: reqwest::Client,
    api_url: String,
    user: String,
    password: String,
    auth: AuthMode,
    debug: bool,
}

/// Credentials attached to one attempt of a request.
enum Authorization {
    Anonymous,
    Basic,
    Header(String),
}

impl HttpRepository {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            user: config.user,
            password: config.password,
            auth: config.auth,
            debug: config.debug,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    /// POST a form to `path`. Only 200 and 201 count as success.
    ///
    /// `basic` and `any` send basic credentials up front; `digest` sends none.
    /// Unless the mode is `basic`, a 401 carrying a digest challenge is
    /// answered once.
    pub async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<ApiResponse, RepositoryError> {
        let url = self.endpoint(path);
        if self.debug {
            let keys: Vec<&str> = form.iter().map(|(k, _)| *k).collect();
            debug!(%url, ?keys, auth = ?self.auth, "POST");
        }

        let first = match self.auth {
            AuthMode::Basic | AuthMode::Any => Authorization::Basic,
            AuthMode::Digest => Authorization::Anonymous,
        };
        let mut resp = self.send(&url, form, first).await?;

        if resp.status() == StatusCode::UNAUTHORIZED && self.auth != AuthMode::Basic {
            if let Some(challenge) = digest_challenge(&resp) {
                let header = self.digest_response(&url, &challenge)?;
                if self.debug {
                    debug!(%url, "answering digest challenge");
                }
                resp = self.send(&url, form, Authorization::Header(header)).await?;
            }
        }

        let status = resp.status();
        let final_url = resp.url().to_string();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(RepositoryError::Transport {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                url: final_url,
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase());
        let body = resp
            .bytes()
            .await
            .map_err(|source| RepositoryError::Request {
                url: final_url.clone(),
                source,
            })?
            .to_vec();

        if self.debug {
            debug!(url = %final_url, status = status.as_u16(), ?content_type, bytes = body.len(), "response");
        }

        Ok(ApiResponse {
            url: final_url,
            content_type,
            body,
        })
    }

    async fn send(
        &self,
        url: &str,
        form: &[(&str, String)],
        authorization: Authorization,
    ) -> Result<reqwest::Response, RepositoryError> {
        let request = self.client.post(url).form(form);
        let request = match authorization {
            Authorization::Anonymous => request,
            Authorization::Basic => request.basic_auth(&self.user, Some(&self.password)),
            Authorization::Header(value) => request.header(AUTHORIZATION, value),
        };
        request
            .send()
            .await
            .map_err(|source| RepositoryError::Request {
                url: url.to_string(),
                source,
            })
    }

    fn digest_response(&self, url: &str, challenge: &str) -> Result<String, RepositoryError> {
        let protocol = |message: String| RepositoryError::Protocol {
            url: url.to_string(),
            message,
        };
        let parsed = reqwest::Url::parse(url).map_err(|err| protocol(format!("bad url: {err}")))?;
        let uri = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };

        let mut prompt = digest_auth::parse(challenge)
            .map_err(|err| protocol(format!("unreadable digest challenge: {err}")))?;
        let mut context =
            AuthContext::new(self.user.as_str(), self.password.as_str(), uri.as_str());
        context.method = HttpMethod::POST;
        let answer = prompt
            .respond(&context)
            .map_err(|err| protocol(format!("answering digest challenge: {err}")))?;
        Ok(answer.to_header_string())
    }
}

fn digest_challenge(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| {
            v.trim_start()
                .get(..6)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
        })
        .map(str::to_string)
}

#[async_trait]
impl RecordRepository for HttpRepository {
    async fn fetch(&self, class: &str) -> Result<Vec<JsonValue>, RepositoryError> {
        let span = info_span!("tvh_fetch", class);
        async {
            let resp = self
                .post_form("raw/export", &[("class", class.to_string())])
                .await?;
            parse_record_collection(&resp)
        }
        .instrument(span)
        .await
    }

    async fn update(&self, mux: &Mux) -> Result<(), RepositoryError> {
        let span = info_span!("tvh_update", uuid = %mux.uuid);
        async {
            let node = serde_json::to_string(&mux.to_json()?).map_err(|err| {
                RepositoryError::Protocol {
                    url: self.endpoint("raw/import"),
                    message: format!("encoding node: {err}"),
                }
            })?;
            self.post_form("raw/import", &[("node", node)]).await?;
            Ok::<(), RepositoryError>(())
        }
        .instrument(span)
        .await
    }

    async fn delete(&self, uuid: &str) -> Result<(), RepositoryError> {
        let span = info_span!("tvh_delete", uuid);
        async {
            self.post_form("idnode/delete", &[("uuid", uuid.to_string())])
                .await?;
            Ok::<(), RepositoryError>(())
        }
        .instrument(span)
        .await
    }
}

/// Decode a `raw/export` body: a JSON array of objects, or a grid-style
/// object carrying one under `entries`.
pub fn parse_record_collection(resp: &ApiResponse) -> Result<Vec<JsonValue>, RepositoryError> {
    let protocol = |message: String| RepositoryError::Protocol {
        url: resp.url.clone(),
        message,
    };

    match resp.content_type.as_deref() {
        Some(ct) if JSON_CONTENT_TYPES.contains(&ct) => {}
        other => {
            return Err(protocol(format!(
                "expected a JSON body, got content type {}",
                other.unwrap_or("<none>")
            )))
        }
    }

    let value: JsonValue = serde_json::from_slice(&resp.body)
        .map_err(|err| protocol(format!("malformed JSON: {err}")))?;
    let records = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("entries") {
            Some(JsonValue::Array(items)) => items,
            _ => return Err(protocol("object body without an entries array".to_string())),
        },
        _ => return Err(protocol("body is not a record collection".to_string())),
    };

    if let Some(pos) = records.iter().position(|r| !r.is_object()) {
        return Err(protocol(format!("record #{pos} is not an object")));
    }
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    Fetch(String),
    Update(String),
    Delete(String),
}

/// In-process store keyed by record class. Backs offline runs over an
/// exported snapshot, and records every call it receives.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    classes: Mutex<BTreeMap<String, Vec<JsonValue>>>,
    calls: Mutex<Vec<RepositoryCall>>,
}

impl MemoryRepository {
    /// Build from `{ "<class>": [records...], ... }`.
    pub fn from_json(value: JsonValue) -> Result<Self, RepositoryError> {
        let JsonValue::Object(map) = value else {
            return Err(RepositoryError::Protocol {
                url: "memory://snapshot".to_string(),
                message: "snapshot must be an object keyed by record class".to_string(),
            });
        };
        let mut classes = BTreeMap::new();
        for (class, records) in map {
            let JsonValue::Array(records) = records else {
                return Err(RepositoryError::Protocol {
                    url: format!("memory://{class}"),
                    message: "class entry is not an array".to_string(),
                });
            };
            classes.insert(class, records);
        }
        Ok(Self {
            classes: Mutex::new(classes),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn records(&self, class: &str) -> Vec<JsonValue> {
        self.classes
            .lock()
            .await
            .get(class)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<RepositoryCall> {
        self.calls.lock().await.clone()
    }

    fn not_found(uuid: &str) -> RepositoryError {
        RepositoryError::Transport {
            status: 404,
            reason: "Not Found".to_string(),
            url: format!("memory://{uuid}"),
        }
    }
}

fn has_uuid(record: &JsonValue, uuid: &str) -> bool {
    record.get("uuid").and_then(JsonValue::as_str) == Some(uuid)
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn fetch(&self, class: &str) -> Result<Vec<JsonValue>, RepositoryError> {
        self.calls
            .lock()
            .await
            .push(RepositoryCall::Fetch(class.to_string()));
        Ok(self.records(class).await)
    }

    async fn update(&self, mux: &Mux) -> Result<(), RepositoryError> {
        self.calls
            .lock()
            .await
            .push(RepositoryCall::Update(mux.uuid.clone()));
        let node = mux.to_json()?;
        let mut classes = self.classes.lock().await;
        let slot = classes
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|record| has_uuid(record, &mux.uuid))
            .ok_or_else(|| Self::not_found(&mux.uuid))?;
        *slot = node;
        Ok(())
    }

    async fn delete(&self, uuid: &str) -> Result<(), RepositoryError> {
        self.calls
            .lock()
            .await
            .push(RepositoryCall::Delete(uuid.to_string()));
        let mut classes = self.classes.lock().await;
        for records in classes.values_mut() {
            if let Some(pos) = records.iter().position(|r| has_uuid(r, uuid)) {
                records.remove(pos);
                return Ok(());
            }
        }
        Err(Self::not_found(uuid))
    }
}
