//! Purpose: Blocking JSON-RPC 2.0 client over HTTP for the provider bridge.
//! Exports: `RpcClient`.
//! Role: Transport under the contract client; knows envelopes, not ledger methods.
//! Invariants: JSON-RPC error objects surface as `Rejected` with their code and message.
//! Invariants: HTTP status and socket failures surface as `Io`; malformed envelopes as `Decode`.
//! Invariants: Request ids increase monotonically per client instance.
#![allow(clippy::result_large_err)]

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;
use url::Url;

use crate::core::error::{Error, ErrorKind};

type ApiResult<T> = Result<T, Error>;

const JSON_RPC_VERSION: &str = "2.0";

#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<RpcClientInner>,
}

struct RpcClientInner {
    endpoint: Url,
    agent: ureq::Agent,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcClient {
    pub fn new(endpoint: impl Into<String>) -> ApiResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RpcClientInner {
                endpoint,
                agent,
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.agent = agent;
        } else {
            self.inner = Arc::new(RpcClientInner {
                endpoint: self.inner.endpoint.clone(),
                agent,
                next_id: AtomicU64::new(self.inner.next_id.load(Ordering::Relaxed)),
            });
        }
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn call<P, R>(&self, method: &str, params: P) -> ApiResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: JSON_RPC_VERSION,
            id,
            method,
            params,
        })
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_method(method)
                .with_source(err)
        })?;
        trace!(method, id, "json-rpc request");

        let response = self
            .inner
            .agent
            .post(self.inner.endpoint.as_str())
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_string(&payload);

        let body = match response {
            Ok(resp) => resp.into_string().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read response body")
                    .with_method(method)
                    .with_source(err)
            })?,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                // Some providers answer JSON-RPC errors with a non-2xx status.
                if let Ok(envelope) = serde_json::from_str::<JsonRpcResponse>(&body) {
                    if let Some(error) = envelope.error {
                        return Err(rejected(method, error));
                    }
                }
                return Err(Error::new(ErrorKind::Io)
                    .with_message(format!("provider returned http status {code}"))
                    .with_method(method));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("request failed")
                    .with_method(method)
                    .with_source(err));
            }
        };
        decode_response(method, &body)
    }
}

fn decode_response<R>(method: &str, body: &str) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let envelope: JsonRpcResponse = serde_json::from_str(body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid json-rpc response")
            .with_method(method)
            .with_source(err)
    })?;
    if let Some(error) = envelope.error {
        return Err(rejected(method, error));
    }
    serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("unexpected json-rpc result shape")
            .with_method(method)
            .with_source(err)
    })
}

fn rejected(method: &str, error: JsonRpcError) -> Error {
    let mut message = error.message;
    if let Some(Value::String(data)) = error.data {
        message = format!("{message} ({data})");
    }
    Error::new(ErrorKind::Rejected)
        .with_message(message)
        .with_method(method)
        .with_rpc_code(error.code)
}

fn normalize_endpoint(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid rpc url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("rpc url must use http or https scheme")
            .with_hint("Use a JSON-RPC endpoint like http://127.0.0.1:8545."));
    }
    url.set_fragment(None);
    Ok(url)
}
