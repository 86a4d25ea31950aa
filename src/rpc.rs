use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DramError;

// Staging and saving whole assemblies through the callback server is slow.
const CALL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    version: &'static str,
    method: String,
    params: [&'a P; 1],
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// JSON-RPC 1.1 client for one SDK service (`Module.method` calls).
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
    module: String,
    service_ver: Option<String>,
}

impl RpcClient {
    pub fn new(module: &str, url: &str, token: Option<&str>) -> Result<Self, DramError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kb-dram/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| http_error(module, err))?,
        );
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            let mut value = HeaderValue::from_str(token).map_err(|err| http_error(module, err))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|err| http_error(module, err))?;

        Ok(Self {
            client,
            url: url.to_string(),
            module: module.to_string(),
            service_ver: None,
        })
    }

    /// Pins the dynamic-service version the callback server should route to.
    pub fn with_service_ver(mut self, service_ver: &str) -> Self {
        self.service_ver = Some(service_ver.to_string());
        self
    }

    /// Calls `Module.method` with a single parameter object and returns the
    /// first element of the result list.
    pub fn call<P, R>(&self, method: &str, params: &P) -> Result<R, DramError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            version: "1.1",
            method: format!("{}.{}", self.module, method),
            params: [params],
            id: request_id(),
            context: self
                .service_ver
                .as_ref()
                .map(|ver| serde_json::json!({ "service_ver": ver })),
        };
        tracing::debug!(service = %self.module, method, "rpc.request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|err| http_error(&self.module, err))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| http_error(&self.module, err))?;

        let body: RpcResponse = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(err) if status.is_success() => {
                return Err(DramError::ServiceError {
                    service: self.module.clone(),
                    message: format!("malformed response to {method}: {err}"),
                });
            }
            Err(_) => {
                return Err(DramError::ServiceStatus {
                    service: self.module.clone(),
                    status: status.as_u16(),
                    message: text,
                });
            }
        };

        if let Some(error) = body.error {
            let message = error
                .message
                .or(error.name)
                .unwrap_or_else(|| format!("{method} failed"));
            return Err(DramError::ServiceError {
                service: self.module.clone(),
                message,
            });
        }
        if !status.is_success() {
            return Err(DramError::ServiceStatus {
                service: self.module.clone(),
                status: status.as_u16(),
                message: text,
            });
        }

        let first = body
            .result
            .and_then(|result| result.into_iter().next())
            .ok_or_else(|| DramError::ServiceError {
                service: self.module.clone(),
                message: format!("{method} returned no result"),
            })?;
        serde_json::from_value(first).map_err(|err| DramError::ServiceError {
            service: self.module.clone(),
            message: format!("unexpected {method} result: {err}"),
        })
    }
}

fn http_error(module: &str, err: impl std::fmt::Display) -> DramError {
    DramError::ServiceHttp {
        service: module.to_string(),
        message: err.to_string(),
    }
}

fn request_id() -> String {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}
