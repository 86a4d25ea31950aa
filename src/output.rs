use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::{JobContext, StatusResult};
use crate::error::DramError;

const RPC_VERSION: &str = "1.1";

/// Job input file written by the SDK job runner.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub provenance: Option<Vec<Value>>,
}

impl JobRequest {
    pub fn read(path: &Utf8Path) -> Result<Self, DramError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| DramError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| DramError::invalid("job input", format!("not a JSON-RPC request: {err}")))
    }

    pub fn context(&self) -> JobContext {
        let provenance = self
            .context
            .as_ref()
            .and_then(|context| context.provenance.clone());
        let params = self.params.first().cloned().unwrap_or(Value::Null);
        JobContext::new(provenance, &self.method, &params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub name: String,
    pub code: i64,
    pub message: String,
    pub error: String,
}

impl From<&DramError> for RpcError {
    fn from(err: &DramError) -> Self {
        let (name, code) = match err {
            DramError::UnknownMethod(_) => ("Method not found", -32601),
            DramError::InvalidParameter { .. } | DramError::InvalidObjectRef(_) => {
                ("Invalid params", -32602)
            }
            _ => ("Server error", -32000),
        };
        Self {
            name: name.to_string(),
            code,
            message: err.to_string(),
            error: format!("{err:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub version: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JobResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            version: RPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, err: &DramError) -> Self {
        Self {
            version: RPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(err.into()),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn write_response(path: &Utf8Path, response: &JobResponse) -> io::Result<()> {
        let json = serde_json::to_string_pretty(response).map_err(io::Error::other)?;
        fs::write(path.as_std_path(), format!("{json}\n"))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn error_codes_follow_json_rpc() {
        let err = DramError::UnknownMethod("nope".to_string());
        let response = JobResponse::failure(json!("42"), &err);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["version"], "1.1");
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());

        let invalid = RpcError::from(&DramError::invalid("workspace_name", "required"));
        assert_eq!(invalid.code, -32602);
        assert!(invalid.message.contains("workspace_name"));
    }

    #[test]
    fn request_context_defaults_provenance() {
        let request: JobRequest = serde_json::from_value(json!({
            "method": "kb_DRAM.run_kb_dram_annotate_genome",
            "params": [{ "genome_input_ref": "1/2/3" }],
            "version": "1.1",
            "id": "7"
        }))
        .unwrap();
        let ctx = request.context();
        assert_eq!(ctx.provenance.len(), 1);
        assert_eq!(ctx.provenance[0]["service"], "kb_DRAM");
        assert_eq!(ctx.provenance[0]["method_params"][0]["genome_input_ref"], "1/2/3");

        let request: JobRequest = serde_json::from_value(json!({
            "method": "status",
            "context": { "provenance": [{ "service": "runner" }] }
        }))
        .unwrap();
        assert_eq!(request.context().provenance[0]["service"], "runner");
    }
}
