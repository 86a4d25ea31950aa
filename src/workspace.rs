use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{ObjectInfo, ObjectRef};
use crate::error::DramError;
use crate::rpc::RpcClient;

/// Object to be written with `save_objects`.
#[derive(Debug, Clone, Serialize)]
pub struct SaveObject {
    #[serde(rename = "type")]
    pub type_string: String,
    pub data: Value,
    pub name: String,
    pub meta: BTreeMap<String, String>,
    pub provenance: Vec<Value>,
}

pub trait WorkspaceClient: Send + Sync {
    fn get_object_info(&self, object_ref: &ObjectRef) -> Result<ObjectInfo, DramError>;
    fn get_object_data(&self, object_ref: &ObjectRef) -> Result<Value, DramError>;
    fn save_object(&self, workspace: &str, object: SaveObject) -> Result<ObjectInfo, DramError>;
}

#[derive(Clone)]
pub struct WorkspaceHttpClient {
    rpc: RpcClient,
}

#[derive(Debug, Deserialize)]
struct InfosResult {
    infos: Vec<ObjectInfo>,
}

#[derive(Debug, Deserialize)]
struct ObjectsResult {
    data: Vec<ObjectData>,
}

#[derive(Debug, Deserialize)]
struct ObjectData {
    data: Value,
}

impl WorkspaceHttpClient {
    pub fn new(url: &str, token: Option<&str>) -> Result<Self, DramError> {
        Ok(Self {
            rpc: RpcClient::new("Workspace", url, token)?,
        })
    }
}

impl WorkspaceClient for WorkspaceHttpClient {
    fn get_object_info(&self, object_ref: &ObjectRef) -> Result<ObjectInfo, DramError> {
        let result: InfosResult = self.rpc.call(
            "get_object_info3",
            &json!({ "objects": [{ "ref": object_ref }], "includeMetadata": 0 }),
        )?;
        result
            .infos
            .into_iter()
            .next()
            .ok_or_else(|| not_found(object_ref))
    }

    fn get_object_data(&self, object_ref: &ObjectRef) -> Result<Value, DramError> {
        let result: ObjectsResult = self
            .rpc
            .call("get_objects2", &json!({ "objects": [{ "ref": object_ref }] }))?;
        result
            .data
            .into_iter()
            .next()
            .map(|object| object.data)
            .ok_or_else(|| not_found(object_ref))
    }

    fn save_object(&self, workspace: &str, object: SaveObject) -> Result<ObjectInfo, DramError> {
        let name = object.name.clone();
        let infos: Vec<ObjectInfo> = self.rpc.call(
            "save_objects",
            &json!({ "workspace": workspace, "objects": [object] }),
        )?;
        infos
            .into_iter()
            .next()
            .ok_or_else(|| DramError::ServiceError {
                service: "Workspace".to_string(),
                message: format!("save_objects returned no info for {name}"),
            })
    }
}

fn not_found(object_ref: &ObjectRef) -> DramError {
    DramError::ServiceError {
        service: "Workspace".to_string(),
        message: format!("no object returned for {object_ref}"),
    }
}
