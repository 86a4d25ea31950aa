use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DramError;

/// Workspace object reference, `ws/obj` or `ws/obj/ver`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the reference, `ws_obj_ver`.
    pub fn slug(&self) -> String {
        self.0.replace('/', "_")
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectRef {
    type Err = DramError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let parts = normalized.split('/').collect::<Vec<_>>();
        let is_valid = (parts.len() == 2 || parts.len() == 3)
            && parts
                .iter()
                .all(|part| !part.is_empty() && !part.chars().any(char::is_whitespace));
        if !is_valid {
            return Err(DramError::InvalidObjectRef(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for ObjectRef {
    type Error = DramError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectRef> for String {
    fn from(value: ObjectRef) -> Self {
        value.0
    }
}

/// Workspace `object_info` tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub object_id: u64,
    pub name: String,
    pub type_string: String,
    pub save_date: String,
    pub version: u64,
    pub saved_by: String,
    pub workspace_id: u64,
    pub workspace_name: String,
    pub checksum: String,
    pub size: u64,
    pub metadata: Option<Value>,
}

type RawObjectInfo = (
    u64,
    String,
    String,
    String,
    u64,
    String,
    u64,
    String,
    String,
    u64,
    Option<Value>,
);

impl<'de> Deserialize<'de> for ObjectInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawObjectInfo::deserialize(deserializer)?;
        Ok(Self {
            object_id: raw.0,
            name: raw.1,
            type_string: raw.2,
            save_date: raw.3,
            version: raw.4,
            saved_by: raw.5,
            workspace_id: raw.6,
            workspace_name: raw.7,
            checksum: raw.8,
            size: raw.9,
            metadata: raw.10,
        })
    }
}

impl ObjectInfo {
    /// Permanent `wsid/objid/version` reference of this object.
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef(format!(
            "{}/{}/{}",
            self.workspace_id, self.object_id, self.version
        ))
    }

    /// Type name without module prefix or version, e.g. `GenomeSet`.
    pub fn type_name(&self) -> &str {
        let unversioned = self
            .type_string
            .split_once('-')
            .map(|(name, _)| name)
            .unwrap_or(&self.type_string);
        unversioned
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(unversioned)
    }
}

/// What a job's input reference resolved to; selects the staging path and
/// the DRAM entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Assembly,
    Genome,
    GenomeSet,
    ViralContigs,
}

impl InputKind {
    pub fn from_object_info(info: &ObjectInfo) -> Result<Self, DramError> {
        match info.type_name() {
            "Assembly" | "AssemblySet" | "BinnedContigs" | "ContigSet" => Ok(InputKind::Assembly),
            "Genome" => Ok(InputKind::Genome),
            "GenomeSet" => Ok(InputKind::GenomeSet),
            _ => Err(DramError::UnsupportedInput(info.type_string.clone())),
        }
    }

    /// Column of the annotation table that identifies a genome or contig.
    pub fn groupby_column(&self) -> &'static str {
        match self {
            InputKind::ViralContigs => "scaffold",
            _ => "fasta",
        }
    }

    pub fn is_called_genes(&self) -> bool {
        matches!(self, InputKind::Genome | InputKind::GenomeSet)
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Assembly => write!(f, "assembly"),
            InputKind::Genome => write!(f, "genome"),
            InputKind::GenomeSet => write!(f, "genome-set"),
            InputKind::ViralContigs => write!(f, "viral-contigs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_object_ref_valid() {
        let full: ObjectRef = "123/4/5".parse().unwrap();
        assert_eq!(full.as_str(), "123/4/5");
        assert_eq!(full.slug(), "123_4_5");
        let named: ObjectRef = " my_ws/my_assembly ".parse().unwrap();
        assert_eq!(named.as_str(), "my_ws/my_assembly");
    }

    #[test]
    fn parse_object_ref_invalid() {
        for value in ["", "123", "1//2", "1/2/3/4", "a b/c"] {
            let err = value.parse::<ObjectRef>().unwrap_err();
            assert_matches!(err, DramError::InvalidObjectRef(_));
        }
    }

    #[test]
    fn object_info_from_tuple() {
        let value = json!([
            7,
            "bins",
            "KBaseSearch.GenomeSet-2.1",
            "2020-01-01T00:00:00+0000",
            3,
            "user",
            42,
            "user:narrative",
            "abc",
            100,
            null
        ]);
        let info: ObjectInfo = serde_json::from_value(value).unwrap();
        assert_eq!(info.object_ref().as_str(), "42/7/3");
        assert_eq!(info.type_name(), "GenomeSet");
        assert_eq!(
            InputKind::from_object_info(&info).unwrap(),
            InputKind::GenomeSet
        );
    }

    #[test]
    fn input_kind_rejects_unknown_type() {
        let value = json!([1, "reads", "KBaseFile.PairedEndLibrary-2.0", "", 1, "u", 1, "w", "", 0, null]);
        let info: ObjectInfo = serde_json::from_value(value).unwrap();
        assert_matches!(
            InputKind::from_object_info(&info),
            Err(DramError::UnsupportedInput(_))
        );
    }
}
