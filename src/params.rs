//! Job parameter validation.
//!
//! Every entry point receives a flat JSON mapping. The validators here turn
//! it into a typed job description or fail with an error naming the
//! offending field; they never touch the network or the filesystem.

use serde_json::{Map, Value};

use crate::domain::{InputKind, ObjectRef};
use crate::error::DramError;

pub type RawParams = Map<String, Value>;

pub const DEFAULT_TRANS_TABLE: u64 = 11;
pub const DEFAULT_BITSCORE: u64 = 60;
pub const DEFAULT_RBH_BITSCORE: u64 = 350;
pub const DEFAULT_GENOME_DESCRIPTION: &str = "DRAM annotations";

/// Numeric options handed to DRAM unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub trans_table: u64,
    pub bitscore: u64,
    pub rbh_bitscore: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trans_table: DEFAULT_TRANS_TABLE,
            bitscore: DEFAULT_BITSCORE,
            rbh_bitscore: DEFAULT_RBH_BITSCORE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateAssemblyParams {
    pub assembly_input_ref: ObjectRef,
    pub output_name: String,
    pub desc: String,
    pub min_contig_size: u64,
    pub workspace_name: String,
    pub is_metagenome: bool,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateGenomeParams {
    pub genome_input_ref: ObjectRef,
    pub workspace_name: String,
    pub desc: String,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateViralParams {
    pub assembly_input_ref: ObjectRef,
    pub output_name: String,
    pub desc: String,
    pub min_contig_size: u64,
    pub workspace_name: String,
    pub affi_contigs_shock_ids: Vec<String>,
    pub thresholds: Thresholds,
}

impl AnnotateAssemblyParams {
    pub fn validate(params: &RawParams) -> Result<Self, DramError> {
        let assembly_input_ref = required_ref(params, "assembly_input_ref")?;
        let desc = required_string(params, "desc")?;
        let output_name = required_string(params, "output_name")?;
        let min_contig_size = required_non_negative(params, "min_contig_size")?;
        let workspace_name = required_string(params, "workspace_name")?;
        Ok(Self {
            assembly_input_ref,
            output_name,
            desc,
            min_contig_size,
            workspace_name,
            is_metagenome: optional_bool(params, "is_metagenome")?.unwrap_or(false),
            thresholds: thresholds(params)?,
        })
    }
}

impl AnnotateGenomeParams {
    pub fn validate(params: &RawParams) -> Result<Self, DramError> {
        let genome_input_ref = required_ref(params, "genome_input_ref")?;
        let workspace_name = required_string(params, "workspace_name")?;
        let desc = optional_string(params, "desc")?
            .filter(|desc| !desc.is_empty())
            .unwrap_or_else(|| DEFAULT_GENOME_DESCRIPTION.to_string());
        Ok(Self {
            genome_input_ref,
            workspace_name,
            desc,
            thresholds: thresholds(params)?,
        })
    }
}

impl AnnotateViralParams {
    pub fn validate(params: &RawParams) -> Result<Self, DramError> {
        let assembly_input_ref = required_ref(params, "assembly_input_ref")?;
        let output_name = match optional_string(params, "output_name")? {
            Some(name) if !name.is_empty() => name,
            _ => format!("{}_DRAM-v", assembly_input_ref.slug()),
        };
        let min_contig_size = required_non_negative(params, "min_contig_size")?;
        let affi_contigs_shock_ids = shock_ids(params, "affi_contigs_shock_id")?;
        let workspace_name = required_string(params, "workspace_name")?;
        let desc = optional_string(params, "desc")?
            .filter(|desc| !desc.is_empty())
            .unwrap_or_else(|| format!("DRAM-v annotations of {assembly_input_ref}"));
        Ok(Self {
            assembly_input_ref,
            output_name,
            desc,
            min_contig_size,
            workspace_name,
            affi_contigs_shock_ids,
            thresholds: thresholds(params)?,
        })
    }
}

/// Which entry point a job came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobVariant {
    Assembly,
    Genome,
    Viral,
}

impl JobVariant {
    /// Maps the workspace type of the input onto the kind DRAM is run for,
    /// rejecting types this entry point does not handle.
    pub fn input_kind(&self, resolved: InputKind, type_string: &str) -> Result<InputKind, DramError> {
        match (self, resolved) {
            (JobVariant::Assembly, InputKind::Assembly) => Ok(InputKind::Assembly),
            (JobVariant::Viral, InputKind::Assembly) => Ok(InputKind::ViralContigs),
            (JobVariant::Genome, InputKind::Genome) => Ok(InputKind::Genome),
            (JobVariant::Genome, InputKind::GenomeSet) => Ok(InputKind::GenomeSet),
            _ => Err(DramError::UnsupportedInput(format!(
                "{type_string} cannot be annotated by this method"
            ))),
        }
    }
}

/// Validated job, shared by all entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub variant: JobVariant,
    pub input_ref: ObjectRef,
    pub workspace_name: String,
    pub output_name: String,
    pub description: String,
    pub min_contig_size: u64,
    pub is_metagenome: bool,
    pub affi_contigs_shock_ids: Vec<String>,
    pub thresholds: Thresholds,
}

impl From<AnnotateAssemblyParams> for JobSpec {
    fn from(value: AnnotateAssemblyParams) -> Self {
        Self {
            variant: JobVariant::Assembly,
            input_ref: value.assembly_input_ref,
            workspace_name: value.workspace_name,
            output_name: value.output_name,
            description: value.desc,
            min_contig_size: value.min_contig_size,
            is_metagenome: value.is_metagenome,
            affi_contigs_shock_ids: Vec::new(),
            thresholds: value.thresholds,
        }
    }
}

impl From<AnnotateGenomeParams> for JobSpec {
    fn from(value: AnnotateGenomeParams) -> Self {
        Self {
            variant: JobVariant::Genome,
            output_name: format!("{}_DRAM", value.genome_input_ref.slug()),
            input_ref: value.genome_input_ref,
            workspace_name: value.workspace_name,
            description: value.desc,
            min_contig_size: 0,
            is_metagenome: false,
            affi_contigs_shock_ids: Vec::new(),
            thresholds: value.thresholds,
        }
    }
}

impl From<AnnotateViralParams> for JobSpec {
    fn from(value: AnnotateViralParams) -> Self {
        Self {
            variant: JobVariant::Viral,
            input_ref: value.assembly_input_ref,
            workspace_name: value.workspace_name,
            output_name: value.output_name,
            description: value.desc,
            min_contig_size: value.min_contig_size,
            is_metagenome: false,
            affi_contigs_shock_ids: value.affi_contigs_shock_ids,
            thresholds: value.thresholds,
        }
    }
}

fn required_string(params: &RawParams, field: &str) -> Result<String, DramError> {
    match params.get(field) {
        None | Some(Value::Null) => Err(DramError::invalid(field, "is required")),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(DramError::invalid(field, "must not be empty"))
        }
        Some(Value::String(value)) => Ok(value.trim().to_string()),
        Some(_) => Err(DramError::invalid(field, "must be a string")),
    }
}

fn optional_string(params: &RawParams, field: &str) -> Result<Option<String>, DramError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.trim().to_string())),
        Some(_) => Err(DramError::invalid(field, "must be a string")),
    }
}

fn required_ref(params: &RawParams, field: &str) -> Result<ObjectRef, DramError> {
    let value = required_string(params, field)?;
    value
        .parse()
        .map_err(|_| DramError::invalid(field, format!("`{value}` is not a workspace reference")))
}

fn required_non_negative(params: &RawParams, field: &str) -> Result<u64, DramError> {
    match params.get(field) {
        None | Some(Value::Null) => Err(DramError::invalid(field, "is required")),
        Some(value) => non_negative(field, value),
    }
}

fn optional_non_negative(
    params: &RawParams,
    field: &str,
    default: u64,
) -> Result<u64, DramError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => non_negative(field, value),
    }
}

fn non_negative(field: &str, value: &Value) -> Result<u64, DramError> {
    value
        .as_u64()
        .ok_or_else(|| DramError::invalid(field, "must be a non-negative integer"))
}

fn optional_bool(params: &RawParams, field: &str) -> Result<Option<bool>, DramError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(value) => match value.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(DramError::invalid(field, "must be a boolean")),
        },
    }
}

fn thresholds(params: &RawParams) -> Result<Thresholds, DramError> {
    Ok(Thresholds {
        trans_table: optional_non_negative(params, "trans_table", DEFAULT_TRANS_TABLE)?,
        bitscore: optional_non_negative(params, "bitscore", DEFAULT_BITSCORE)?,
        rbh_bitscore: optional_non_negative(params, "rbh_bitscore", DEFAULT_RBH_BITSCORE)?,
    })
}

// The UI sends a single handle or a list of shards.
fn shock_ids(params: &RawParams, field: &str) -> Result<Vec<String>, DramError> {
    let ids = match params.get(field) {
        None | Some(Value::Null) => return Err(DramError::invalid(field, "is required")),
        Some(Value::String(id)) => vec![id.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(id) => Ok(id.trim().to_string()),
                _ => Err(DramError::invalid(field, "must be a list of strings")),
            })
            .collect::<Result<Vec<_>, DramError>>()?,
        Some(_) => return Err(DramError::invalid(field, "must be a string or list of strings")),
    };
    if ids.is_empty() || ids.iter().any(String::is_empty) {
        return Err(DramError::invalid(field, "must name at least one file"));
    }
    Ok(ids)
}
