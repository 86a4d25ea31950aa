use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{ObjectInfo, ObjectRef};
use crate::error::DramError;
use crate::rpc::RpcClient;

/// FASTA files the assembly service wrote for one assembly reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyFasta {
    pub source_ref: ObjectRef,
    pub paths: Vec<Utf8PathBuf>,
}

/// Genome object ready to be handed to the genome save service.
#[derive(Debug, Clone)]
pub struct GenomeSaveRequest {
    pub workspace: String,
    pub name: String,
    pub data: Value,
    pub provenance: Vec<Value>,
}

/// File-staging services reached through the SDK callback server.
pub trait FileUtilClient: Send + Sync {
    /// Writes the FASTA of an assembly (or of every member of an assembly
    /// set / binned contigs object) to local scratch.
    fn get_fastas(&self, object_ref: &ObjectRef) -> Result<Vec<AssemblyFasta>, DramError>;

    /// Exports the protein translations of a genome's CDS features to
    /// `destination`, returning the written path.
    fn genome_to_protein_fasta(
        &self,
        genome_ref: &ObjectRef,
        destination: &Utf8Path,
    ) -> Result<Utf8PathBuf, DramError>;

    /// Fetches a stored blob by handle into `destination_dir`.
    fn download_blob(
        &self,
        handle: &str,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, DramError>;

    fn save_genome(&self, request: GenomeSaveRequest) -> Result<ObjectInfo, DramError>;
}

#[derive(Clone)]
pub struct FileUtilHttpClient {
    assembly_util: RpcClient,
    object_to_file: RpcClient,
    data_file_util: RpcClient,
    genome_file_util: RpcClient,
}

#[derive(Debug, Deserialize)]
struct FastaEntry {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenomeToFastaResult {
    fasta_file_path: String,
}

#[derive(Debug, Deserialize)]
struct ShockToFileResult {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct SaveGenomeResult {
    info: ObjectInfo,
}

impl FileUtilHttpClient {
    pub fn new(callback_url: &str, token: Option<&str>) -> Result<Self, DramError> {
        Ok(Self {
            assembly_util: RpcClient::new("AssemblyUtil", callback_url, token)?,
            object_to_file: RpcClient::new("KBaseDataObjectToFileUtils", callback_url, token)?,
            data_file_util: RpcClient::new("DataFileUtil", callback_url, token)?,
            genome_file_util: RpcClient::new("GenomeFileUtil", callback_url, token)?,
        })
    }
}

impl FileUtilClient for FileUtilHttpClient {
    fn get_fastas(&self, object_ref: &ObjectRef) -> Result<Vec<AssemblyFasta>, DramError> {
        let result: BTreeMap<String, FastaEntry> = self
            .assembly_util
            .call("get_fastas", &json!({ "ref_lst": [object_ref] }))?;
        result
            .into_iter()
            .map(|(source_ref, entry)| {
                Ok(AssemblyFasta {
                    source_ref: source_ref.parse()?,
                    paths: entry.paths.into_iter().map(Utf8PathBuf::from).collect(),
                })
            })
            .collect::<Result<Vec<_>, DramError>>()
    }

    fn genome_to_protein_fasta(
        &self,
        genome_ref: &ObjectRef,
        destination: &Utf8Path,
    ) -> Result<Utf8PathBuf, DramError> {
        let file_name = destination
            .file_name()
            .ok_or_else(|| DramError::Filesystem(format!("invalid export path {destination}")))?;
        let dir = destination.parent().unwrap_or_else(|| Utf8Path::new("."));
        let result: GenomeToFastaResult = self.object_to_file.call(
            "GenomeToFASTA",
            &json!({
                "genome_ref": genome_ref,
                "file": file_name,
                "dir": dir,
                "console": [],
                "invalid_msgs": [],
                "residue_type": "P",
                "feature_type": "CDS",
                "record_id_pattern": "%%feature_id%%",
                "record_desc_pattern": "[%%genome_id%%]",
                "case": "upper",
                "linewrap": 50
            }),
        )?;
        Ok(Utf8PathBuf::from(result.fasta_file_path))
    }

    fn download_blob(
        &self,
        handle: &str,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, DramError> {
        let result: ShockToFileResult = self.data_file_util.call(
            "shock_to_file",
            &json!({
                "shock_id": handle,
                "file_path": destination_dir,
                "unpack": "uncompress"
            }),
        )?;
        Ok(Utf8PathBuf::from(result.file_path))
    }

    fn save_genome(&self, request: GenomeSaveRequest) -> Result<ObjectInfo, DramError> {
        let result: SaveGenomeResult = self.genome_file_util.call(
            "save_one_genome",
            &json!({
                "workspace": request.workspace,
                "name": request.name,
                "data": request.data,
                "provenance": request.provenance
            }),
        )?;
        Ok(result.info)
    }
}
