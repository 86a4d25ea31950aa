//! Genome objects built from a DRAM annotation run, and the set that groups
//! them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotations::{AnnotationRow, AnnotationTable, read_gene_sequences};
use crate::domain::ObjectRef;
use crate::error::DramError;
use crate::file_util::{FileUtilClient, GenomeSaveRequest};
use crate::ontology::Ontology;
use crate::staging::GenomeRefMap;
use crate::workspace::{SaveObject, WorkspaceClient};

pub const GENOME_SET_TYPE: &str = "KBaseSearch.GenomeSet";

const FUNCTION_COLUMNS: [&str; 6] = [
    "kegg_hit",
    "uniref_hit",
    "pfam_hits",
    "cazy_hits",
    "peptidase_hit",
    "vogdb_description",
];

/// `(contig, start, strand, length)`; minus-strand features start at their
/// right end.
pub type Location = (String, u64, String, u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeFeature {
    pub id: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    pub location: Vec<Location>,
    pub functions: Vec<String>,
    pub db_xrefs: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dna_sequence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dna_sequence_length: Option<u64>,
    pub cdss: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeCds {
    pub id: String,
    pub location: Vec<Location>,
    pub functions: Vec<String>,
    pub parent_gene: String,
    pub protein_translation: String,
    pub protein_translation_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dna_sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeObject {
    pub id: String,
    pub scientific_name: String,
    pub domain: String,
    pub taxonomy: String,
    pub genetic_code: u64,
    pub assembly_ref: ObjectRef,
    pub source: String,
    pub source_id: String,
    pub molecule_type: String,
    pub num_contigs: u64,
    pub contig_ids: Vec<String>,
    pub features: Vec<GenomeFeature>,
    pub cdss: Vec<GenomeCds>,
    pub mrnas: Vec<Value>,
    pub non_coding_features: Vec<Value>,
    pub feature_counts: BTreeMap<String, u64>,
    pub genome_tiers: Vec<String>,
    pub warnings: Vec<String>,
}

/// Element map of a `KBaseSearch.GenomeSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeSetObject {
    pub description: String,
    pub elements: BTreeMap<String, GenomeSetElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeSetElement {
    #[serde(rename = "ref")]
    pub object_ref: ObjectRef,
}

/// Builds one genome per `fasta` group of the table. `sources` maps each
/// group to the assembly it was called from.
pub fn build_genomes(
    table: &AnnotationTable,
    genes_fna: &Utf8Path,
    genes_faa: &Utf8Path,
    sources: &GenomeRefMap,
    genetic_code: u64,
) -> Result<Vec<(String, GenomeObject)>, DramError> {
    let groups = table.group_by("fasta")?;
    let wanted = table
        .rows()
        .iter()
        .map(|row| row.gene_id.as_str())
        .collect::<HashSet<_>>();
    let nucleotides = read_gene_sequences(genes_fna, &wanted)?;
    let proteins = read_gene_sequences(genes_faa, &wanted)?;

    let mut genomes = Vec::with_capacity(groups.len());
    for (name, rows) in groups {
        let assembly_ref = sources.get(&name).ok_or_else(|| {
            DramError::Postcondition(format!("annotated genome {name} matches no staged input"))
        })?;

        let mut contigs = BTreeSet::new();
        let mut features = Vec::with_capacity(rows.len());
        let mut cdss = Vec::with_capacity(rows.len());
        let mut warnings = Vec::new();
        for row in rows {
            let location = feature_location(row)?;
            contigs.insert(location.0.clone());
            let functions = feature_functions(row);
            let dna_sequence = nucleotides.get(&row.gene_id).cloned();
            let cds_id = format!("{}_CDS_1", row.gene_id);

            let linked_cdss = match proteins.get(&row.gene_id) {
                Some(protein) => {
                    cdss.push(GenomeCds {
                        id: cds_id.clone(),
                        location: vec![location.clone()],
                        functions: functions.clone(),
                        parent_gene: row.gene_id.clone(),
                        protein_translation: protein.clone(),
                        protein_translation_length: protein.len() as u64,
                        dna_sequence: dna_sequence.clone(),
                    });
                    vec![cds_id]
                }
                None => {
                    warnings.push(format!("no protein sequence for {}", row.gene_id));
                    Vec::new()
                }
            };

            features.push(GenomeFeature {
                id: row.gene_id.clone(),
                feature_type: "gene".to_string(),
                location: vec![location],
                functions,
                db_xrefs: feature_xrefs(row),
                dna_sequence_length: dna_sequence.as_ref().map(|seq| seq.len() as u64),
                dna_sequence,
                cdss: linked_cdss,
            });
        }

        let feature_counts = BTreeMap::from([
            ("gene".to_string(), features.len() as u64),
            ("CDS".to_string(), cdss.len() as u64),
        ]);
        tracing::debug!(genome = %name, genes = features.len(), "genome.build");
        genomes.push((
            name.clone(),
            GenomeObject {
                id: name.clone(),
                scientific_name: name.clone(),
                domain: "Unknown".to_string(),
                taxonomy: "Unconfirmed Organism".to_string(),
                genetic_code,
                assembly_ref: assembly_ref.clone(),
                source: "DRAM".to_string(),
                source_id: name,
                molecule_type: "DNA".to_string(),
                num_contigs: contigs.len() as u64,
                contig_ids: contigs.into_iter().collect(),
                features,
                cdss,
                mrnas: Vec::new(),
                non_coding_features: Vec::new(),
                feature_counts,
                genome_tiers: vec!["User".to_string()],
                warnings,
            },
        ));
    }
    Ok(genomes)
}

fn feature_location(row: &AnnotationRow) -> Result<Location, DramError> {
    let missing = |column: &str| {
        DramError::AnnotationParse(format!("gene {} has no `{column}` value", row.gene_id))
    };
    let contig = row.get("scaffold").ok_or_else(|| missing("scaffold"))?;
    let start = row
        .get_u64("start_position")
        .ok_or_else(|| missing("start_position"))?;
    let end = row
        .get_u64("end_position")
        .ok_or_else(|| missing("end_position"))?;
    let length = end.saturating_sub(start) + 1;
    let minus = row
        .get("strandedness")
        .is_some_and(|strand| strand.trim_start().starts_with('-'));
    Ok(if minus {
        (contig.to_string(), end, "-".to_string(), length)
    } else {
        (contig.to_string(), start, "+".to_string(), length)
    })
}

fn feature_functions(row: &AnnotationRow) -> Vec<String> {
    FUNCTION_COLUMNS
        .iter()
        .filter_map(|column| row.get(column))
        .map(str::to_string)
        .collect()
}

fn feature_xrefs(row: &AnnotationRow) -> Vec<(String, String)> {
    Ontology::ALL
        .iter()
        .flat_map(|ontology| {
            ontology
                .terms(row)
                .into_iter()
                .map(|term| (ontology.id().to_string(), term))
        })
        .collect()
}

pub struct MaterializeRequest<'a> {
    pub table: &'a AnnotationTable,
    pub genes_fna: &'a Utf8Path,
    pub genes_faa: &'a Utf8Path,
    pub sources: &'a GenomeRefMap,
    pub workspace: &'a str,
    pub set_name: &'a str,
    pub description: &'a str,
    pub genetic_code: u64,
    pub provenance: &'a [Value],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub genomes: GenomeRefMap,
    pub genome_set: Option<ObjectRef>,
}

/// Saves every genome in turn, then a genome set when there is more than one.
/// Genomes saved before a failure stay saved.
pub fn materialize<W: WorkspaceClient, F: FileUtilClient>(
    workspace: &W,
    files: &F,
    request: &MaterializeRequest<'_>,
) -> Result<Materialized, DramError> {
    let built = build_genomes(
        request.table,
        request.genes_fna,
        request.genes_faa,
        request.sources,
        request.genetic_code,
    )?;
    tracing::info!(genomes = built.len(), "phase=Materialize");

    let mut genomes = GenomeRefMap::new();
    for (name, genome) in built {
        let data = serde_json::to_value(&genome)
            .map_err(|err| DramError::Postcondition(format!("encode genome {name}: {err}")))?;
        let info = files.save_genome(GenomeSaveRequest {
            workspace: request.workspace.to_string(),
            name: name.clone(),
            data,
            provenance: request.provenance.to_vec(),
        })?;
        let genome_ref = info.object_ref();
        tracing::info!(genome = %name, object = %genome_ref, "genome saved");
        genomes.insert(name, genome_ref);
    }

    let genome_set = if genomes.len() > 1 {
        Some(save_genome_set(workspace, request, &genomes)?)
    } else {
        None
    };
    Ok(Materialized {
        genomes,
        genome_set,
    })
}

fn save_genome_set<W: WorkspaceClient>(
    workspace: &W,
    request: &MaterializeRequest<'_>,
    genomes: &GenomeRefMap,
) -> Result<ObjectRef, DramError> {
    let set = GenomeSetObject {
        description: request.description.to_string(),
        elements: genomes
            .iter()
            .map(|(name, object_ref)| {
                (
                    name.to_string(),
                    GenomeSetElement {
                        object_ref: object_ref.clone(),
                    },
                )
            })
            .collect(),
    };
    let data = serde_json::to_value(&set)
        .map_err(|err| DramError::Postcondition(format!("encode genome set: {err}")))?;
    let info = workspace.save_object(
        request.workspace,
        SaveObject {
            type_string: GENOME_SET_TYPE.to_string(),
            data,
            name: request.set_name.to_string(),
            meta: BTreeMap::new(),
            provenance: set_provenance(request.provenance, genomes),
        },
    )?;
    let set_ref = info.object_ref();
    tracing::info!(set = %set_ref, members = genomes.len(), "genome set saved");
    Ok(set_ref)
}

/// Job provenance with its first action re-pointed at the set utility.
pub fn set_provenance(provenance: &[Value], genomes: &GenomeRefMap) -> Vec<Value> {
    let mut provenance = provenance.to_vec();
    if provenance.is_empty() {
        provenance.push(Value::Object(Default::default()));
    }
    if let Some(Value::Object(action)) = provenance.first_mut() {
        action.insert(
            "input_ws_objects".to_string(),
            Value::from(
                genomes
                    .refs()
                    .into_iter()
                    .map(String::from)
                    .collect::<Vec<_>>(),
            ),
        );
        action.insert("service".to_string(), Value::from("kb_SetUtilities"));
        action.insert(
            "method".to_string(),
            Value::from("KButil_Batch_Create_GenomeSet"),
        );
    }
    provenance
}
