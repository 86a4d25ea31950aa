use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotations::{AnnotationRow, AnnotationTable};
use crate::domain::{InputKind, ObjectRef};
use crate::error::DramError;
use crate::rpc::RpcClient;
use crate::staging::GenomeRefMap;

static KO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bK\d{5}\b").unwrap());
static EC_BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[EC:([^\]]*)\]").unwrap());
static EC_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.(?:\d+|-)\.(?:\d+|-)\.(?:n?\d+|-)$").unwrap());
static PFAM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(PF\d{5})(?:\.\d+)?\b").unwrap());
static CAZY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:GH|GT|PL|CE|AA|CBM)\d+(?:_\d+)?)\b").unwrap());
static MEROPS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([A-Z]\d{2}[A-Z]?)\b").unwrap());

/// Ontologies DRAM reports identifiers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ontology {
    Ko,
    Ec,
    Pfam,
    Cazy,
    Merops,
}

impl Ontology {
    pub const ALL: [Ontology; 5] = [
        Ontology::Ko,
        Ontology::Ec,
        Ontology::Pfam,
        Ontology::Cazy,
        Ontology::Merops,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Ontology::Ko => "KO",
            Ontology::Ec => "EC",
            Ontology::Pfam => "PFAM",
            Ontology::Cazy => "CAZy",
            Ontology::Merops => "MEROPS",
        }
    }

    fn columns(&self) -> &'static [&'static str] {
        match self {
            Ontology::Ko => &["ko_id"],
            Ontology::Ec => &["kegg_hit"],
            Ontology::Pfam => &["pfam_hits"],
            Ontology::Cazy => &["cazy_ids", "cazy_hits"],
            Ontology::Merops => &["peptidase_family"],
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            Ontology::Ko => &*KO_RE,
            Ontology::Ec => &*EC_BRACKET_RE,
            Ontology::Pfam => &*PFAM_RE,
            Ontology::Cazy => &*CAZY_RE,
            Ontology::Merops => &*MEROPS_RE,
        }
    }

    /// Identifiers of this ontology found in a row, deduplicated in order.
    /// One `[EC:...]` bracket may list several numbers.
    pub fn terms(&self, row: &AnnotationRow) -> Vec<String> {
        let Some(text) = self.columns().iter().find_map(|column| row.get(column)) else {
            return Vec::new();
        };
        let mut terms: Vec<String> = Vec::new();
        let found = self
            .pattern()
            .captures_iter(text)
            .filter_map(|capture| capture.get(1).or_else(|| capture.get(0)));
        for found in found {
            let ids = match self {
                Ontology::Ec => found
                    .as_str()
                    .split_whitespace()
                    .filter(|token| EC_NUMBER_RE.is_match(token))
                    .collect::<Vec<_>>(),
                _ => vec![found.as_str()],
            };
            for id in ids {
                if !terms.iter().any(|term| term == id) {
                    terms.push(id.to_string());
                }
            }
        }
        terms
    }

    pub fn term_id(&self, id: &str) -> String {
        format!("{}:{id}", self.id())
    }
}

impl fmt::Display for Ontology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyTerm {
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyEvent {
    pub event_id: String,
    pub description: String,
    pub ontology_id: String,
    pub method: String,
    pub method_version: String,
    pub timestamp: String,
    pub ontology_terms: BTreeMap<String, Vec<OntologyTerm>>,
}

/// All events for one genome, submitted in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyEventBatch {
    pub input_ref: ObjectRef,
    pub input_workspace: String,
    #[serde(rename = "workspace-url")]
    pub workspace_url: String,
    pub events: Vec<OntologyEvent>,
    pub save: u8,
}

impl OntologyEventBatch {
    pub fn term_count(&self) -> usize {
        self.events
            .iter()
            .map(|event| event.ontology_terms.values().map(Vec::len).sum::<usize>())
            .sum()
    }
}

pub trait OntologyClient: Send + Sync {
    fn add_annotation_ontology_events(&self, batch: &OntologyEventBatch) -> Result<(), DramError>;
}

#[derive(Clone)]
pub struct OntologyHttpClient {
    rpc: RpcClient,
}

impl OntologyHttpClient {
    pub fn new(url: &str, token: Option<&str>) -> Result<Self, DramError> {
        Ok(Self {
            rpc: RpcClient::new("annotation_ontology_api", url, token)?.with_service_ver("beta"),
        })
    }
}

impl OntologyClient for OntologyHttpClient {
    fn add_annotation_ontology_events(&self, batch: &OntologyEventBatch) -> Result<(), DramError> {
        let _: Value = self.rpc.call("add_annotation_ontology_events", batch)?;
        Ok(())
    }
}

/// ID a term is attached to in the genome the event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKey {
    /// DRAM's gene ID; genomes built from DRAM gene calls use it as feature ID.
    GeneId,
    /// The input genome's own feature ID, without DRAM's `<fasta>_` prefix.
    SourceFeature,
}

impl FeatureKey {
    pub fn for_kind(kind: InputKind) -> Self {
        if kind.is_called_genes() {
            FeatureKey::SourceFeature
        } else {
            FeatureKey::GeneId
        }
    }

    pub fn key<'a>(&self, row: &'a AnnotationRow) -> &'a str {
        match self {
            FeatureKey::GeneId => &row.gene_id,
            FeatureKey::SourceFeature => row.feature_id(),
        }
    }
}

pub struct EventContext<'a> {
    pub description: &'a str,
    pub version: &'a str,
    pub workspace: &'a str,
    pub workspace_url: &'a str,
    pub timestamp: String,
    pub feature_key: FeatureKey,
}

/// One batch per genome in `refs`, in name order. A genome without terms
/// gets a batch with no events.
pub fn build_ontology_events(
    table: &AnnotationTable,
    refs: &GenomeRefMap,
    context: &EventContext<'_>,
) -> Result<Vec<OntologyEventBatch>, DramError> {
    let groups = table.group_by("fasta")?;
    let mut batches = Vec::with_capacity(refs.len());
    for (name, genome_ref) in refs.iter() {
        let rows: &[&AnnotationRow] = match groups.get(name) {
            Some(rows) => rows.as_slice(),
            None => {
                tracing::warn!(genome = name, "no annotation rows for genome");
                &[]
            }
        };

        let events = Ontology::ALL
            .iter()
            .filter_map(|ontology| {
                let mut terms = BTreeMap::<String, Vec<OntologyTerm>>::new();
                for row in rows {
                    let ids = ontology.terms(row);
                    if ids.is_empty() {
                        continue;
                    }
                    terms
                        .entry(context.feature_key.key(row).to_string())
                        .or_default()
                        .extend(ids.iter().map(|id| OntologyTerm {
                            term: ontology.term_id(id),
                        }));
                }
                (!terms.is_empty()).then(|| OntologyEvent {
                    event_id: format!("DRAM:{}:{}", ontology.id(), context.timestamp),
                    description: format!("{} {}", context.description, ontology.id()),
                    ontology_id: ontology.id().to_string(),
                    method: "DRAM".to_string(),
                    method_version: context.version.to_string(),
                    timestamp: context.timestamp.clone(),
                    ontology_terms: terms,
                })
            })
            .collect::<Vec<_>>();

        if events.is_empty() {
            tracing::info!(genome = name, "no ontology terms for genome");
        }
        batches.push(OntologyEventBatch {
            input_ref: genome_ref.clone(),
            input_workspace: context.workspace.to_string(),
            workspace_url: context.workspace_url.to_string(),
            events,
            save: 1,
        });
    }
    Ok(batches)
}

/// Submits each batch on its own. A failure stops the loop; batches already
/// accepted stay accepted.
pub fn publish<O: OntologyClient>(
    client: &O,
    batches: &[OntologyEventBatch],
) -> Result<usize, DramError> {
    for batch in batches {
        tracing::info!(genome = %batch.input_ref, terms = batch.term_count(), "ontology.submit");
        client.add_annotation_ontology_events(batch)?;
    }
    Ok(batches.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(gene_id: &str, fields: &[(&str, &str)]) -> AnnotationRow {
        AnnotationRow::new(
            gene_id,
            fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    #[test]
    fn terms_from_dram_columns() {
        let row = row(
            "g1",
            &[
                ("ko_id", "K00001,K00002"),
                ("kegg_hit", "alcohol dehydrogenase [EC:1.1.1.1 1.1.1.-] [EC:1.1.1.2]"),
                ("pfam_hits", "ADH zinc-binding [PF00107.29]; ADH N [PF08240.15]"),
                ("cazy_hits", "GH13_14 alpha-amylase; CBM48"),
                ("peptidase_family", "S08A"),
            ],
        );
        assert_eq!(Ontology::Ko.terms(&row), vec!["K00001", "K00002"]);
        assert_eq!(Ontology::Ec.terms(&row), vec!["1.1.1.1", "1.1.1.-", "1.1.1.2"]);
        assert_eq!(Ontology::Pfam.terms(&row), vec!["PF00107", "PF08240"]);
        assert_eq!(Ontology::Cazy.terms(&row), vec!["GH13_14", "CBM48"]);
        assert_eq!(Ontology::Merops.terms(&row), vec!["S08A"]);
        assert_eq!(Ontology::Ko.term_id("K00001"), "KO:K00001");
    }

    #[test]
    fn every_ec_number_in_a_bracket() {
        let polymerase = row("g2", &[("kegg_hit", "DNA polymerase [EC:2.7.7.7 3.1.11.1]")]);
        assert_eq!(Ontology::Ec.terms(&polymerase), vec!["2.7.7.7", "3.1.11.1"]);

        let noisy = row(
            "g3",
            &[("kegg_hit", "ligase [EC:6.5.1.n2 see text] [EC:6.5.1.2 6.5.1.2]")],
        );
        assert_eq!(Ontology::Ec.terms(&noisy), vec!["6.5.1.n2", "6.5.1.2"]);
        assert!(Ontology::Ec.terms(&row("g4", &[("kegg_hit", "EC:1.1.1.1")])).is_empty());
    }

    fn context(feature_key: FeatureKey) -> EventContext<'static> {
        EventContext {
            description: "annotated bins",
            version: "0.0.2",
            workspace: "ws",
            workspace_url: "https://ws",
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            feature_key,
        }
    }

    fn two_genomes() -> (AnnotationTable, GenomeRefMap) {
        let table = AnnotationTable::new(
            vec!["fasta".to_string(), "ko_id".to_string()],
            vec![
                row("bin_1_k1_1", &[("fasta", "bin_1"), ("ko_id", "K00001")]),
                row("bin_1_k1_2", &[("fasta", "bin_1")]),
                row("bin_2_k7_1", &[("fasta", "bin_2")]),
            ],
        );
        let mut refs = GenomeRefMap::new();
        refs.insert("bin_1", "1/10/1".parse().unwrap());
        refs.insert("bin_2", "1/11/1".parse().unwrap());
        (table, refs)
    }

    #[test]
    fn events_keyed_by_dram_gene_id() {
        let (table, refs) = two_genomes();
        let batches = build_ontology_events(&table, &refs, &context(FeatureKey::GeneId)).unwrap();
        let batch = &batches[0];
        assert_eq!(batch.input_ref.as_str(), "1/10/1");
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].ontology_id, "KO");
        assert_eq!(
            batch.events[0].ontology_terms["bin_1_k1_1"],
            vec![OntologyTerm {
                term: "KO:K00001".to_string()
            }]
        );
        assert_eq!(batch.term_count(), 1);

        let value = serde_json::to_value(batch).unwrap();
        assert_eq!(value["workspace-url"], "https://ws");
    }

    #[test]
    fn events_keyed_by_source_feature_id() {
        let (table, refs) = two_genomes();
        let batches =
            build_ontology_events(&table, &refs, &context(FeatureKey::SourceFeature)).unwrap();
        let keys = batches[0].events[0]
            .ontology_terms
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["k1_1"]);
        assert_eq!(FeatureKey::for_kind(InputKind::GenomeSet), FeatureKey::SourceFeature);
        assert_eq!(FeatureKey::for_kind(InputKind::Assembly), FeatureKey::GeneId);
    }

    #[test]
    fn genome_without_terms_still_gets_a_batch() {
        let (table, mut refs) = two_genomes();
        refs.insert("bin_3", "1/12/1".parse().unwrap());
        let batches = build_ontology_events(&table, &refs, &context(FeatureKey::GeneId)).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].input_ref.as_str(), "1/11/1");
        assert!(batches[1].events.is_empty());
        assert_eq!(batches[2].input_ref.as_str(), "1/12/1");
        assert!(batches[2].events.is_empty());
        assert_eq!(batches[2].term_count(), 0);
    }
}
