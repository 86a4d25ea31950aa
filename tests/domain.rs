use assert_matches::assert_matches;
use serde_json::json;

use kb_dram::domain::{InputKind, ObjectRef};
use kb_dram::error::DramError;
use kb_dram::params::{
    AnnotateGenomeParams, AnnotateViralParams, JobSpec, JobVariant, RawParams,
};

fn raw(value: serde_json::Value) -> RawParams {
    value.as_object().cloned().unwrap()
}

#[test]
fn variants_accept_only_their_inputs() {
    assert_eq!(
        JobVariant::Assembly
            .input_kind(InputKind::Assembly, "KBaseGenomeAnnotations.Assembly-6.0")
            .unwrap(),
        InputKind::Assembly
    );
    assert_eq!(
        JobVariant::Viral
            .input_kind(InputKind::Assembly, "KBaseGenomeAnnotations.Assembly-6.0")
            .unwrap(),
        InputKind::ViralContigs
    );
    assert_eq!(
        JobVariant::Genome
            .input_kind(InputKind::GenomeSet, "KBaseSearch.GenomeSet-2.1")
            .unwrap(),
        InputKind::GenomeSet
    );
    assert_matches!(
        JobVariant::Assembly.input_kind(InputKind::Genome, "KBaseGenomes.Genome-17.0"),
        Err(DramError::UnsupportedInput(_))
    );
}

#[test]
fn grouping_column_by_kind() {
    assert_eq!(InputKind::Assembly.groupby_column(), "fasta");
    assert_eq!(InputKind::GenomeSet.groupby_column(), "fasta");
    assert_eq!(InputKind::ViralContigs.groupby_column(), "scaffold");
    assert!(InputKind::Genome.is_called_genes());
    assert!(!InputKind::Assembly.is_called_genes());
}

#[test]
fn job_specs_derive_output_names() {
    let genome = AnnotateGenomeParams::validate(&raw(json!({
        "genome_input_ref": "12/3/4",
        "workspace_name": "ws"
    })))
    .unwrap();
    let spec = JobSpec::from(genome);
    assert_eq!(spec.output_name, "12_3_4_DRAM");
    assert_eq!(spec.description, "DRAM annotations");

    let viral = AnnotateViralParams::validate(&raw(json!({
        "assembly_input_ref": "12/3/4",
        "output_name": "",
        "min_contig_size": 1000,
        "affi_contigs_shock_id": "abc",
        "workspace_name": "ws"
    })))
    .unwrap();
    let spec = JobSpec::from(viral);
    assert_eq!(spec.output_name, "12_3_4_DRAM-v");
    assert_eq!(spec.affi_contigs_shock_ids, vec!["abc".to_string()]);
    assert_eq!(spec.input_ref, "12/3/4".parse::<ObjectRef>().unwrap());
}
