use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::annotations::AnnotationTable;
use crate::config::{ResolvedConfig, read_module_version};
use crate::domain::InputKind;
use crate::error::DramError;
use crate::file_util::FileUtilClient;
use crate::genome::{MaterializeRequest, materialize};
use crate::ontology::{
    EventContext, FeatureKey, OntologyClient, build_ontology_events, publish,
};
use crate::params::{
    AnnotateAssemblyParams, AnnotateGenomeParams, AnnotateViralParams, JobSpec, RawParams,
};
use crate::report::{CreatedObject, ReportClient, ReportRequest, build_report};
use crate::staging::{GenomeRefMap, InputStager};
use crate::toolchain::{
    AnnotateOptions, AnnotationBundle, DISTILL_DIR, DatabaseLocator, DistillBundle, DistillRequest,
    Toolchain, check_groupby_column, unique_output_dir,
};
use crate::workspace::WorkspaceClient;

pub const MODULE_NAME: &str = "kb_DRAM";
pub const METHOD_ANNOTATE: &str = "run_kb_dram_annotate";
pub const METHOD_ANNOTATE_GENOME: &str = "run_kb_dram_annotate_genome";
pub const METHOD_ANNOTATE_VIRAL: &str = "run_kb_dramv_annotate";
pub const METHOD_STATUS: &str = "status";

const GIT_COMMIT_HASH: Option<&str> = option_env!("KB_DRAM_GIT_COMMIT");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResult {
    pub report_name: String,
    pub report_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub state: String,
    pub message: String,
    pub version: String,
    pub git_url: String,
    pub git_commit_hash: String,
}

/// Per-job context handed in by the job runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobContext {
    pub provenance: Vec<Value>,
}

impl JobContext {
    /// Provenance from the runner when given, else a single action naming
    /// this method and its parameters.
    pub fn new(provenance: Option<Vec<Value>>, method: &str, params: &Value) -> Self {
        let provenance = provenance
            .filter(|actions| !actions.is_empty())
            .unwrap_or_else(|| {
                vec![json!({
                    "service": MODULE_NAME,
                    "method": method,
                    "method_params": [params],
                })]
            });
        Self { provenance }
    }
}

pub fn status() -> StatusResult {
    StatusResult {
        state: "OK".to_string(),
        message: String::new(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_url: env!("CARGO_PKG_REPOSITORY").to_string(),
        git_commit_hash: GIT_COMMIT_HASH.unwrap_or("unknown").to_string(),
    }
}

#[derive(Clone)]
pub struct App<W, F, T, O, R>
where
    W: WorkspaceClient,
    F: FileUtilClient,
    T: Toolchain,
    O: OntologyClient,
    R: ReportClient,
{
    config: ResolvedConfig,
    workspace: W,
    files: F,
    toolchain: T,
    ontology: O,
    reports: R,
}

impl<W, F, T, O, R> App<W, F, T, O, R>
where
    W: WorkspaceClient,
    F: FileUtilClient,
    T: Toolchain,
    O: OntologyClient,
    R: ReportClient,
{
    pub fn new(
        config: ResolvedConfig,
        workspace: W,
        files: F,
        toolchain: T,
        ontology: O,
        reports: R,
    ) -> Self {
        Self {
            config,
            workspace,
            files,
            toolchain,
            ontology,
            reports,
        }
    }

    pub fn annotate_assembly(
        &self,
        params: &RawParams,
        ctx: &JobContext,
    ) -> Result<ReportResult, DramError> {
        let job = AnnotateAssemblyParams::validate(params)?;
        self.run(job.into(), ctx)
    }

    pub fn annotate_genome(
        &self,
        params: &RawParams,
        ctx: &JobContext,
    ) -> Result<ReportResult, DramError> {
        let job = AnnotateGenomeParams::validate(params)?;
        self.run(job.into(), ctx)
    }

    pub fn annotate_viral(
        &self,
        params: &RawParams,
        ctx: &JobContext,
    ) -> Result<ReportResult, DramError> {
        let job = AnnotateViralParams::validate(params)?;
        self.run(job.into(), ctx)
    }

    /// Routes a JSON-RPC method to its entry point and wraps the result in
    /// the single-element list the job runner expects.
    pub fn dispatch(
        &self,
        method: &str,
        params: &[Value],
        ctx: &JobContext,
    ) -> Result<Value, DramError> {
        let method = method
            .strip_prefix(MODULE_NAME)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(method);
        if method == METHOD_STATUS {
            return encode(&status());
        }

        let raw = match params.first() {
            Some(Value::Object(raw)) => raw,
            _ => return Err(DramError::invalid("params", "expected one parameter object")),
        };
        let result = match method {
            METHOD_ANNOTATE => self.annotate_assembly(raw, ctx)?,
            METHOD_ANNOTATE_GENOME => self.annotate_genome(raw, ctx)?,
            METHOD_ANNOTATE_VIRAL => self.annotate_viral(raw, ctx)?,
            other => return Err(DramError::UnknownMethod(other.to_string())),
        };
        if result.report_name.is_empty() || result.report_ref.is_empty() {
            return Err(DramError::Postcondition(format!(
                "{method} returned an incomplete report"
            )));
        }
        encode(&result)
    }

    fn run(&self, job: JobSpec, ctx: &JobContext) -> Result<ReportResult, DramError> {
        let started = Instant::now();
        tracing::info!(variant = ?job.variant, input = %job.input_ref, "phase=Validate; job accepted");

        let version = read_module_version(&self.config.module_version_file)?;
        let databases = DatabaseLocator::locate(&self.config.databases)?;

        let info = self.workspace.get_object_info(&job.input_ref)?;
        let kind = job
            .variant
            .input_kind(InputKind::from_object_info(&info)?, &info.type_string)?;
        let staging_dir = unique_output_dir(&self.config.scratch.join("DRAM_inputs"));
        let staged = InputStager::new(&self.workspace, &self.files, staging_dir).stage(
            kind,
            &info,
            &job.input_ref,
            &job.affi_contigs_shock_ids,
        )?;

        let output_dir = unique_output_dir(&self.config.scratch.join("DRAM_annos"));
        let options = AnnotateOptions {
            databases: databases.clone(),
            min_contig_size: job.min_contig_size,
            thresholds: job.thresholds,
            threads: self.config.threads,
        };
        tracing::info!(kind = %kind, files = staged.files.len(), output = %output_dir, "phase=Annotate");
        let inputs = staged.paths();
        match kind {
            InputKind::Assembly => self.toolchain.annotate_bins(&inputs, &output_dir, &options)?,
            InputKind::Genome | InputKind::GenomeSet => {
                self.toolchain
                    .annotate_called_genes(&inputs, &output_dir, &options)?
            }
            InputKind::ViralContigs => {
                let affiliation = staged.affiliation.as_deref().ok_or_else(|| {
                    DramError::Postcondition("viral contigs staged without affiliations".to_string())
                })?;
                self.toolchain
                    .annotate_viral(&inputs, affiliation, &output_dir, &options)?
            }
        }
        let annotation = AnnotationBundle::discover(&output_dir, kind)?;

        let groupby_column = kind.groupby_column();
        check_groupby_column(&annotation.annotations, groupby_column)?;
        let distill_dir = output_dir.join(DISTILL_DIR);
        tracing::info!(groupby = groupby_column, output = %distill_dir, "phase=Distill");
        self.toolchain.distill(&DistillRequest {
            annotations: &annotation,
            output_dir: &distill_dir,
            groupby_column,
            viral: kind == InputKind::ViralContigs,
            databases: &databases,
        })?;
        let bundle = DistillBundle::discover(&distill_dir, annotation)?;

        let mut objects = Vec::new();
        let annotated = match kind {
            InputKind::Assembly if job.is_metagenome => {
                tracing::warn!("metagenome assembly; genome objects and ontology events skipped");
                None
            }
            InputKind::Assembly => {
                let table = AnnotationTable::read(&bundle.annotation.annotations)?;
                let sources = staged.ref_map();
                let saved = materialize(
                    &self.workspace,
                    &self.files,
                    &MaterializeRequest {
                        table: &table,
                        genes_fna: bundle.annotation.required_fna()?,
                        genes_faa: bundle.annotation.required_faa()?,
                        sources: &sources,
                        workspace: &job.workspace_name,
                        set_name: &job.output_name,
                        description: &job.description,
                        genetic_code: job.thresholds.trans_table,
                        provenance: &ctx.provenance,
                    },
                )?;
                if saved.genomes.is_empty() {
                    return Err(DramError::Postcondition(
                        "annotation produced no genomes".to_string(),
                    ));
                }
                objects.extend(saved.genomes.iter().map(|(_, genome_ref)| CreatedObject {
                    object_ref: genome_ref.clone(),
                    description: "Annotated Genome".to_string(),
                }));
                if let Some(set_ref) = saved.genome_set {
                    objects.push(CreatedObject {
                        object_ref: set_ref,
                        description: job.description.clone(),
                    });
                }
                Some((table, saved.genomes))
            }
            InputKind::Genome | InputKind::GenomeSet => Some((
                AnnotationTable::read(&bundle.annotation.annotations)?,
                staged.ref_map(),
            )),
            InputKind::ViralContigs => None,
        };

        if let Some((table, refs)) = annotated {
            self.publish_ontology(&table, &refs, kind, &job, &version)?;
        }

        let report = build_report(
            &self.reports,
            ReportRequest {
                workspace: &job.workspace_name,
                output_dir: &output_dir,
                bundle: &bundle,
                objects,
            },
        )?;
        tracing::info!(
            report = %report.object_ref,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "phase=Done"
        );
        Ok(ReportResult {
            report_name: report.name,
            report_ref: report.object_ref.to_string(),
        })
    }

    fn publish_ontology(
        &self,
        table: &AnnotationTable,
        refs: &GenomeRefMap,
        kind: InputKind,
        job: &JobSpec,
        version: &str,
    ) -> Result<(), DramError> {
        let batches = build_ontology_events(
            table,
            refs,
            &EventContext {
                description: &job.description,
                version,
                workspace: &job.workspace_name,
                workspace_url: &self.config.workspace_url,
                timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                feature_key: FeatureKey::for_kind(kind),
            },
        )?;
        tracing::info!(genomes = refs.len(), batches = batches.len(), "phase=Ontology");
        publish(&self.ontology, &batches)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, DramError> {
    let value = serde_json::to_value(value)
        .map_err(|err| DramError::Postcondition(format!("encode result: {err}")))?;
    Ok(Value::Array(vec![value]))
}
