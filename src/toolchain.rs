//! Driver for the external DRAM toolchain.
//!
//! DRAM runs as a child process. Everything it needs (database locations,
//! thresholds, worker count) is passed explicitly per call; nothing is set
//! process-wide.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use crate::annotations::read_header;
use crate::config::DatabaseSettings;
use crate::domain::InputKind;
use crate::error::DramError;
use crate::params::Thresholds;

pub const DISTILL_DIR: &str = "distilled";

/// Verified database locations for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub config_path: Utf8PathBuf,
    pub description_db: Utf8PathBuf,
}

pub struct DatabaseLocator;

impl DatabaseLocator {
    pub fn locate(settings: &DatabaseSettings) -> Result<DatabaseConfig, DramError> {
        for path in [&settings.config_path, &settings.description_db] {
            if !path.as_std_path().is_file() {
                return Err(DramError::MissingDatabase(path.as_std_path().to_path_buf()));
            }
        }
        tracing::info!(
            config = %settings.config_path,
            description_db = %settings.description_db,
            "dram.databases"
        );
        Ok(DatabaseConfig {
            config_path: settings.config_path.clone(),
            description_db: settings.description_db.clone(),
        })
    }
}

impl DatabaseConfig {
    /// Writes a copy of the DRAM config into `dir` with the description
    /// database pointed at this job's location, returning the copy's path.
    /// Configs that are not JSON are used as they are.
    pub fn materialize(&self, dir: &Utf8Path) -> Result<Utf8PathBuf, DramError> {
        let content = fs::read_to_string(self.config_path.as_std_path())
            .map_err(|err| DramError::Filesystem(format!("read {}: {err}", self.config_path)))?;
        let Ok(Value::Object(mut config)) = serde_json::from_str::<Value>(&content) else {
            tracing::warn!(config = %self.config_path, "dram.config not JSON; using as-is");
            return Ok(self.config_path.clone());
        };
        config.insert(
            "description_db".to_string(),
            Value::String(self.description_db.to_string()),
        );
        fs::create_dir_all(dir.as_std_path()).map_err(|err| DramError::Filesystem(err.to_string()))?;
        let path = dir.join("dram_config.json");
        let bytes = serde_json::to_vec_pretty(&Value::Object(config))
            .map_err(|err| DramError::Filesystem(err.to_string()))?;
        fs::write(path.as_std_path(), bytes).map_err(|err| DramError::Filesystem(err.to_string()))?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    pub databases: DatabaseConfig,
    pub min_contig_size: u64,
    pub thresholds: Thresholds,
    pub threads: usize,
}

#[derive(Debug, Clone)]
pub struct DistillRequest<'a> {
    pub annotations: &'a AnnotationBundle,
    pub output_dir: &'a Utf8Path,
    pub groupby_column: &'a str,
    pub viral: bool,
    pub databases: &'a DatabaseConfig,
}

pub trait Toolchain: Send + Sync {
    /// Gene calling and annotation of raw contig FASTAs.
    fn annotate_bins(
        &self,
        fastas: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        options: &AnnotateOptions,
    ) -> Result<(), DramError>;

    /// Annotation of already called protein sequences.
    fn annotate_called_genes(
        &self,
        faas: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        options: &AnnotateOptions,
    ) -> Result<(), DramError>;

    /// DRAM-v annotation of virus-sorted contigs with their affiliation file.
    fn annotate_viral(
        &self,
        fastas: &[Utf8PathBuf],
        affiliation: &Utf8Path,
        output_dir: &Utf8Path,
        options: &AnnotateOptions,
    ) -> Result<(), DramError>;

    fn distill(&self, request: &DistillRequest<'_>) -> Result<(), DramError>;
}

/// Runs `DRAM.py` / `DRAM-v.py` found on `PATH`.
#[derive(Debug, Clone)]
pub struct DramCommand {
    dram: Option<PathBuf>,
    dram_v: Option<PathBuf>,
}

impl Default for DramCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl DramCommand {
    pub fn new() -> Self {
        Self {
            dram: find_in_path("DRAM.py"),
            dram_v: find_in_path("DRAM-v.py"),
        }
    }

    fn require_dram(&self) -> Result<&PathBuf, DramError> {
        self.dram
            .as_ref()
            .ok_or_else(|| DramError::MissingTool("DRAM.py".to_string()))
    }

    fn require_dram_v(&self) -> Result<&PathBuf, DramError> {
        self.dram_v
            .as_ref()
            .ok_or_else(|| DramError::MissingTool("DRAM-v.py".to_string()))
    }

    fn run_cmd(
        &self,
        program: &Path,
        args: &[String],
        databases: &DatabaseConfig,
        work_dir: &Utf8Path,
    ) -> Result<(), DramError> {
        let config = databases.materialize(work_dir)?;
        tracing::info!(program = %program.display(), args = ?args, "dram.run");
        let output = Command::new(program)
            .args(args)
            .env("DRAM_CONFIG_LOCATION", config.as_std_path())
            .output()
            .map_err(|err| DramError::ToolchainFailed(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(DramError::ToolchainFailed(message))
    }
}

impl Toolchain for DramCommand {
    fn annotate_bins(
        &self,
        fastas: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        options: &AnnotateOptions,
    ) -> Result<(), DramError> {
        let dram = self.require_dram()?;
        let mut args = vec![
            "annotate".to_string(),
            "-i".to_string(),
            input_glob(fastas)?,
            "-o".to_string(),
            output_dir.to_string(),
            "--min_contig_size".to_string(),
            options.min_contig_size.to_string(),
            "--trans_table".to_string(),
            options.thresholds.trans_table.to_string(),
        ];
        args.extend(common_annotate_args(options));
        args.push("--low_mem_mode".to_string());
        self.run_cmd(dram, &args, &options.databases, &work_dir(output_dir))
    }

    fn annotate_called_genes(
        &self,
        faas: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        options: &AnnotateOptions,
    ) -> Result<(), DramError> {
        let dram = self.require_dram()?;
        let mut args = vec![
            "annotate_genes".to_string(),
            "-i".to_string(),
            input_glob(faas)?,
            "-o".to_string(),
            output_dir.to_string(),
        ];
        args.extend(common_annotate_args(options));
        args.push("--low_mem_mode".to_string());
        self.run_cmd(dram, &args, &options.databases, &work_dir(output_dir))
    }

    fn annotate_viral(
        &self,
        fastas: &[Utf8PathBuf],
        affiliation: &Utf8Path,
        output_dir: &Utf8Path,
        options: &AnnotateOptions,
    ) -> Result<(), DramError> {
        let dram_v = self.require_dram_v()?;
        let [fasta] = fastas else {
            return Err(DramError::ToolchainFailed(format!(
                "DRAM-v annotates one contig file per run, got {}",
                fastas.len()
            )));
        };
        let mut args = vec![
            "annotate".to_string(),
            "-i".to_string(),
            fasta.to_string(),
            "-v".to_string(),
            affiliation.to_string(),
            "-o".to_string(),
            output_dir.to_string(),
            "--min_contig_size".to_string(),
            options.min_contig_size.to_string(),
            "--trans_table".to_string(),
            options.thresholds.trans_table.to_string(),
        ];
        args.extend(common_annotate_args(options));
        self.run_cmd(dram_v, &args, &options.databases, &work_dir(output_dir))
    }

    fn distill(&self, request: &DistillRequest<'_>) -> Result<(), DramError> {
        let mut args = vec![
            "distill".to_string(),
            "-i".to_string(),
            request.annotations.annotations.to_string(),
            "-o".to_string(),
            request.output_dir.to_string(),
        ];
        if let Some(trnas) = &request.annotations.trnas {
            args.extend(["--trna_path".to_string(), trnas.to_string()]);
        }
        if let Some(rrnas) = &request.annotations.rrnas {
            args.extend(["--rrna_path".to_string(), rrnas.to_string()]);
        }
        let program = if request.viral {
            self.require_dram_v()?
        } else {
            args.extend([
                "--groupby_column".to_string(),
                request.groupby_column.to_string(),
            ]);
            self.require_dram()?
        };
        self.run_cmd(
            program,
            &args,
            request.databases,
            &work_dir(&request.annotations.output_dir),
        )
    }
}

fn common_annotate_args(options: &AnnotateOptions) -> Vec<String> {
    vec![
        "--bit_score_threshold".to_string(),
        options.thresholds.bitscore.to_string(),
        "--rbh_bit_score_threshold".to_string(),
        options.thresholds.rbh_bitscore.to_string(),
        "--threads".to_string(),
        options.threads.to_string(),
    ]
}

// DRAM expands its `-i` argument as a glob; staged files share one directory
// and extension.
fn input_glob(paths: &[Utf8PathBuf]) -> Result<String, DramError> {
    let first = paths
        .first()
        .ok_or_else(|| DramError::ToolchainFailed("no input files staged".to_string()))?;
    let parent = first.parent().unwrap_or_else(|| Utf8Path::new("."));
    let extension = first.extension().unwrap_or_default();
    let uniform = paths
        .iter()
        .all(|path| path.parent() == Some(parent) && path.extension().unwrap_or_default() == extension);
    if !uniform {
        return Err(DramError::ToolchainFailed(
            "staged inputs must share a directory and extension".to_string(),
        ));
    }
    if paths.len() == 1 {
        return Ok(first.to_string());
    }
    Ok(format!("{parent}/*.{extension}"))
}

fn work_dir(output_dir: &Utf8Path) -> Utf8PathBuf {
    let name = output_dir.file_name().unwrap_or("DRAM");
    output_dir
        .parent()
        .unwrap_or_else(|| Utf8Path::new("."))
        .join(format!(".{name}_config"))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// First of `base`, `base_1`, `base_2`, ... that does not exist yet. The
/// directory is not created, so two concurrent jobs can still race here.
pub fn unique_output_dir(base: &Utf8Path) -> Utf8PathBuf {
    if !base.as_std_path().exists() {
        return base.to_path_buf();
    }
    let mut counter = 1usize;
    loop {
        let candidate = Utf8PathBuf::from(format!("{base}_{counter}"));
        if !candidate.as_std_path().exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Concatenates affiliation shards into one file at `destination`.
pub fn merge_affiliation_files(
    shards: &[Utf8PathBuf],
    destination: &Utf8Path,
) -> Result<Utf8PathBuf, DramError> {
    let mut merged =
        fs::File::create(destination.as_std_path()).map_err(|err| DramError::Filesystem(err.to_string()))?;
    for shard in shards {
        let content = fs::read(shard.as_std_path())
            .map_err(|err| DramError::Filesystem(format!("read {shard}: {err}")))?;
        merged
            .write_all(&content)
            .map_err(|err| DramError::Filesystem(err.to_string()))?;
        if !content.is_empty() && !content.ends_with(b"\n") {
            merged
                .write_all(b"\n")
                .map_err(|err| DramError::Filesystem(err.to_string()))?;
        }
    }
    Ok(destination.to_path_buf())
}

/// A file DRAM wrote, with the label shown in the report.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub path: Utf8PathBuf,
    pub description: String,
}

/// Files of one annotation run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationBundle {
    pub output_dir: Utf8PathBuf,
    pub annotations: Utf8PathBuf,
    pub trnas: Option<Utf8PathBuf>,
    pub rrnas: Option<Utf8PathBuf>,
    pub genes_fna: Option<Utf8PathBuf>,
    pub genes_faa: Option<Utf8PathBuf>,
    pub genes_gff: Option<Utf8PathBuf>,
    pub scaffolds: Option<Utf8PathBuf>,
}

impl AnnotationBundle {
    pub fn discover(output_dir: &Utf8Path, kind: InputKind) -> Result<Self, DramError> {
        let bundle = Self {
            output_dir: output_dir.to_path_buf(),
            annotations: require(output_dir.join("annotations.tsv"))?,
            trnas: existing(output_dir.join("trnas.tsv")),
            rrnas: existing(output_dir.join("rrnas.tsv")),
            genes_fna: existing(output_dir.join("genes.fna")),
            genes_faa: existing(output_dir.join("genes.faa")),
            genes_gff: existing(output_dir.join("genes.gff")),
            scaffolds: existing(output_dir.join("scaffolds.fna")),
        };
        match kind {
            InputKind::Assembly => {
                bundle.required_fna()?;
                bundle.required_faa()?;
            }
            InputKind::Genome | InputKind::GenomeSet => {
                bundle.required_faa()?;
            }
            InputKind::ViralContigs => {}
        }
        Ok(bundle)
    }

    pub fn required_fna(&self) -> Result<&Utf8Path, DramError> {
        self.genes_fna
            .as_deref()
            .ok_or_else(|| DramError::MissingOutput(self.output_dir.join("genes.fna").into()))
    }

    pub fn required_faa(&self) -> Result<&Utf8Path, DramError> {
        self.genes_faa
            .as_deref()
            .ok_or_else(|| DramError::MissingOutput(self.output_dir.join("genes.faa").into()))
    }

    pub fn files(&self) -> Vec<OutputFile> {
        let mut files = vec![OutputFile {
            path: self.annotations.clone(),
            description: "DRAM annotations".to_string(),
        }];
        let optional = [
            (&self.trnas, "tRNA annotations"),
            (&self.rrnas, "rRNA annotations"),
            (&self.genes_fna, "Called gene nucleotide sequences"),
            (&self.genes_faa, "Called gene protein sequences"),
            (&self.genes_gff, "Called gene locations"),
            (&self.scaffolds, "Scaffolds"),
        ];
        for (path, description) in optional {
            if let Some(path) = path {
                files.push(OutputFile {
                    path: path.clone(),
                    description: description.to_string(),
                });
            }
        }
        files
    }
}

/// Files of one distillation run, on top of the annotation files it read.
#[derive(Debug, Clone, PartialEq)]
pub struct DistillBundle {
    pub annotation: AnnotationBundle,
    pub distill_dir: Utf8PathBuf,
    pub product_html: Utf8PathBuf,
    pub summaries: Vec<OutputFile>,
}

impl DistillBundle {
    pub fn discover(distill_dir: &Utf8Path, annotation: AnnotationBundle) -> Result<Self, DramError> {
        let product_html = require(distill_dir.join("product.html"))?;
        let candidates = [
            ("genome_stats.tsv", "Genome statistics"),
            ("metabolism_summary.xlsx", "Metabolism summary"),
            ("product.tsv", "Product table"),
            ("amg_summary.tsv", "Auxiliary metabolic gene summary"),
            ("vMAG_stats.tsv", "Viral genome statistics"),
        ];
        let summaries = candidates
            .into_iter()
            .filter_map(|(name, description)| {
                existing(distill_dir.join(name)).map(|path| OutputFile {
                    path,
                    description: description.to_string(),
                })
            })
            .collect();
        Ok(Self {
            annotation,
            distill_dir: distill_dir.to_path_buf(),
            product_html,
            summaries,
        })
    }

    pub fn files(&self) -> Vec<OutputFile> {
        let mut files = self.annotation.files();
        files.extend(self.summaries.iter().cloned());
        files.push(OutputFile {
            path: self.product_html.clone(),
            description: "Distillate product".to_string(),
        });
        files
    }
}

/// Checks the grouping column exists before handing the table to distill.
pub fn check_groupby_column(annotations: &Utf8Path, column: &str) -> Result<(), DramError> {
    let header = read_header(annotations)?;
    if header.iter().skip(1).any(|name| name == column) {
        Ok(())
    } else {
        Err(DramError::MissingColumn(column.to_string()))
    }
}

fn require(path: Utf8PathBuf) -> Result<Utf8PathBuf, DramError> {
    if path.as_std_path().is_file() {
        Ok(path)
    } else {
        Err(DramError::MissingOutput(path.into()))
    }
}

fn existing(path: Utf8PathBuf) -> Option<Utf8PathBuf> {
    path.as_std_path().is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn utf8_dir(temp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn output_dir_suffixes_monotonically() {
        let temp = tempfile::tempdir().unwrap();
        let base = utf8_dir(&temp).join("DRAM_annos");
        assert_eq!(unique_output_dir(&base), base);
        assert_eq!(unique_output_dir(&base), base);

        fs::create_dir_all(base.as_std_path()).unwrap();
        let first = unique_output_dir(&base);
        assert_eq!(first.as_str(), format!("{base}_1"));
        fs::create_dir_all(first.as_std_path()).unwrap();
        assert_eq!(unique_output_dir(&base).as_str(), format!("{base}_2"));
    }

    #[test]
    fn locator_requires_both_files() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);
        let settings = DatabaseSettings {
            config_path: dir.join("CONFIG"),
            description_db: dir.join("description_db.sqlite"),
        };
        assert_matches!(
            DatabaseLocator::locate(&settings),
            Err(DramError::MissingDatabase(_))
        );
        fs::write(settings.config_path.as_std_path(), "{}").unwrap();
        fs::write(settings.description_db.as_std_path(), "").unwrap();
        let config = DatabaseLocator::locate(&settings).unwrap();
        assert_eq!(config.config_path, settings.config_path);
    }

    #[test]
    fn materialized_config_points_at_description_db() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);
        let config_path = dir.join("CONFIG");
        fs::write(
            config_path.as_std_path(),
            r#"{"kegg": null, "description_db": "/old/description_db.sqlite"}"#,
        )
        .unwrap();
        let config = DatabaseConfig {
            config_path,
            description_db: dir.join("description_db.sqlite"),
        };
        let written = config.materialize(&dir.join("job")).unwrap();
        let value: Value =
            serde_json::from_str(&fs::read_to_string(written.as_std_path()).unwrap()).unwrap();
        assert_eq!(value["description_db"], dir.join("description_db.sqlite").as_str());
    }

    #[test]
    fn glob_for_staged_inputs() {
        let paths = vec![
            Utf8PathBuf::from("/scratch/staged/bin_1.fa"),
            Utf8PathBuf::from("/scratch/staged/bin_2.fa"),
        ];
        assert_eq!(input_glob(&paths).unwrap(), "/scratch/staged/*.fa");
        assert_eq!(input_glob(&paths[..1]).unwrap(), "/scratch/staged/bin_1.fa");
        let mixed = vec![
            Utf8PathBuf::from("/a/bin_1.fa"),
            Utf8PathBuf::from("/b/bin_2.fa"),
        ];
        assert!(input_glob(&mixed).is_err());
    }

    #[test]
    fn affiliation_shards_are_concatenated() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);
        let a = dir.join("a.tab");
        let b = dir.join("b.tab");
        fs::write(a.as_std_path(), ">contig_1|3|l\nrow").unwrap();
        fs::write(b.as_std_path(), ">contig_2|1|c\nrow\n").unwrap();
        let merged = merge_affiliation_files(&[a, b], &dir.join("affi-contigs.tab")).unwrap();
        assert_eq!(
            fs::read_to_string(merged.as_std_path()).unwrap(),
            ">contig_1|3|l\nrow\n>contig_2|1|c\nrow\n"
        );
    }

    #[test]
    fn bundle_requires_gene_files_for_assemblies() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);
        fs::write(dir.join("annotations.tsv").as_std_path(), "\tfasta\n").unwrap();
        fs::write(dir.join("genes.faa").as_std_path(), ">g\nM\n").unwrap();
        assert_matches!(
            AnnotationBundle::discover(&dir, InputKind::Assembly),
            Err(DramError::MissingOutput(_))
        );
        let bundle = AnnotationBundle::discover(&dir, InputKind::GenomeSet).unwrap();
        assert_eq!(bundle.files().len(), 2);
        check_groupby_column(&bundle.annotations, "fasta").unwrap();
        assert_matches!(
            check_groupby_column(&bundle.annotations, "scaffold"),
            Err(DramError::MissingColumn(_))
        );
    }
}
