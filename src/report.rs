//! Report Builder: DRAM output archive plus an extended report object.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::ObjectRef;
use crate::error::DramError;
use crate::fs_util::{validate_zip, write_zip};
use crate::rpc::RpcClient;
use crate::toolchain::DistillBundle;

pub const ARCHIVE_NAME: &str = "DRAM_output.zip";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedObject {
    #[serde(rename = "ref")]
    pub object_ref: ObjectRef,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLink {
    pub path: Utf8PathBuf,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtendedReportParams {
    pub message: String,
    pub objects_created: Vec<CreatedObject>,
    pub direct_html_link_index: usize,
    pub html_links: Vec<ReportLink>,
    pub file_links: Vec<ReportLink>,
    pub report_object_name: String,
    pub workspace_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportInfo {
    pub name: String,
    #[serde(rename = "ref")]
    pub object_ref: ObjectRef,
}

pub trait ReportClient: Send + Sync {
    fn create_extended_report(&self, params: &ExtendedReportParams) -> Result<ReportInfo, DramError>;
}

#[derive(Clone)]
pub struct ReportHttpClient {
    rpc: RpcClient,
}

impl ReportHttpClient {
    pub fn new(callback_url: &str, token: Option<&str>) -> Result<Self, DramError> {
        Ok(Self {
            rpc: RpcClient::new("KBaseReport", callback_url, token)?,
        })
    }
}

impl ReportClient for ReportHttpClient {
    fn create_extended_report(&self, params: &ExtendedReportParams) -> Result<ReportInfo, DramError> {
        self.rpc.call("create_extended_report", params)
    }
}

pub struct ReportRequest<'a> {
    pub workspace: &'a str,
    pub output_dir: &'a Utf8Path,
    pub bundle: &'a DistillBundle,
    pub objects: Vec<CreatedObject>,
}

/// Zips every output file, then asks the report service for a report that
/// opens on `product.html`.
pub fn build_report<R: ReportClient>(
    client: &R,
    request: ReportRequest<'_>,
) -> Result<ReportInfo, DramError> {
    let archive = request.output_dir.join(ARCHIVE_NAME);
    let files = request.bundle.files();
    let entries = files
        .iter()
        .map(|file| (archive_name(request.output_dir, &file.path), file.path.as_path()))
        .collect::<Vec<_>>();
    write_zip(&entries, &archive)?;
    let names = entries.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
    let archived = validate_zip(&archive, &names)?;
    tracing::info!(archive = %archive, files = archived, "phase=Report");

    let params = ExtendedReportParams {
        message: format!(
            "DRAM annotated {} and created {} object(s).",
            request.bundle.annotation.output_dir,
            request.objects.len()
        ),
        objects_created: request.objects,
        direct_html_link_index: 0,
        html_links: vec![ReportLink {
            path: request.bundle.distill_dir.clone(),
            name: request
                .bundle
                .product_html
                .file_name()
                .unwrap_or("product.html")
                .to_string(),
            description: "DRAM product".to_string(),
        }],
        file_links: vec![ReportLink {
            path: archive,
            name: ARCHIVE_NAME.to_string(),
            description: "DRAM annotation and distillation output".to_string(),
        }],
        report_object_name: report_object_name(),
        workspace_name: request.workspace.to_string(),
    };
    let info = client.create_extended_report(&params)?;
    tracing::info!(report = %info.object_ref, name = %info.name, "report created");
    Ok(info)
}

fn archive_name(root: &Utf8Path, path: &Utf8Path) -> String {
    path.strip_prefix(root)
        .map(|relative| relative.to_string())
        .unwrap_or_else(|_| path.file_name().unwrap_or(path.as_str()).to_string())
}

fn report_object_name() -> String {
    format!("kb_dram_report_{}", Utc::now().format("%Y%m%d%H%M%S%3f"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use crate::domain::InputKind;
    use crate::toolchain::AnnotationBundle;

    use super::*;

    struct RecordingReports {
        seen: Mutex<Vec<ExtendedReportParams>>,
    }

    impl ReportClient for RecordingReports {
        fn create_extended_report(
            &self,
            params: &ExtendedReportParams,
        ) -> Result<ReportInfo, DramError> {
            self.seen.lock().unwrap().push(params.clone());
            Ok(ReportInfo {
                name: params.report_object_name.clone(),
                object_ref: "9/1/1".parse().unwrap(),
            })
        }
    }

    #[test]
    fn report_links_product_and_archive() {
        let temp = tempfile::tempdir().unwrap();
        let out = Utf8PathBuf::from_path_buf(temp.path().join("DRAM_annos")).unwrap();
        let distilled = out.join("distilled");
        fs::create_dir_all(distilled.as_std_path()).unwrap();
        fs::write(out.join("annotations.tsv").as_std_path(), "\tfasta\n").unwrap();
        fs::write(out.join("genes.faa").as_std_path(), ">g\nM\n").unwrap();
        fs::write(distilled.join("product.html").as_std_path(), "<html/>").unwrap();
        fs::write(distilled.join("genome_stats.tsv").as_std_path(), "genome\n").unwrap();

        let annotation = AnnotationBundle::discover(&out, InputKind::Genome).unwrap();
        let bundle = DistillBundle::discover(&distilled, annotation).unwrap();
        let client = RecordingReports {
            seen: Mutex::new(Vec::new()),
        };
        let info = build_report(
            &client,
            ReportRequest {
                workspace: "ws",
                output_dir: &out,
                bundle: &bundle,
                objects: vec![CreatedObject {
                    object_ref: "1/2/3".parse().unwrap(),
                    description: "Annotated Genome".to_string(),
                }],
            },
        )
        .unwrap();

        assert_eq!(info.object_ref.as_str(), "9/1/1");
        let seen = client.seen.lock().unwrap();
        let params = &seen[0];
        assert_eq!(params.workspace_name, "ws");
        assert_eq!(params.html_links[0].name, "product.html");
        assert_eq!(params.html_links[0].path, distilled);
        assert_eq!(params.file_links[0].name, ARCHIVE_NAME);
        assert_eq!(params.objects_created.len(), 1);
        assert!(params.report_object_name.starts_with("kb_dram_report_"));
        assert_eq!(
            validate_zip(
                &out.join(ARCHIVE_NAME),
                &[
                    "annotations.tsv",
                    "genes.faa",
                    "distilled/genome_stats.tsv",
                    "distilled/product.html"
                ]
            )
            .unwrap(),
            4
        );
    }

    #[test]
    fn archive_names_are_relative() {
        let root = Utf8Path::new("/scratch/DRAM_annos");
        assert_eq!(
            archive_name(root, Utf8Path::new("/scratch/DRAM_annos/distilled/product.tsv")),
            "distilled/product.tsv"
        );
        assert_eq!(archive_name(root, Utf8Path::new("/elsewhere/x.tsv")), "x.tsv");
    }
}
