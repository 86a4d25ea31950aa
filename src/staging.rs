//! Input staging: workspace reference in, local sequence files out.
//!
//! DRAM names every genome after its input file's stem and writes that name
//! into the `fasta` column of its tables, so the stem is the join key back to
//! the workspace object. Stems are allocated here, once, and carried
//! downstream in a [`GenomeRefMap`].

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use serde_json::Value;

use crate::domain::{InputKind, ObjectInfo, ObjectRef};
use crate::error::DramError;
use crate::file_util::FileUtilClient;
use crate::toolchain::merge_affiliation_files;
use crate::workspace::WorkspaceClient;

/// Logical genome name → workspace reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenomeRefMap(BTreeMap<String, ObjectRef>);

impl GenomeRefMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, object_ref: ObjectRef) {
        self.0.insert(name.into(), object_ref);
    }

    pub fn get(&self, name: &str) -> Option<&ObjectRef> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectRef)> {
        self.0.iter().map(|(name, object_ref)| (name.as_str(), object_ref))
    }

    pub fn refs(&self) -> Vec<ObjectRef> {
        self.0.values().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub path: Utf8PathBuf,
    pub source_ref: ObjectRef,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedInputs {
    pub kind: InputKind,
    pub files: Vec<StagedFile>,
    pub affiliation: Option<Utf8PathBuf>,
}

impl StagedInputs {
    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|file| file.path.clone()).collect()
    }

    pub fn ref_map(&self) -> GenomeRefMap {
        let mut map = GenomeRefMap::new();
        for file in &self.files {
            map.insert(file.name.clone(), file.source_ref.clone());
        }
        map
    }
}

/// Hands out pairwise distinct, filesystem-safe genome names.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stem` if free, else `stem__<ref slug>`, else that plus a counter.
    pub fn allocate(&mut self, stem: &str, source_ref: &ObjectRef) -> String {
        let base = sanitize_name(stem);
        let mut candidate = base.clone();
        if self.taken.contains(&candidate) {
            candidate = format!("{base}__{}", source_ref.slug());
        }
        let qualified = candidate.clone();
        let mut counter = 1usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{qualified}_{counter}");
            counter += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

pub fn sanitize_name(stem: &str) -> String {
    let cleaned = stem
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "genome".to_string()
    } else {
        cleaned
    }
}

/// Basename without a `.gz` suffix and without its extension.
pub fn logical_stem(path: &Utf8Path) -> String {
    let file_name = path.file_name().unwrap_or(path.as_str());
    let unzipped = file_name.strip_suffix(".gz").unwrap_or(file_name);
    Utf8Path::new(unzipped)
        .file_stem()
        .unwrap_or(unzipped)
        .to_string()
}

pub struct InputStager<'a, W: WorkspaceClient, F: FileUtilClient> {
    workspace: &'a W,
    files: &'a F,
    staging_dir: Utf8PathBuf,
}

impl<'a, W: WorkspaceClient, F: FileUtilClient> InputStager<'a, W, F> {
    pub fn new(workspace: &'a W, files: &'a F, staging_dir: Utf8PathBuf) -> Self {
        Self {
            workspace,
            files,
            staging_dir,
        }
    }

    pub fn stage(
        &self,
        kind: InputKind,
        info: &ObjectInfo,
        input_ref: &ObjectRef,
        affiliation_handles: &[String],
    ) -> Result<StagedInputs, DramError> {
        fs::create_dir_all(self.staging_dir.as_std_path())
            .map_err(|err| DramError::Filesystem(err.to_string()))?;
        tracing::info!(kind = %kind, input = %input_ref, dir = %self.staging_dir, "phase=Stage");

        let files = match kind {
            InputKind::Assembly | InputKind::ViralContigs => self.stage_assemblies(input_ref)?,
            InputKind::GenomeSet => self.stage_genome_set(input_ref)?,
            InputKind::Genome => {
                let mut names = NameAllocator::new();
                vec![self.export_genome(info, &mut names)?]
            }
        };
        if files.is_empty() {
            return Err(DramError::Postcondition(format!(
                "no sequence files staged for {input_ref}"
            )));
        }

        let affiliation = if kind == InputKind::ViralContigs {
            Some(self.stage_affiliation(affiliation_handles)?)
        } else {
            None
        };

        Ok(StagedInputs {
            kind,
            files,
            affiliation,
        })
    }

    fn stage_assemblies(&self, input_ref: &ObjectRef) -> Result<Vec<StagedFile>, DramError> {
        let mut names = NameAllocator::new();
        let mut staged = Vec::new();
        for fasta in self.files.get_fastas(input_ref)? {
            let Some(source) = fasta.paths.first() else {
                return Err(DramError::Postcondition(format!(
                    "no FASTA returned for {}",
                    fasta.source_ref
                )));
            };
            if fasta.paths.len() > 1 {
                tracing::warn!(source = %fasta.source_ref, files = fasta.paths.len(), "using first FASTA only");
            }
            let name = names.allocate(&logical_stem(source), &fasta.source_ref);
            let destination = self.staging_dir.join(format!("{name}.fa"));
            place_fasta(source, &destination)?;
            staged.push(StagedFile {
                path: destination,
                source_ref: fasta.source_ref,
                name,
            });
        }
        Ok(staged)
    }

    fn stage_genome_set(&self, set_ref: &ObjectRef) -> Result<Vec<StagedFile>, DramError> {
        let data = self.workspace.get_object_data(set_ref)?;
        let members = genome_set_members(&data)?;
        tracing::info!(set = %set_ref, members = members.len(), "genome set members");

        let mut names = NameAllocator::new();
        let mut staged = Vec::with_capacity(members.len());
        for member in members {
            let info = self.workspace.get_object_info(&member)?;
            staged.push(self.export_genome(&info, &mut names)?);
        }
        Ok(staged)
    }

    fn export_genome(
        &self,
        info: &ObjectInfo,
        names: &mut NameAllocator,
    ) -> Result<StagedFile, DramError> {
        let source_ref = info.object_ref();
        let name = names.allocate(&info.name, &source_ref);
        let destination = self.staging_dir.join(format!("{name}.faa"));
        let written = self
            .files
            .genome_to_protein_fasta(&source_ref, &destination)?;
        if written != destination {
            move_file(&written, &destination)?;
        }
        Ok(StagedFile {
            path: destination,
            source_ref,
            name,
        })
    }

    fn stage_affiliation(&self, handles: &[String]) -> Result<Utf8PathBuf, DramError> {
        if handles.is_empty() {
            return Err(DramError::invalid(
                "affi_contigs_shock_id",
                "must name at least one file",
            ));
        }
        let affi_root = self.staging_dir.with_file_name(format!(
            "{}_affi",
            self.staging_dir.file_name().unwrap_or("DRAM_inputs")
        ));
        let mut shards = Vec::with_capacity(handles.len());
        for (index, handle) in handles.iter().enumerate() {
            let shard_dir = affi_root.join(format!("shard_{index}"));
            fs::create_dir_all(shard_dir.as_std_path())
                .map_err(|err| DramError::Filesystem(err.to_string()))?;
            shards.push(self.files.download_blob(handle, &shard_dir)?);
        }
        merge_affiliation_files(&shards, &affi_root.join("affi-contigs.tab"))
    }
}

/// Member references of a `KBaseSearch.GenomeSet` (`elements`) or
/// `KBaseSets.GenomeSet` (`items`).
pub fn genome_set_members(data: &Value) -> Result<Vec<ObjectRef>, DramError> {
    let refs = if let Some(elements) = data.get("elements").and_then(Value::as_object) {
        elements
            .iter()
            .map(|(key, element)| {
                element
                    .get("ref")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DramError::UnsupportedInput(format!(
                            "genome set element {key} has no reference"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, DramError>>()?
    } else if let Some(items) = data.get("items").and_then(Value::as_array) {
        items
            .iter()
            .map(|item| {
                item.get("ref").and_then(Value::as_str).ok_or_else(|| {
                    DramError::UnsupportedInput("genome set item has no reference".to_string())
                })
            })
            .collect::<Result<Vec<_>, DramError>>()?
    } else {
        return Err(DramError::UnsupportedInput(
            "genome set has neither elements nor items".to_string(),
        ));
    };
    refs.into_iter().map(str::parse).collect()
}

fn place_fasta(source: &Utf8Path, destination: &Utf8Path) -> Result<(), DramError> {
    if source.as_str().ends_with(".gz") {
        let input = fs::File::open(source.as_std_path())
            .map_err(|err| DramError::Filesystem(format!("open {source}: {err}")))?;
        let mut decoder = MultiGzDecoder::new(input);
        let mut output = fs::File::create(destination.as_std_path())
            .map_err(|err| DramError::Filesystem(err.to_string()))?;
        io::copy(&mut decoder, &mut output)
            .map_err(|err| DramError::Filesystem(format!("decompress {source}: {err}")))?;
        return Ok(());
    }
    move_file(source, destination)
}

fn move_file(source: &Utf8Path, destination: &Utf8Path) -> Result<(), DramError> {
    if fs::rename(source.as_std_path(), destination.as_std_path()).is_ok() {
        return Ok(());
    }
    fs::copy(source.as_std_path(), destination.as_std_path())
        .map_err(|err| DramError::Filesystem(format!("copy {source}: {err}")))?;
    fs::remove_file(source.as_std_path()).map_err(|err| DramError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;

    use super::*;

    fn object_ref(value: &str) -> ObjectRef {
        value.parse().unwrap()
    }

    #[test]
    fn stems_strip_compression_and_extension() {
        assert_eq!(logical_stem(Utf8Path::new("/tmp/x/bin.12.fa.gz")), "bin.12");
        assert_eq!(logical_stem(Utf8Path::new("bin_3.fasta")), "bin_3");
        assert_eq!(logical_stem(Utf8Path::new("contigs")), "contigs");
    }

    #[test]
    fn allocator_never_repeats() {
        let mut names = NameAllocator::new();
        let a = names.allocate("E. coli", &object_ref("1/2/3"));
        let b = names.allocate("E. coli", &object_ref("1/5/1"));
        let c = names.allocate("E._coli__1_5_1", &object_ref("1/9/1"));
        let d = names.allocate("", &object_ref("1/10/1"));
        assert_eq!(a, "E._coli");
        assert_eq!(b, "E._coli__1_5_1");
        assert_eq!(c, "E._coli__1_5_1__1_9_1");
        assert_eq!(d, "genome");
        let all = HashSet::from([a, b, c, d]);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn allocator_handles_many_collisions() {
        let mut names = NameAllocator::new();
        let same = object_ref("1/1/1");
        let allocated = (0..5)
            .map(|_| names.allocate("bin", &same))
            .collect::<HashSet<_>>();
        assert_eq!(allocated.len(), 5);
        assert!(allocated.contains("bin__1_1_1_2"));
    }

    #[test]
    fn set_members_from_both_layouts() {
        let search = json!({
            "description": "set",
            "elements": { "a": { "ref": "1/2/3" }, "b": { "ref": "1/3/1" } }
        });
        assert_eq!(
            genome_set_members(&search).unwrap(),
            vec![object_ref("1/2/3"), object_ref("1/3/1")]
        );
        let sets = json!({ "description": "set", "items": [{ "ref": "4/5/6", "label": "x" }] });
        assert_eq!(genome_set_members(&sets).unwrap(), vec![object_ref("4/5/6")]);
        assert!(genome_set_members(&json!({ "elements": { "a": { "data": {} } } })).is_err());
    }

    #[test]
    fn gzip_input_is_decompressed() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = dir.join("bin_1.fa.gz");
        let mut encoder = GzEncoder::new(
            fs::File::create(source.as_std_path()).unwrap(),
            Compression::default(),
        );
        encoder.write_all(b">k99_1\nACGT\n").unwrap();
        encoder.finish().unwrap();

        let destination = dir.join("bin_1.fa");
        place_fasta(&source, &destination).unwrap();
        assert_eq!(
            fs::read_to_string(destination.as_std_path()).unwrap(),
            ">k99_1\nACGT\n"
        );
    }
}
