//! Reader for DRAM's `annotations.tsv` and gene sequence files.

use std::collections::{BTreeMap, HashMap, HashSet};

use bio::io::fasta;
use camino::Utf8Path;

use crate::error::DramError;

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub gene_id: String,
    fields: BTreeMap<String, String>,
}

impl AnnotationRow {
    pub fn new(gene_id: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        Self {
            gene_id: gene_id.into(),
            fields,
        }
    }

    /// Non-empty value of `column`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn get_u64(&self, column: &str) -> Option<u64> {
        self.get(column).and_then(|value| {
            value
                .parse::<u64>()
                .ok()
                .or_else(|| value.parse::<f64>().ok().map(|float| float as u64))
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Feature ID as it was named in the source genome, without the
    /// `<fasta>_` prefix DRAM adds to called genes.
    pub fn feature_id(&self) -> &str {
        self.get("fasta")
            .and_then(|fasta| {
                self.gene_id
                    .strip_prefix(fasta)
                    .and_then(|rest| rest.strip_prefix('_'))
            })
            .filter(|rest| !rest.is_empty())
            .unwrap_or(&self.gene_id)
    }
}

/// DRAM annotation table, one row per gene, indexed by gene ID.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    columns: Vec<String>,
    rows: Vec<AnnotationRow>,
}

impl AnnotationTable {
    pub fn new(columns: Vec<String>, rows: Vec<AnnotationRow>) -> Self {
        Self { columns, rows }
    }

    pub fn read(path: &Utf8Path) -> Result<Self, DramError> {
        let mut reader = tsv_reader(path)?;
        let headers = reader
            .headers()
            .map_err(|err| DramError::AnnotationParse(format!("{path}: {err}")))?
            .clone();
        let columns = headers.iter().skip(1).map(str::to_string).collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| DramError::AnnotationParse(format!("{path}: {err}")))?;
            let gene_id = record.get(0).unwrap_or_default().to_string();
            if gene_id.is_empty() {
                return Err(DramError::AnnotationParse(format!(
                    "{path}: row without gene id"
                )));
            }
            let fields = columns
                .iter()
                .zip(record.iter().skip(1))
                .map(|(column, value)| (column.clone(), value.to_string()))
                .collect();
            rows.push(AnnotationRow { gene_id, fields });
        }

        tracing::debug!(path = %path, rows = rows.len(), "annotations.read");
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[AnnotationRow] {
        &self.rows
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|name| name == column)
    }

    /// Splits rows by the value of `column`; every row lands in exactly one
    /// group.
    pub fn group_by(&self, column: &str) -> Result<BTreeMap<String, Vec<&AnnotationRow>>, DramError> {
        if !self.has_column(column) {
            return Err(DramError::MissingColumn(column.to_string()));
        }
        let mut groups = BTreeMap::<String, Vec<&AnnotationRow>>::new();
        for row in &self.rows {
            let key = row.get(column).ok_or_else(|| {
                DramError::AnnotationParse(format!("gene {} has no `{column}` value", row.gene_id))
            })?;
            groups.entry(key.to_string()).or_default().push(row);
        }
        Ok(groups)
    }
}

/// Column names of a TSV file without reading its body.
pub fn read_header(path: &Utf8Path) -> Result<Vec<String>, DramError> {
    let mut reader = tsv_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|err| DramError::AnnotationParse(format!("{path}: {err}")))?;
    Ok(headers.iter().map(str::to_string).collect())
}

/// Sequences of `wanted` gene IDs from a FASTA file.
pub fn read_gene_sequences(
    path: &Utf8Path,
    wanted: &HashSet<&str>,
) -> Result<HashMap<String, String>, DramError> {
    let reader = fasta::Reader::from_file(path.as_std_path())
        .map_err(|err| DramError::Filesystem(format!("open {path}: {err}")))?;
    let mut sequences = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|err| DramError::AnnotationParse(format!("{path}: {err}")))?;
        if wanted.contains(record.id()) {
            let seq = String::from_utf8_lossy(record.seq())
                .trim_end_matches('*')
                .to_string();
            sequences.insert(record.id().to_string(), seq);
        }
    }
    Ok(sequences)
}

fn tsv_reader(path: &Utf8Path) -> Result<csv::Reader<std::fs::File>, DramError> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .from_path(path.as_std_path())
        .map_err(|err| DramError::AnnotationParse(format!("{path}: {err}")))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    const TABLE: &str = "\tfasta\tscaffold\tgene_position\tstart_position\tend_position\tstrandedness\tko_id\n\
bin_1_k99_1_1\tbin_1\tk99_1\t1\t3\t300\t1\tK00001\n\
bin_1_k99_1_2\tbin_1\tk99_1\t2\t400\t900\t-1\t\n\
bin_2_k99_7_1\tbin_2\tk99_7\t1\t10\t700\t1\tK00002\n";

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    #[test]
    fn read_and_group() {
        let temp = tempfile::tempdir().unwrap();
        let path = write(&temp, "annotations.tsv", TABLE);
        let table = AnnotationTable::read(&path).unwrap();
        assert_eq!(table.rows().len(), 3);
        assert!(table.has_column("ko_id"));

        let groups = table.group_by("fasta").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["bin_1"].len(), 2);
        assert_eq!(groups["bin_2"][0].gene_id, "bin_2_k99_7_1");
        assert_eq!(groups["bin_1"][1].get("ko_id"), None);
        assert_eq!(groups["bin_1"][0].get_u64("end_position"), Some(300));
    }

    #[test]
    fn group_by_missing_column() {
        let temp = tempfile::tempdir().unwrap();
        let path = write(&temp, "annotations.tsv", TABLE);
        let table = AnnotationTable::read(&path).unwrap();
        assert_matches!(table.group_by("bin"), Err(DramError::MissingColumn(_)));
        assert_eq!(read_header(&path).unwrap()[1], "fasta");
    }

    #[test]
    fn feature_id_strips_fasta_prefix() {
        let mut fields = BTreeMap::new();
        fields.insert("fasta".to_string(), "Ecoli_K12".to_string());
        let row = AnnotationRow::new("Ecoli_K12_b0001", fields.clone());
        assert_eq!(row.feature_id(), "b0001");
        let row = AnnotationRow::new("other_b0001", fields);
        assert_eq!(row.feature_id(), "other_b0001");
    }

    #[test]
    fn sequences_subset() {
        let temp = tempfile::tempdir().unwrap();
        let path = write(&temp, "genes.faa", ">a desc\nMKV*\n>b\nMLL\n>c\nMAA\n");
        let wanted = HashSet::from(["a", "c"]);
        let seqs = read_gene_sequences(&path, &wanted).unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs["a"], "MKV");
        assert!(!seqs.contains_key("b"));
    }
}
