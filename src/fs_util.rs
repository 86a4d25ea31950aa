use std::fs;
use std::io;

use camino::Utf8Path;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::DramError;

/// Writes `entries` (archive name, source file) into a deflated zip at
/// `zip_path`. The archive only appears once it is complete.
pub fn write_zip(entries: &[(String, &Utf8Path)], zip_path: &Utf8Path) -> Result<(), DramError> {
    let parent = zip_path
        .parent()
        .ok_or_else(|| DramError::Filesystem("invalid archive path".to_string()))?;
    fs::create_dir_all(parent.as_std_path()).map_err(|err| DramError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("kb-dram-zip")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| DramError::Filesystem(err.to_string()))?;

    let mut writer = ZipWriter::new(temp.reopen().map_err(|err| DramError::Filesystem(err.to_string()))?);
    for (name, source) in entries {
        let mut input = fs::File::open(source.as_std_path())
            .map_err(|err| DramError::Filesystem(format!("open {source}: {err}")))?;
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer
            .start_file(name.as_str(), options)
            .map_err(|err| DramError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut writer)
            .map_err(|err| DramError::Filesystem(format!("archive {source}: {err}")))?;
    }
    writer
        .finish()
        .map_err(|err| DramError::Filesystem(err.to_string()))?;

    temp.persist(zip_path.as_std_path())
        .map_err(|err| DramError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Checks that every name in `expected` is in the archive and decompresses
/// cleanly. Returns the number of entries checked.
pub fn validate_zip(zip_path: &Utf8Path, expected: &[&str]) -> Result<usize, DramError> {
    let file = fs::File::open(zip_path.as_std_path())
        .map_err(|err| DramError::Filesystem(format!("open zip {zip_path}: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| DramError::Filesystem(err.to_string()))?;

    for name in expected {
        let mut entry = archive.by_name(name).map_err(|err| {
            DramError::Filesystem(format!("{zip_path} lacks {name}: {err}"))
        })?;
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| DramError::Filesystem(format!("{zip_path}: {name}: {err}")))?;
    }
    Ok(expected.len())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn archive_holds_every_entry() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let table = dir.join("annotations.tsv");
        let html = dir.join("product.html");
        fs::write(table.as_std_path(), "\tfasta\n").unwrap();
        fs::write(html.as_std_path(), "<html></html>").unwrap();

        let zip_path = dir.join("out").join("DRAM_output.zip");
        write_zip(
            &[
                ("annotations.tsv".to_string(), table.as_path()),
                ("distilled/product.html".to_string(), html.as_path()),
            ],
            &zip_path,
        )
        .unwrap();
        assert_eq!(
            validate_zip(&zip_path, &["annotations.tsv", "distilled/product.html"]).unwrap(),
            2
        );
        assert!(validate_zip(&zip_path, &["distilled/genome_stats.tsv"]).is_err());

        let mut archive = ZipArchive::new(fs::File::open(zip_path.as_std_path()).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("distilled/product.html")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<html></html>");
    }

    #[test]
    fn missing_source_leaves_no_archive() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let missing = dir.join("nope.tsv");
        let zip_path = dir.join("DRAM_output.zip");
        assert!(write_zip(&[("nope.tsv".to_string(), missing.as_path())], &zip_path).is_err());
        assert!(!zip_path.as_std_path().exists());
    }
}
