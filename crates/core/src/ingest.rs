use crate::{Document, DocumentArray, IngestError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const CHECKSUM_TAG: &str = "checksum";

/// Resolves an input to files: a glob pattern (`data/*.pdf`), a directory
/// (searched recursively for PDFs) or a single file.
pub fn discover_files(input: &str) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();

    if input.contains(['*', '?', '[']) {
        for entry in glob::glob(input)? {
            let path = entry.map_err(|error| IngestError::Io(error.into_error()))?;
            if path.is_file() {
                files.push(path);
            }
        }
    } else {
        let path = Path::new(input);
        if path.is_dir() {
            files.extend(discover_pdf_files(path));
        } else if path.is_file() {
            files.push(path.to_path_buf());
        }
    }

    files.sort_unstable();
    files.dedup();
    Ok(files)
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl DocumentArray {
    /// One document per matched file, `uri` set, content not yet loaded.
    pub fn from_files(input: &str) -> Result<Self, IngestError> {
        let files = discover_files(input)?;

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no files matched {input}"
            )));
        }

        let docs = files
            .iter()
            .map(|path| {
                path.file_name().ok_or_else(|| {
                    IngestError::MissingFileName(format!(
                        "path missing filename: {}",
                        path.display()
                    ))
                })?;
                debug!(path = %path.display(), "queued document");
                Ok(Document::from_uri(path.to_string_lossy()))
            })
            .collect::<Result<DocumentArray, IngestError>>()?;

        info!(input, documents = docs.len(), "loaded document collection");
        Ok(docs)
    }

    /// `from_files` followed by loading every file into its blob, with a
    /// content checksum tag.
    pub fn load_files(input: &str) -> Result<Self, IngestError> {
        let mut docs = Self::from_files(input)?;
        docs.load_uri_to_blob()?;
        for doc in docs.iter_mut() {
            if let Some(blob) = &doc.blob {
                let checksum = digest_bytes(blob);
                doc.tags.insert(CHECKSUM_TAG.to_string(), checksum.into());
            }
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::{digest_bytes, discover_files, discover_pdf_files, CHECKSUM_TAG};
    use crate::DocumentArray;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.pdf"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(base.join("notes.txt"), b"not a pdf")?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn glob_pattern_is_sorted_and_not_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.pdf"), b"%PDF")?;
        fs::write(dir.path().join("a.pdf"), b"%PDF")?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("nested").join("c.pdf"), b"%PDF")?;

        let pattern = format!("{}/*.pdf", dir.path().display());
        let files = discover_files(&pattern)?;
        let names = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_bytes(&fs::read(&file_path)?);
        let second = digest_bytes(&fs::read(&file_path)?);
        assert_eq!(first, second);
        assert_ne!(first, digest_bytes(b"abd"));
        Ok(())
    }

    #[test]
    fn loading_fails_without_matches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pattern = format!("{}/*.pdf", dir.path().display());
        assert!(DocumentArray::from_files(&pattern).is_err());
        Ok(())
    }

    #[test]
    fn load_files_fills_blobs_and_checksums() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.pdf"), b"%PDF-1.4\n")?;

        let docs = DocumentArray::load_files(&dir.path().to_string_lossy())?;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].blob.as_deref(), Some(&b"%PDF-1.4\n"[..]));
        assert!(docs[0].tags.contains_key(CHECKSUM_TAG));
        Ok(())
    }
}
