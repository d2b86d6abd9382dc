//! Packaging and fingerprinting of finalized output files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::WriterError;

fn io_error(path: &Path, source: std::io::Error) -> WriterError {
    WriterError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Packs `path` into a sibling `<file name>.zip` holding a single deflated
/// entry, then removes the original. Returns the archive path.
pub fn zip_and_remove(path: &Path) -> Result<PathBuf, WriterError> {
    let entry_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| WriterError::Packaging {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })?;
    let zip_path = path.with_extension("zip");

    let archive = File::create(&zip_path).map_err(|e| io_error(&zip_path, e))?;
    let mut zip = ZipWriter::new(archive);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)
        .map_err(|e| WriterError::Packaging {
            path: zip_path.clone(),
            reason: e.to_string(),
        })?;

    let mut source = BufReader::new(File::open(path).map_err(|e| io_error(path, e))?);
    std::io::copy(&mut source, &mut zip).map_err(|e| io_error(&zip_path, e))?;
    zip.finish().map_err(|e| WriterError::Packaging {
        path: zip_path.clone(),
        reason: e.to_string(),
    })?;

    std::fs::remove_file(path).map_err(|e| io_error(path, e))?;
    Ok(zip_path)
}

/// Returns the hex-encoded SHA-256 digest and the length of a file.
pub fn checksum(path: &Path) -> Result<(String, u64), WriterError> {
    let mut file = BufReader::new(File::open(path).map_err(|e| io_error(path, e))?);
    let mut hasher = Sha256::new();
    let length = std::io::copy(&mut file, &mut hasher).map_err(|e| io_error(path, e))?;
    Ok((hex::encode(hasher.finalize()), length))
}
