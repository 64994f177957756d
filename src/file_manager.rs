//! Gzip payload handling and the uploads/tempcsv scratch directories.
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, FileManagerError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Tries gzip decompression first; if the bytes aren't gzip-framed at all,
/// assumes they're already plain text rather than erroring, which avoids
/// double-compressing a job that was stored uncompressed.
pub fn ensure_decompressed(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(_) => data.to_vec(),
    }
}

/// Recreates the given directory empty. Used at startup for the uploads
/// and tempcsv scratch directories.
pub async fn recreate_empty_dir(path: &str) -> Result<(), FileManagerError> {
    let _ = tokio::fs::remove_dir_all(path).await;
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

pub async fn write_job_file(uploads_dir: &str, file_name_pk: &str, gzipped: &[u8]) -> Result<std::path::PathBuf, FileManagerError> {
    let decompressed = ensure_decompressed(gzipped);
    let path = std::path::Path::new(uploads_dir).join(file_name_pk);
    tokio::fs::write(&path, decompressed).await?;
    Ok(path)
}

pub async fn remove_job_file(uploads_dir: &str, file_name_pk: &str) -> Result<(), FileManagerError> {
    let path = std::path::Path::new(uploads_dir).join(file_name_pk);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_gzip() {
        let original = b"G28\nG1 X10 Y10\nM104 S200\n";
        let compressed = compress(original).unwrap();
        assert_ne!(compressed, original);
        let decompressed = ensure_decompressed(&compressed);
        assert_eq!(decompressed, original);
    }

    #[test]
    fn tolerates_already_plain_bytes() {
        let plain = b"not gzip data";
        assert_eq!(ensure_decompressed(plain), plain);
    }
}
