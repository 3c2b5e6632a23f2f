// plantvault/src/backup/archive.rs
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::Result;

/// Streams a raw SQL file into a gzip container.
///
/// # Arguments
/// * `source` - The uncompressed dump.
/// * `dest` - An already created (reserved) artifact file; it is truncated by the caller.
/// * `level` - Compression level, 0-9.
///
/// # Returns
/// Number of uncompressed bytes consumed.
pub fn compress_into(source: &Path, dest: File, level: u32) -> Result<u64> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(BufWriter::new(dest), Compression::new(level));

    let copied = io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    debug!(source = %source.display(), bytes = copied, "dump compressed");
    Ok(copied)
}

/// Unwraps a gzip artifact into `dest`, returning the number of raw SQL bytes written.
pub fn decompress_into(source: &Path, dest: &mut File) -> Result<u64> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut writer = BufWriter::new(dest);
    let written = io::copy(&mut decoder, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

/// Decompresses an artifact into a temp file inside `scratch_dir`.
///
/// The returned handle deletes the file when dropped, on success and failure alike.
pub fn decompress_to_temp(source: &Path, scratch_dir: &Path) -> Result<NamedTempFile> {
    std::fs::create_dir_all(scratch_dir)?;
    let mut temp = tempfile::Builder::new()
        .prefix("restore_")
        .suffix(".sql")
        .tempfile_in(scratch_dir)?;
    decompress_into(source, temp.as_file_mut())?;
    Ok(temp)
}

/// Whether the artifact is gzip-compressed, judged by extension.
pub fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    fn sample_dump() -> Vec<u8> {
        let mut dump = b"-- MySQL dump\nCREATE TABLE plantas (id INT, nombre VARCHAR(100));\n".to_vec();
        for i in 0..5_000 {
            dump.extend_from_slice(format!("INSERT INTO plantas VALUES ({}, 'Ficus {}');\n", i, i).as_bytes());
        }
        dump.extend_from_slice(&[0, 159, 146, 150, 255]);
        dump
    }

    #[test]
    fn compress_then_decompress_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let raw_path = dir.path().join("full.sql");
        let gz_path = dir.path().join("full.sql.gz");
        let dump = sample_dump();
        std::fs::write(&raw_path, &dump).unwrap();

        let consumed = compress_into(&raw_path, File::create(&gz_path).unwrap(), 9).unwrap();
        assert_eq!(consumed, dump.len() as u64);
        assert!(std::fs::metadata(&gz_path).unwrap().len() < dump.len() as u64);

        let mut temp = decompress_to_temp(&gz_path, dir.path()).unwrap();
        let mut restored = Vec::new();
        temp.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        temp.as_file_mut().read_to_end(&mut restored).unwrap();
        assert_eq!(restored, dump);
    }

    #[test]
    fn temp_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let raw_path = dir.path().join("d.sql");
        let gz_path = dir.path().join("d.sql.gz");
        std::fs::write(&raw_path, b"SELECT 1;").unwrap();
        compress_into(&raw_path, File::create(&gz_path).unwrap(), 1).unwrap();

        let temp = decompress_to_temp(&gz_path, dir.path()).unwrap();
        let temp_path = temp.path().to_path_buf();
        assert!(temp_path.exists());
        drop(temp);
        assert!(!temp_path.exists());
    }

    #[test]
    fn corrupt_container_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("broken.sql.gz");
        std::fs::write(&gz_path, b"definitely not gzip").unwrap();
        assert!(decompress_to_temp(&gz_path, dir.path()).is_err());
    }

    #[test]
    fn gzip_detection_by_extension() {
        assert!(is_gzip(Path::new("/b/full_20260310_020000.sql.gz")));
        assert!(!is_gzip(Path::new("/b/full_20260310_020000.sql")));
    }
}
