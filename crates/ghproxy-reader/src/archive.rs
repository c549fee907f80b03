use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::ReaderError;

/// Zips `paths` (relative to `root`) in sorted order with fixed timestamps and
/// permissions, so the same files always give the same bytes.
pub fn zip_files(root: &Path, paths: &[String]) -> Result<Vec<u8>, ReaderError> {
    let mut sorted: Vec<&String> = paths.iter().collect();
    sorted.sort();

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for path in sorted {
        let data = std::fs::read(root.join(path))?;
        writer.start_file(path.as_str(), options)?;
        writer.write_all(&data)?;
    }
    Ok(writer.finish()?.into_inner())
}
