//! File helpers for durable state

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `data` so readers see either the old or the new contents.
///
/// The bytes are written and synced to a sibling temporary file which is then
/// renamed over the target.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp_path = temp_path_for(path)?;

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Sibling path used while writing, e.g. `pos.json` -> `pos.json.tmp`
pub fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let mut file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_os_string();
    file_name.push(".tmp");
    Ok(path.with_file_name(file_name))
}
