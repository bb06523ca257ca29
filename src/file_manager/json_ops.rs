// JSON-lines file operations
// Appends are single writes; full rewrites go through a temp file and rename

use crate::error::{ControlError, Result};
use log::debug;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

lazy_static::lazy_static! {
    static ref FILE_LOCK: Mutex<()> = Mutex::new(());
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ControlError::persistence(parent, e))?;
        }
    }
    Ok(())
}

/// Append one record as a single line
pub fn append_json_line<T: Serialize>(path: &Path, item: &T) -> Result<()> {
    let mut line = serde_json::to_string(item)?;
    line.push('\n');

    let _lock = FILE_LOCK.lock();
    ensure_parent(path)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ControlError::persistence(path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| ControlError::persistence(path, e))?;
    file.flush().map_err(|e| ControlError::persistence(path, e))
}

/// Replace the file with `items`, one per line, atomically
pub fn write_json_lines<'a, T, I>(path: &Path, items: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let _lock = FILE_LOCK.lock();
    ensure_parent(path)?;

    let temp_path = path.with_extension("jsonl.tmp");
    let temp_file =
        File::create(&temp_path).map_err(|e| ControlError::persistence(&temp_path, e))?;
    let mut writer = BufWriter::new(temp_file);

    for item in items {
        let line = match serde_json::to_string(item) {
            Ok(line) => line,
            Err(e) => {
                debug!("Skipping unserializable record: {}", e);
                continue;
            }
        };
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| ControlError::persistence(&temp_path, e))?;
    }

    let temp_file = writer
        .into_inner()
        .map_err(|e| ControlError::persistence(&temp_path, e.into_error()))?;
    temp_file
        .sync_all()
        .map_err(|e| ControlError::persistence(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| ControlError::persistence(path, e))
}

/// Read every parseable line; blank and malformed lines are skipped.
/// A missing file reads as empty.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = {
        let _lock = FILE_LOCK.lock();
        match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ControlError::persistence(path, e)),
        }
    };

    let text = String::from_utf8_lossy(&bytes);
    let mut items = Vec::new();
    let mut skipped = 0usize;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(item) => items.push(item),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("Skipped {} malformed line(s) in {:?}", skipped, path);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        n: u32,
    }

    #[test]
    fn test_append_then_read_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rows.jsonl");

        append_json_line(&path, &Row { n: 1 }).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{not json\n\n").unwrap();
        }
        append_json_line(&path, &Row { n: 2 }).unwrap();

        let rows: Vec<Row> = read_json_lines(&path).unwrap();
        assert_eq!(rows, vec![Row { n: 1 }, Row { n: 2 }]);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        for n in 0..5 {
            append_json_line(&path, &Row { n }).unwrap();
        }
        write_json_lines(&path, &[Row { n: 7 }, Row { n: 8 }]).unwrap();

        let rows: Vec<Row> = read_json_lines(&path).unwrap();
        assert_eq!(rows, vec![Row { n: 7 }, Row { n: 8 }]);
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Row> = read_json_lines(&dir.path().join("absent.jsonl")).unwrap();
        assert!(rows.is_empty());
    }
}
