use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::part::Part;
use super::role::Role;

/// One line of the durable conversation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub part: Part,
}

impl HistoryEntry {
    pub fn user(part: Part) -> Self {
        HistoryEntry {
            role: Role::User,
            part,
        }
    }

    pub fn assistant(part: Part) -> Self {
        HistoryEntry {
            role: Role::Assistant,
            part,
        }
    }
}

/// Reads a newline-delimited JSON history file.
///
/// A missing file is an empty history, not an error, so a fresh session can
/// resume through the same path as an old one.
pub fn load_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open history at {}", path.display()))
        }
    };

    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read history at {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: HistoryEntry = serde_json::from_str(&line).with_context(|| {
            format!(
                "corrupt history entry at {}:{}",
                path.display(),
                line_number + 1
            )
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Appends entries to a history file, one JSON object per line.
pub fn append_history(path: &Path, entries: &[HistoryEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open history at {}", path.display()))?;
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let entries = load_history(&dir.path().join("history.jsonl")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn append_then_load_preserves_order_and_roles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let first = vec![
            HistoryEntry::user(Part::text("list the files")),
            HistoryEntry::assistant(Part::function_call(
                "c1",
                "list_files",
                serde_json::Map::new(),
            )),
        ];
        append_history(&path, &first).unwrap();

        let second = vec![HistoryEntry::user(Part::FunctionResponse(
            crate::models::part::FunctionResponse::ok("c1", "list_files", json!(["a.rs"]), vec![]),
        ))];
        append_history(&path, &second).unwrap();

        let loaded = load_history(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].role, Role::User);
        assert_eq!(loaded[1].role, Role::Assistant);
        assert_eq!(
            loaded[1].part.as_function_call().map(|c| c.name.as_str()),
            Some("list_files")
        );
        assert_eq!(loaded[2].role, Role::User);
    }

    #[test]
    fn corrupt_line_reports_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(&path, "{\"role\":\"user\",\"part\":{\"type\":\"text\",\"text\":\"ok\"}}\nnot json\n").unwrap();
        let err = load_history(&path).unwrap_err();
        assert!(err.to_string().contains(":2"));
    }
}
