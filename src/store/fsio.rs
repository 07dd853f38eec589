// =============================================================================
// Filesystem primitives — atomic JSON replacement and JSONL append/tail
// =============================================================================
//
// Two idioms shared by every store:
//
//   * Snapshots are replaced atomically: serialize to a `.tmp` sibling, then
//     rename over the target, so readers observe either the previous or the
//     next version and never a torn write.
//
//   * Logs are append-only JSONL. Each record is written as one
//     newline-terminated line in a single write call. The tail reader
//     streams line by line with a bounded ring, so "latest N" never slurps
//     a whole day file, and malformed lines are skipped.
// =============================================================================

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Atomically replace `path` with the JSON serialization of `value`.
pub fn atomic_write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(value).context("serializing snapshot")?;
    let tmp_path = tmp_sibling(path);

    std::fs::write(&tmp_path, content)
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} over {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// Read a JSON file. A missing file is `Ok(None)`; a malformed one is an
/// error for the caller to decide on.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Append one record as a single newline-terminated JSONL line.
pub fn append_jsonl<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut line = serde_json::to_string(value).context("serializing log record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    // One write call per full line so concurrent appends from other traders
    // never interleave mid-record.
    file.write_all(line.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}

/// Stream a JSONL file and return the latest `n` parseable records, newest
/// first. Malformed lines are skipped with a warning. A missing file is an
/// empty result.
pub fn tail_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>, n: usize) -> Result<Vec<T>> {
    let path = path.as_ref();
    if n == 0 {
        return Ok(Vec::new());
    }
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
    };

    let reader = BufReader::new(file);
    let mut ring: VecDeque<T> = VecDeque::with_capacity(n);
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => {
                if ring.len() == n {
                    ring.pop_front();
                }
                ring.push_back(record);
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped malformed jsonl lines");
    }

    Ok(ring.into_iter().rev().collect())
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        seq: u64,
        label: String,
    }

    #[test]
    fn atomic_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/state.json");
        let rec = Rec {
            seq: 7,
            label: "hello".to_string(),
        };
        atomic_write_json(&path, &rec).unwrap();
        let loaded: Rec = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, rec);
        // No tmp residue.
        assert!(!path.with_file_name("state.json.tmp").exists());
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let out: Option<Rec> = read_json(dir.path().join("absent.json")).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn append_and_tail_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        for seq in 0..5 {
            append_jsonl(
                &path,
                &Rec {
                    seq,
                    label: format!("r{seq}"),
                },
            )
            .unwrap();
        }
        let latest: Vec<Rec> = tail_jsonl(&path, 2).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].seq, 4);
        assert_eq!(latest[1].seq, 3);
    }

    #[test]
    fn tail_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_jsonl(&path, &Rec { seq: 1, label: "a".into() }).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{ torn line\n").unwrap();
        }
        append_jsonl(&path, &Rec { seq: 2, label: "b".into() }).unwrap();

        let latest: Vec<Rec> = tail_jsonl(&path, 10).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].seq, 2);
    }

    #[test]
    fn tail_missing_file_and_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jsonl");
        let out: Vec<Rec> = tail_jsonl(&path, 5).unwrap();
        assert!(out.is_empty());
        append_jsonl(&path, &Rec { seq: 1, label: "a".into() }).unwrap();
        let zero: Vec<Rec> = tail_jsonl(&path, 0).unwrap();
        assert!(zero.is_empty());
    }
}
