//! Append-only record of portal operation outcomes.
//!
//! Every entry is one JSON line chained to its predecessor by a SHA-256
//! hash, so truncation in the middle or edits to earlier lines are detected
//! by [`verify_chain`]. Passwords never reach the journal: entries are built
//! from status frames, which only carry the username and email.

use netkeep_proto::StatusFrame;
use ring::digest;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENTRY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid journal: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub op: String,
    pub username: String,
    pub email: String,
    pub code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&StatusFrame> for Outcome {
    fn from(frame: &StatusFrame) -> Self {
        Self {
            op: frame.op.as_str().to_string(),
            username: frame.username.clone(),
            email: frame.email.clone(),
            code: frame.code(),
            detail: frame.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub version: u32,
    pub seq: u64,
    /// Unix timestamp in milliseconds.
    pub unix_ms: u64,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub hash: String,
}

impl JournalEntry {
    fn expected_hash(&self) -> Result<String, JournalError> {
        entry_hash(
            self.version,
            self.seq,
            self.unix_ms,
            &self.outcome,
            self.prev_hash.as_deref(),
        )
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    version: u32,
    seq: u64,
    unix_ms: u64,
    outcome: &'a Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<&'a str>,
}

fn entry_hash(
    version: u32,
    seq: u64,
    unix_ms: u64,
    outcome: &Outcome,
    prev_hash: Option<&str>,
) -> Result<String, JournalError> {
    let bytes = serde_json::to_vec(&HashInput {
        version,
        seq,
        unix_ms,
        outcome,
        prev_hash,
    })?;
    let digest = digest::digest(&digest::SHA256, &bytes);
    Ok(digest.as_ref().iter().map(|b| format!("{:02x}", b)).collect())
}

pub struct OutcomeJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    next_seq: u64,
    prev_hash: Option<String>,
}

impl OutcomeJournal {
    /// Opens or creates the journal, resuming the chain after its last entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();

        let mut next_seq = 1u64;
        let mut prev_hash = None;
        if path.exists() {
            if let Some(last) = read_last_entry(&path)? {
                if last.expected_hash()? != last.hash {
                    return Err(JournalError::Invalid("last entry hash mismatch".to_string()));
                }
                next_seq = last.seq.saturating_add(1);
                prev_hash = Some(last.hash);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_seq,
            prev_hash,
        })
    }

    pub fn append(&mut self, unix_ms: u64, outcome: Outcome) -> Result<JournalEntry, JournalError> {
        let seq = self.next_seq;
        let hash = entry_hash(ENTRY_VERSION, seq, unix_ms, &outcome, self.prev_hash.as_deref())?;
        let entry = JournalEntry {
            version: ENTRY_VERSION,
            seq,
            unix_ms,
            outcome,
            prev_hash: self.prev_hash.clone(),
            hash: hash.clone(),
        };

        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        self.next_seq = seq.saturating_add(1);
        self.prev_hash = Some(hash);
        Ok(entry)
    }

    /// Appends the outcome carried by a status frame, stamped with the
    /// current time.
    pub fn record(&mut self, frame: &StatusFrame) -> Result<JournalEntry, JournalError> {
        self.append(crate::portal::unix_millis(), Outcome::from(frame))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Checks sequence numbers and hash links; returns the number of entries.
pub fn verify_chain(path: impl AsRef<Path>) -> Result<u64, JournalError> {
    let reader = BufReader::new(File::open(path.as_ref())?);

    let mut expected_prev: Option<String> = None;
    let mut expected_seq = 1u64;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = serde_json::from_str(&line)?;
        let lineno = idx + 1;

        if entry.seq != expected_seq {
            return Err(JournalError::Invalid(format!(
                "seq mismatch at line {}: expected {}, got {}",
                lineno, expected_seq, entry.seq
            )));
        }
        if entry.prev_hash != expected_prev {
            return Err(JournalError::Invalid(format!(
                "prev_hash mismatch at line {}",
                lineno
            )));
        }
        if entry.expected_hash()? != entry.hash {
            return Err(JournalError::Invalid(format!("hash mismatch at line {}", lineno)));
        }

        expected_prev = Some(entry.hash);
        expected_seq = expected_seq.saturating_add(1);
    }

    Ok(expected_seq - 1)
}

fn read_last_entry(path: &Path) -> Result<Option<JournalEntry>, JournalError> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = None;
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    match last {
        Some(line) => Ok(Some(serde_json::from_str(&line)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netkeep_proto::Operation;
    use std::fs;

    #[test]
    fn journal_chains_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("outcomes.jsonl");

        let mut journal = OutcomeJournal::open(&path).expect("open");
        journal
            .append(1, Outcome::from(&StatusFrame::success(Operation::Login, "a@b.com", "u1")))
            .expect("append");
        journal
            .append(
                2,
                Outcome::from(&StatusFrame::failure(Operation::Logout, "a@b.com", "u1", "timed out")),
            )
            .expect("append");
        drop(journal);
        assert_eq!(verify_chain(&path).expect("verify"), 2);

        let mut journal = OutcomeJournal::open(&path).expect("reopen");
        let entry = journal
            .record(&StatusFrame::success(Operation::Login, "c@d.com", "u2"))
            .expect("record");
        assert_eq!(entry.seq, 3);
        assert!(entry.prev_hash.is_some());
        assert_eq!(verify_chain(&path).expect("verify"), 3);
    }

    #[test]
    fn journal_detects_edited_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("outcomes.jsonl");
        {
            let mut journal = OutcomeJournal::open(&path).expect("open");
            journal
                .append(1, Outcome::from(&StatusFrame::success(Operation::Login, "a@b.com", "u1")))
                .expect("append");
        }

        let contents = fs::read_to_string(&path).expect("read");
        fs::write(&path, contents.replace("\"code\":1", "\"code\":0")).expect("write");

        match verify_chain(&path) {
            Err(JournalError::Invalid(msg)) => assert!(msg.contains("hash mismatch")),
            other => panic!("expected invalid journal, got {:?}", other),
        }
        assert!(OutcomeJournal::open(&path).is_err());
    }

    #[test]
    fn journal_detects_dropped_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("outcomes.jsonl");
        {
            let mut journal = OutcomeJournal::open(&path).expect("open");
            for ts in 1..=3 {
                journal
                    .append(ts, Outcome::from(&StatusFrame::success(Operation::Login, "e", "u")))
                    .expect("append");
            }
        }

        let contents = fs::read_to_string(&path).expect("read");
        let kept: Vec<&str> = contents.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n")).expect("write");

        assert!(matches!(verify_chain(&path), Err(JournalError::Invalid(_))));
    }
}
