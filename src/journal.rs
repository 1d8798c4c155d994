//! Recognition journal: one entry per identification attempt, plus the
//! aggregate figures shown by `faceid stats`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use faceid_core::{ConfidenceTier, IdentityId, MatchDecision, Outcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const JOURNAL_FILE: &str = "journal.bin";
/// Page size of `faceid journal` when none is given.
pub const DEFAULT_PAGE: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    /// `None` when the extractor found no face.
    pub outcome: Option<Outcome>,
    pub identity: Option<IdentityId>,
    pub similarity: f32,
    pub confidence: ConfidenceTier,
    pub elapsed_ms: u64,
}

impl JournalEntry {
    pub fn from_decision(decision: &MatchDecision, elapsed: Duration) -> Self {
        Self {
            at: Utc::now(),
            outcome: Some(decision.outcome),
            identity: decision.best_identity.as_ref().map(|i| i.id),
            similarity: decision.similarity,
            confidence: decision.confidence,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn no_face(elapsed: Duration) -> Self {
        Self {
            at: Utc::now(),
            outcome: None,
            identity: None,
            similarity: 0.0,
            confidence: ConfidenceTier::Low,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn matched(&self) -> bool {
        self.outcome == Some(Outcome::Matched)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub ambiguous: usize,
    pub no_face: usize,
    /// Percent, two decimals.
    pub success_rate: f64,
    pub average_processing_ms: f64,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
}

pub fn stats(entries: &[JournalEntry]) -> JournalStats {
    let total = entries.len();
    if total == 0 {
        return JournalStats::default();
    }
    let successful = entries.iter().filter(|e| e.matched()).count();
    let tier = |t: ConfidenceTier| entries.iter().filter(|e| e.confidence == t).count();
    let elapsed: u64 = entries.iter().map(|e| e.elapsed_ms).sum();

    JournalStats {
        total,
        successful,
        failed: total - successful,
        ambiguous: entries
            .iter()
            .filter(|e| e.outcome == Some(Outcome::Ambiguous))
            .count(),
        no_face: entries.iter().filter(|e| e.outcome.is_none()).count(),
        success_rate: round2(successful as f64 / total as f64 * 100.0),
        average_processing_ms: round2(elapsed as f64 / total as f64),
        high_confidence: tier(ConfidenceTier::High),
        medium_confidence: tier(ConfidenceTier::Medium),
        low_confidence: tier(ConfidenceTier::Low),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    /// Oldest entries are dropped past this many; 0 keeps everything.
    limit: usize,
}

impl Journal {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(JOURNAL_FILE),
            limit: 0,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let data = std::fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        postcard::from_bytes(&data).with_context(|| format!("decoding {}", self.path.display()))
    }

    pub fn append(&self, entry: JournalEntry) -> Result<()> {
        let mut entries = self.entries()?;
        entries.push(entry);
        if self.limit > 0 && entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
        self.write(&entries)
    }

    fn write(&self, entries: &[JournalEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("bin.tmp");
        let data = postcard::to_allocvec(entries)?;
        std::fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    /// Newest first: skip `skip` entries, then return at most `limit`.
    pub fn page(&self, skip: usize, limit: usize) -> Result<Vec<JournalEntry>> {
        let entries = self.entries()?;
        Ok(entries.into_iter().rev().skip(skip).take(limit).collect())
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        self.page(0, limit)
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("removing {}", self.path.display()))?;
        }
        Ok(())
    }
}
