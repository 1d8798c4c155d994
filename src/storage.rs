//! File-backed registry: a postcard-encoded list of enrolled faces.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use faceid_core::identity::from_json_list;
use faceid_core::{Embedding, IdentityId, Profile, RegistryRecord, RegistrySource, SourceError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const REGISTRY_FILE: &str = "registry.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    pub code: Option<String>,
    pub email: Option<String>,
    pub watchlisted: bool,
    pub active: bool,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
    pub enrolled_at: DateTime<Utc>,
}

/// Fields supplied by the operator when enrolling.
#[derive(Debug, Clone, Default)]
pub struct Enrollment {
    pub first_name: String,
    pub last_name: String,
    pub code: Option<String>,
    pub email: Option<String>,
    pub watchlisted: bool,
    pub embedding: Vec<f32>,
}

/// Fields to change on an existing identity; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub code: Option<String>,
    pub email: Option<String>,
    pub watchlisted: Option<bool>,
    /// Replaces the enrolled vector.
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub enrolled: Vec<IdentityId>,
    /// `(label, error)` for every entry that was not enrolled.
    pub failed: Vec<(String, String)>,
}

impl From<FaceRecord> for RegistryRecord {
    fn from(r: FaceRecord) -> Self {
        RegistryRecord {
            id: r.id,
            profile: Profile {
                first_name: r.first_name,
                last_name: r.last_name,
                code: r.code,
                email: r.email,
                watchlisted: r.watchlisted,
                metadata: r.metadata,
            },
            encoding: r.embedding,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileRegistry {
    dir: PathBuf,
}

impl FileRegistry {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn read(&self) -> Result<Vec<FaceRecord>, SourceError> {
        let file = self.path();
        if !file.exists() {
            return Ok(vec![]);
        }
        let data = std::fs::read(&file)?;
        postcard::from_bytes(&data)
            .map_err(|e| SourceError::Decode(format!("{}: {}", file.display(), e)))
    }

    pub fn load_records(&self) -> Result<Vec<FaceRecord>> {
        self.read()
            .with_context(|| format!("reading {}", self.path().display()))
    }

    fn write(&self, records: &[FaceRecord]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let file = self.path();
        let tmp = file.with_extension("bin.tmp");
        let data = postcard::to_allocvec(records)?;
        std::fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &file).with_context(|| format!("replacing {}", file.display()))?;
        Ok(())
    }

    pub fn get(&self, id: IdentityId) -> Result<Option<FaceRecord>> {
        Ok(self.load_records()?.into_iter().find(|r| r.id == id))
    }

    pub fn find_by_code(&self, code: &str) -> Result<Option<FaceRecord>> {
        Ok(self
            .load_records()?
            .into_iter()
            .find(|r| r.code.as_deref() == Some(code)))
    }

    /// Append a new identity and return the stored record.
    pub fn enroll(&self, enrollment: Enrollment) -> Result<FaceRecord> {
        let mut records = self.load_records()?;
        let record = push_enrollment(&mut records, enrollment)?;
        self.write(&records)?;
        Ok(record)
    }

    /// Enroll every entry that validates; one write at the end.
    pub fn enroll_batch(
        &self,
        entries: Vec<(String, Result<Enrollment, String>)>,
    ) -> Result<BatchReport> {
        let mut records = self.load_records()?;
        let mut report = BatchReport::default();
        for (label, entry) in entries {
            report.processed += 1;
            let outcome = entry.and_then(|enrollment| {
                push_enrollment(&mut records, enrollment).map_err(|e| e.to_string())
            });
            match outcome {
                Ok(record) => {
                    info!("{}: enrolled as identity {}", label, record.id);
                    report.enrolled.push(record.id);
                }
                Err(e) => {
                    warn!("{}: {}", label, e);
                    report.failed.push((label, e));
                }
            }
        }
        if !report.enrolled.is_empty() {
            self.write(&records)?;
        }
        Ok(report)
    }

    /// Returns the updated record, or `None` when no record has `id`.
    pub fn update(&self, id: IdentityId, update: ProfileUpdate) -> Result<Option<FaceRecord>> {
        let mut records = self.load_records()?;
        let Some(pos) = records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &update.code {
            if records
                .iter()
                .any(|r| r.id != id && r.code.as_ref() == Some(code))
            {
                anyhow::bail!("an identity with code {} is already enrolled", code);
            }
        }
        if let Some(embedding) = &update.embedding {
            check_embedding(&records, embedding, Some(id))?;
        }

        let record = &mut records[pos];
        if let Some(v) = update.first_name {
            record.first_name = v;
        }
        if let Some(v) = update.last_name {
            record.last_name = v;
        }
        if let Some(v) = update.code {
            record.code = Some(v);
        }
        if let Some(v) = update.email {
            record.email = Some(v);
        }
        if let Some(v) = update.watchlisted {
            record.watchlisted = v;
        }
        if let Some(v) = update.embedding {
            record.embedding = v;
        }
        let updated = record.clone();
        self.write(&records)?;
        Ok(Some(updated))
    }

    /// Returns false when no record has `id`.
    pub fn remove(&self, id: IdentityId) -> Result<bool> {
        let mut records = self.load_records()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records)?;
        Ok(true)
    }

    pub fn set_watchlisted(&self, id: IdentityId, watchlisted: bool) -> Result<bool> {
        self.modify(id, |r| r.watchlisted = watchlisted)
    }

    pub fn set_active(&self, id: IdentityId, active: bool) -> Result<bool> {
        self.modify(id, |r| r.active = active)
    }

    fn modify(&self, id: IdentityId, f: impl FnOnce(&mut FaceRecord)) -> Result<bool> {
        let mut records = self.load_records()?;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => f(record),
            None => return Ok(false),
        }
        self.write(&records)?;
        Ok(true)
    }

    pub fn purge(&self) -> Result<()> {
        let file = self.path();
        if file.exists() {
            std::fs::remove_file(&file).with_context(|| format!("removing {}", file.display()))?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn push_enrollment(records: &mut Vec<FaceRecord>, enrollment: Enrollment) -> Result<FaceRecord> {
    if let Some(code) = &enrollment.code {
        if records.iter().any(|r| r.code.as_ref() == Some(code)) {
            anyhow::bail!("an identity with code {} is already enrolled", code);
        }
    }
    check_embedding(records, &enrollment.embedding, None)?;
    let record = FaceRecord {
        id: next_id(records),
        first_name: enrollment.first_name,
        last_name: enrollment.last_name,
        code: enrollment.code,
        email: enrollment.email,
        watchlisted: enrollment.watchlisted,
        active: true,
        metadata: BTreeMap::new(),
        embedding: enrollment.embedding,
        enrolled_at: Utc::now(),
    };
    records.push(record.clone());
    Ok(record)
}

/// A stored vector must be valid and match the dimension of the other
/// records (`skip` excludes the record being replaced).
fn check_embedding(
    records: &[FaceRecord],
    embedding: &[f32],
    skip: Option<IdentityId>,
) -> Result<()> {
    Embedding::new(embedding.to_vec()).context("invalid face vector")?;
    let existing = records
        .iter()
        .find(|r| Some(r.id) != skip)
        .map(|r| r.embedding.len());
    if let Some(dim) = existing {
        if dim != embedding.len() {
            anyhow::bail!(
                "vector has dimension {}, registry holds dimension {}",
                embedding.len(),
                dim
            );
        }
    }
    Ok(())
}

fn next_id(records: &[FaceRecord]) -> IdentityId {
    records.iter().map(|r| r.id).max().map_or(1, |max| max + 1)
}

impl RegistrySource for FileRegistry {
    fn fetch_all(&self) -> Result<Vec<RegistryRecord>, SourceError> {
        Ok(self
            .read()?
            .into_iter()
            .filter(|r| r.active && !r.embedding.is_empty())
            .map(RegistryRecord::from)
            .collect())
    }
}

/// Registry exported as a JSON array of identity documents, e.g. a dump of
/// a REST listing endpoint.
#[derive(Debug, Clone)]
pub struct JsonExport {
    path: PathBuf,
}

impl JsonExport {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegistrySource for JsonExport {
    fn fetch_all(&self) -> Result<Vec<RegistryRecord>, SourceError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let docs: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Decode(format!("{}: {}", self.path.display(), e)))?;
        from_json_list(&docs)
    }
}
