//! Bulk enrollment input: a JSON manifest (array of identity documents) or
//! a directory holding one `*.json` document per identity.

use anyhow::{Context, Result};
use faceid_core::identity::parse_json;
use serde_json::Value;
use std::path::Path;

use crate::storage::Enrollment;

pub type BatchEntry = (String, Result<Enrollment, String>);

pub fn read_enrollments(path: &Path) -> Result<Vec<BatchEntry>> {
    if path.is_dir() {
        return read_dir(path);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let docs: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    let items = docs
        .as_array()
        .with_context(|| format!("{}: expected a JSON array", path.display()))?;
    Ok(items
        .iter()
        .enumerate()
        .map(|(i, doc)| (format!("entry {}", i + 1), to_enrollment(doc)))
        .collect())
}

fn read_dir(dir: &Path) -> Result<Vec<BatchEntry>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    Ok(files
        .into_iter()
        .map(|path| {
            let label = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let entry = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string()))
                .and_then(|doc| to_enrollment(&doc));
            (label, entry)
        })
        .collect())
}

fn to_enrollment(doc: &Value) -> Result<Enrollment, String> {
    let parsed = parse_json(doc).map_err(|e| e.to_string())?;
    let embedding = parsed.encoding.ok_or("no face encoding")?;
    if parsed.profile.first_name.is_empty() && parsed.profile.last_name.is_empty() {
        return Err("missing name".into());
    }
    Ok(Enrollment {
        first_name: parsed.profile.first_name,
        last_name: parsed.profile.last_name,
        code: parsed.profile.code,
        email: parsed.profile.email,
        watchlisted: parsed.profile.watchlisted,
        embedding,
    })
}
