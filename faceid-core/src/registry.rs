//! In-memory registry of enrolled vectors.
//!
//! Readers take an `Arc` to the current [`RegistrySnapshot`]; a load builds
//! a fresh snapshot off to the side and swaps the pointer, so a reader never
//! sees a partially rebuilt registry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::error::SourceError;
use crate::identity::{EnrolledIdentity, RegistryRecord};
use crate::Embedding;

/// Contract with the external registry store.
pub trait RegistrySource {
    fn fetch_all(&self) -> Result<Vec<RegistryRecord>, SourceError>;
}

impl<F> RegistrySource for F
where
    F: Fn() -> Result<Vec<RegistryRecord>, SourceError>,
{
    fn fetch_all(&self) -> Result<Vec<RegistryRecord>, SourceError> {
        self()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    identities: Vec<EnrolledIdentity>,
    dimension: Option<usize>,
    rejected: usize,
    loaded_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl RegistrySnapshot {
    /// Build a snapshot from already-normalized identities, in order.
    /// No dimension filtering is applied here.
    pub fn from_identities(identities: Vec<EnrolledIdentity>) -> Self {
        let dimension = identities.first().map(EnrolledIdentity::dim);
        Self {
            identities,
            dimension,
            rejected: 0,
            loaded_at: Some(Utc::now()),
            generation: 0,
        }
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    pub fn vectors(&self) -> impl Iterator<Item = &Embedding> {
        self.identities.iter().map(|i| &i.embedding)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Dimensionality of the first accepted vector.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Entries dropped during the load that produced this snapshot.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Increments on every successful swap; 0 means never loaded.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded { count: usize, rejected: usize },
    /// Source returned nothing usable; the previous snapshot stays.
    NoData,
    /// Source failed; the previous snapshot stays.
    Failed,
}

impl LoadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadStatus::Loaded { .. })
    }
}

pub struct RegistryCache<S> {
    source: S,
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
    ready: AtomicBool,
    generation: AtomicU64,
}

impl<S: RegistrySource> RegistryCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            writer: Mutex::new(()),
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Pull the full registry from the source and swap it in.
    pub fn load(&self) -> LoadStatus {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let records = match self.source.fetch_all() {
            Ok(records) => records,
            Err(e) => {
                error!("Registry load failed, keeping previous snapshot: {}", e);
                return LoadStatus::Failed;
            }
        };

        if records.is_empty() {
            warn!("Registry source returned no identities");
            return LoadStatus::NoData;
        }

        let (identities, rejected) = validate(records);
        if identities.is_empty() {
            warn!(
                "Registry source returned {} entries, none usable",
                rejected
            );
            return LoadStatus::NoData;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let count = identities.len();
        let snapshot = RegistrySnapshot {
            dimension: identities.first().map(EnrolledIdentity::dim),
            identities,
            rejected,
            loaded_at: Some(Utc::now()),
            generation,
        };
        info!(
            "Loaded {} identities (dimension {}, {} rejected)",
            count,
            snapshot.dimension.unwrap_or(0),
            rejected
        );

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        self.ready.store(true, Ordering::SeqCst);

        LoadStatus::Loaded { count, rejected }
    }

    /// Operator-triggered refresh after out-of-band registry edits.
    pub fn reload(&self) -> LoadStatus {
        self.load()
    }

    /// Current snapshot. Stays valid and unchanged for as long as the
    /// caller holds it, regardless of concurrent reloads.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn count(&self) -> usize {
        self.snapshot().len()
    }

    /// At least one load produced a usable snapshot.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Convert records into identities, dropping invalid vectors, duplicate ids
/// and vectors whose length differs from the first accepted one.
fn validate(records: Vec<RegistryRecord>) -> (Vec<EnrolledIdentity>, usize) {
    let mut identities: Vec<EnrolledIdentity> = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();
    let mut rejected = 0;
    let mut dimension = None;

    for record in records {
        let id = record.id;
        if !seen.insert(id) {
            warn!("Identity {}: duplicate id, keeping first entry", id);
            rejected += 1;
            continue;
        }
        let identity = match EnrolledIdentity::try_from(record) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Identity {}: rejected: {}", id, e);
                rejected += 1;
                continue;
            }
        };
        let dim = *dimension.get_or_insert(identity.dim());
        if identity.dim() != dim {
            warn!(
                "Identity {}: vector length {} differs from registry dimension {}",
                id,
                identity.dim(),
                dim
            );
            rejected += 1;
            continue;
        }
        identities.push(identity);
    }

    (identities, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Profile;
    use std::sync::Mutex as StdMutex;

    fn record(id: u64, encoding: Vec<f32>) -> RegistryRecord {
        RegistryRecord {
            id,
            profile: Profile::default(),
            encoding,
        }
    }

    /// Source whose next response can be swapped by the test.
    struct Scripted(StdMutex<Result<Vec<RegistryRecord>, String>>);

    impl Scripted {
        fn new(records: Vec<RegistryRecord>) -> Self {
            Self(StdMutex::new(Ok(records)))
        }

        fn set(&self, next: Result<Vec<RegistryRecord>, String>) {
            *self.0.lock().unwrap() = next;
        }
    }

    impl RegistrySource for Scripted {
        fn fetch_all(&self) -> Result<Vec<RegistryRecord>, SourceError> {
            self.0.lock().unwrap().clone().map_err(SourceError::Backend)
        }
    }

    #[test]
    fn test_load_and_count() {
        let cache = RegistryCache::new(Scripted::new(vec![
            record(1, vec![1.0, 0.0]),
            record(2, vec![0.0, 1.0]),
        ]));
        assert!(!cache.is_ready());
        assert_eq!(cache.count(), 0);

        let status = cache.load();
        assert_eq!(status, LoadStatus::Loaded { count: 2, rejected: 0 });
        assert!(status.is_success());
        assert!(cache.is_ready());
        assert_eq!(cache.count(), 2);

        let snap = cache.snapshot();
        assert_eq!(snap.dimension(), Some(2));
        assert_eq!(snap.generation(), 1);
        assert!(snap.loaded_at().is_some());
    }

    #[test]
    fn test_empty_source_is_no_data() {
        let cache = RegistryCache::new(Scripted::new(vec![]));
        assert_eq!(cache.load(), LoadStatus::NoData);
        assert!(!cache.is_ready());
        assert!(cache.snapshot().is_empty());
        assert_eq!(cache.snapshot().generation(), 0);
    }

    #[test]
    fn test_failure_and_empty_keep_previous_snapshot() {
        let source = Scripted::new(vec![record(1, vec![1.0, 0.0])]);
        let cache = RegistryCache::new(source);
        assert!(cache.load().is_success());

        cache.source().set(Err("connection refused".into()));
        assert_eq!(cache.reload(), LoadStatus::Failed);
        assert_eq!(cache.count(), 1);
        assert!(cache.is_ready());

        cache.source().set(Ok(vec![]));
        assert_eq!(cache.reload(), LoadStatus::NoData);
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.snapshot().generation(), 1);
    }

    #[test]
    fn test_rejects_inconsistent_entries() {
        let cache = RegistryCache::new(Scripted::new(vec![
            record(1, vec![1.0, 0.0, 0.0]),
            record(2, vec![1.0, 0.0]),
            record(3, vec![0.0, 0.0, 0.0]),
            record(4, vec![0.0, f32::INFINITY, 0.0]),
            record(1, vec![0.0, 1.0, 0.0]),
            record(5, vec![0.0, 0.0, 1.0]),
        ]));
        assert_eq!(cache.load(), LoadStatus::Loaded { count: 2, rejected: 4 });
        let snap = cache.snapshot();
        let ids: Vec<_> = snap.identities().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert_eq!(snap.rejected(), 4);
        assert_eq!(snap.vectors().count(), 2);
    }

    #[test]
    fn test_all_rejected_is_no_data() {
        let cache = RegistryCache::new(Scripted::new(vec![record(1, vec![0.0, 0.0])]));
        assert_eq!(cache.load(), LoadStatus::NoData);
        assert!(!cache.is_ready());
    }

    #[test]
    fn test_held_snapshot_survives_reload() {
        let cache = RegistryCache::new(Scripted::new(vec![record(1, vec![1.0, 0.0])]));
        cache.load();
        let held = cache.snapshot();

        cache
            .source()
            .set(Ok(vec![record(2, vec![0.0, 1.0]), record(3, vec![1.0, 1.0])]));
        cache.reload();

        assert_eq!(held.len(), 1);
        assert_eq!(held.identities()[0].id, 1);
        assert_eq!(cache.count(), 2);
        assert_eq!(cache.snapshot().generation(), 2);
    }

    #[test]
    fn test_closure_source() {
        let cache = RegistryCache::new(|| -> Result<Vec<RegistryRecord>, SourceError> {
            Ok(vec![record(9, vec![0.5, 0.5])])
        });
        assert!(cache.load().is_success());
        assert_eq!(cache.snapshot().identities()[0].id, 9);
    }
}
