//! Decide what a scan should do with each file it found on disk.
//!
//! Pure: takes the active catalog, the hashed files and an existence check,
//! and returns a plan. Nothing here touches the database or the filesystem.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::db::models::{File, FileId};

/// A file found on disk, with its content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Hashed {
    pub path: String,
    pub hash: Vec<u8>,
    pub size: i64,
}

/// Active catalog entries indexed by path and by hash.
pub struct ExistingFiles {
    by_path: HashMap<String, (FileId, Vec<u8>)>,
    by_hash: HashMap<Vec<u8>, Vec<(FileId, String)>>,
}

impl ExistingFiles {
    pub fn new(active: &[File]) -> Self {
        let mut by_path = HashMap::with_capacity(active.len());
        let mut by_hash: HashMap<Vec<u8>, Vec<(FileId, String)>> = HashMap::new();
        for f in active {
            by_path.insert(f.path.clone(), (f.id, f.hash.clone()));
            by_hash
                .entry(f.hash.clone())
                .or_default()
                .push((f.id, f.path.clone()));
        }
        Self { by_path, by_hash }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Same path, same content.
    Unchanged,
    /// Content already catalogued under a path that no longer exists.
    Moved(FileId),
    /// Same path, new content.
    Modified(FileId),
    New,
}

pub fn classify(
    found: &Hashed,
    existing: &ExistingFiles,
    exists: impl Fn(&str) -> bool,
) -> Classification {
    match existing.by_path.get(&found.path) {
        Some((_, hash)) if *hash == found.hash => Classification::Unchanged,
        Some((id, _)) => Classification::Modified(*id),
        None => existing
            .by_hash
            .get(&found.hash)
            .and_then(|entries| entries.iter().find(|(_, old)| !exists(old)))
            .map_or(Classification::New, |(id, _)| Classification::Moved(*id)),
    }
}

#[derive(Debug, Default)]
pub struct ScanPlan {
    pub unchanged: Vec<Hashed>,
    pub moved: Vec<(FileId, Hashed)>,
    pub modified: Vec<(FileId, Hashed)>,
    pub new: Vec<Hashed>,
    /// Active files under a scanned root that were not found.
    pub missing: Vec<FileId>,
}

/// Classify every found file and work out which catalogued files went missing.
pub fn plan(
    found: Vec<Hashed>,
    existing: &ExistingFiles,
    roots: &[PathBuf],
    exists: impl Fn(&str) -> bool,
) -> ScanPlan {
    let mut plan = ScanPlan::default();
    let mut claimed: HashSet<FileId> = HashSet::new();

    for f in found {
        match classify(&f, existing, &exists) {
            Classification::Unchanged => plan.unchanged.push(f),
            // Two copies of a moved file: the first takes the identity
            Classification::Moved(id) if !claimed.insert(id) => plan.new.push(f),
            Classification::Moved(id) => plan.moved.push((id, f)),
            Classification::Modified(id) => plan.modified.push((id, f)),
            Classification::New => plan.new.push(f),
        }
    }

    // A move wins over a path match for the same file; the path is then new
    let (conflicts, modified): (Vec<_>, Vec<_>) = plan
        .modified
        .into_iter()
        .partition(|(id, _)| claimed.contains(id));
    plan.modified = modified;
    plan.new.extend(conflicts.into_iter().map(|(_, f)| f));

    let seen: HashSet<&str> = plan
        .unchanged
        .iter()
        .map(|f| f.path.as_str())
        .chain(plan.moved.iter().map(|(_, f)| f.path.as_str()))
        .chain(plan.modified.iter().map(|(_, f)| f.path.as_str()))
        .chain(plan.new.iter().map(|f| f.path.as_str()))
        .collect();
    let touched: HashSet<FileId> = plan
        .moved
        .iter()
        .chain(plan.modified.iter())
        .map(|(id, _)| *id)
        .collect();

    let mut missing: Vec<FileId> = existing
        .by_path
        .iter()
        .filter(|(path, (id, _))| {
            !seen.contains(path.as_str())
                && !touched.contains(id)
                && roots.iter().any(|r| Path::new(path.as_str()).starts_with(r))
        })
        .map(|(_, (id, _))| *id)
        .collect();
    missing.sort();
    plan.missing = missing;
    plan
}
