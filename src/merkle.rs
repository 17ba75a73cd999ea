//! Content hashing and Merkle snapshots.
//!
//! Provides the deterministic content identity used by deduplication and
//! incremental sync: SHA-256 over raw file bytes, and a Merkle tree whose
//! leaves are `(relative_path, content_hash)` sorted by path. Two trees have
//! equal roots iff their `(path, hash)` sets are identical, irrespective of
//! traversal order. Metadata-only changes (permissions, mtime) never alter a
//! digest.
//!
//! Snapshots are persisted as JSON under the snapshot directory, one file per
//! SHA-256 of the absolute source root, so concurrently indexed trees never
//! collide.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// SHA-256 of a byte slice as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the raw bytes of a file.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        Error::new(ErrorKind::Io, format!("cannot read {}: {e}", path.display())).with_source(e)
    })?;
    Ok(hash_bytes(&bytes))
}

/// A deterministic tree over `(relative_path, content_hash)` leaves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MerkleTree {
    /// Leaves, sorted by path (BTreeMap keeps the order canonical).
    pub files: BTreeMap<String, String>,
    /// Root digest over the sorted leaves.
    pub root: String,
}

impl MerkleTree {
    /// Build a tree from `(relative_path, content_hash)` pairs. Input order
    /// is irrelevant; leaves are sorted by path before hashing.
    pub fn from_hashes(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let files: BTreeMap<String, String> = entries.into_iter().collect();
        let root = compute_root(&files);
        Self { files, root }
    }

    /// An empty tree (used when no snapshot exists yet).
    pub fn empty() -> Self {
        Self::from_hashes(std::iter::empty())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Persist the tree as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| Error::internal(format!("snapshot serialize: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a snapshot. Returns `None` when the file does not exist;
    /// a present-but-undeserializable file is `CorruptSnapshot` so the caller
    /// can fall back to a full rescan.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tree: MerkleTree = serde_json::from_str(&content).map_err(|e| {
            Error::new(
                ErrorKind::CorruptSnapshot,
                format!("snapshot {} cannot be deserialized: {e}", path.display()),
            )
        })?;
        // Roots recorded by older runs are recomputed rather than trusted.
        let recomputed = compute_root(&tree.files);
        if recomputed != tree.root {
            return Err(Error::new(
                ErrorKind::CorruptSnapshot,
                format!("snapshot {} root mismatch", path.display()),
            ));
        }
        Ok(Some(tree))
    }
}

/// Compute the root digest: leaf digests are `sha256(path '\0' hash)`, levels
/// hash the concatenation of child pairs until one digest remains.
fn compute_root(files: &BTreeMap<String, String>) -> String {
    if files.is_empty() {
        return hash_bytes(b"");
    }

    let mut level: Vec<String> = files
        .iter()
        .map(|(path, hash)| {
            let mut hasher = Sha256::new();
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(hash.as_bytes());
            hex::encode(hasher.finalize())
        })
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                for digest in pair {
                    hasher.update(digest.as_bytes());
                }
                hex::encode(hasher.finalize())
            })
            .collect();
    }

    level.pop().unwrap_or_else(|| hash_bytes(b""))
}

/// Snapshot file for a source root: `<dir>/<sha256(absolute_root)>.json`.
pub fn snapshot_path(snapshot_dir: &Path, root: &Path) -> PathBuf {
    let key = hash_bytes(root.to_string_lossy().as_bytes());
    snapshot_dir.join(format!("{key}.json"))
}

/// Classification of one path between two trees.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// `(old_path, new_path)` pairs with identical content hash.
    pub renamed: Vec<(String, String)>,
    pub unchanged: Vec<String>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }
}

/// Diff two trees per path.
///
/// A deleted path and an added path with the same content hash are paired as
/// a rename — one-to-one, first-match within the hash bucket, both sides in
/// path order so the pairing is deterministic.
pub fn diff(old: &MerkleTree, new: &MerkleTree) -> TreeDiff {
    let mut out = TreeDiff::default();

    let mut added: Vec<&String> = Vec::new();
    for (path, hash) in &new.files {
        match old.files.get(path) {
            None => added.push(path),
            Some(old_hash) if old_hash != hash => out.modified.push(path.clone()),
            Some(_) => out.unchanged.push(path.clone()),
        }
    }

    let mut deleted_by_hash: HashMap<&str, Vec<&String>> = HashMap::new();
    let mut deleted: Vec<&String> = Vec::new();
    for (path, hash) in &old.files {
        if !new.files.contains_key(path) {
            deleted.push(path);
            deleted_by_hash.entry(hash.as_str()).or_default().push(path);
        }
    }

    let mut renamed_from: Vec<&String> = Vec::new();
    for path in &added {
        let hash = new.files[*path].as_str();
        if let Some(bucket) = deleted_by_hash.get_mut(hash) {
            if !bucket.is_empty() {
                let from = bucket.remove(0);
                renamed_from.push(from);
                out.renamed.push(((*from).clone(), (*path).clone()));
                continue;
            }
        }
        out.added.push((*path).clone());
    }

    for path in deleted {
        if !renamed_from.iter().any(|p| *p == path) {
            out.deleted.push(path.clone());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, &str)]) -> MerkleTree {
        MerkleTree::from_hashes(
            entries
                .iter()
                .map(|(p, h)| (p.to_string(), h.to_string())),
        )
    }

    #[test]
    fn root_independent_of_insertion_order() {
        let a = tree(&[("a.rs", "h1"), ("b.rs", "h2"), ("c.rs", "h3")]);
        let b = tree(&[("c.rs", "h3"), ("a.rs", "h1"), ("b.rs", "h2")]);
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn root_changes_with_content() {
        let a = tree(&[("a.rs", "h1")]);
        let b = tree(&[("a.rs", "h2")]);
        assert_ne!(a.root, b.root);
    }

    #[test]
    fn root_changes_with_path() {
        let a = tree(&[("a.rs", "h1")]);
        let b = tree(&[("b.rs", "h1")]);
        assert_ne!(a.root, b.root);
    }

    #[test]
    fn empty_trees_agree() {
        assert_eq!(MerkleTree::empty().root, tree(&[]).root);
    }

    #[test]
    fn hash_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, b"same bytes").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_file(&path).unwrap());
        std::fs::write(&path, b"other bytes").unwrap();
        assert_ne!(hash_file(&path).unwrap(), hash_bytes(b"same bytes"));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let t = tree(&[("a.rs", "h1"), ("b.rs", "h2")]);
        t.save(&path).unwrap();
        let loaded = MerkleTree::load(&path).unwrap().unwrap();
        assert_eq!(loaded, t);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MerkleTree::load(&dir.path().join("absent.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_snapshot_is_structured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = MerkleTree::load(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptSnapshot);
    }

    #[test]
    fn diff_classifies_all_four() {
        let old = tree(&[("a.ts", "ha"), ("b.ts", "hb"), ("c.ts", "hc")]);
        let new = tree(&[("b.ts", "hb2"), ("c.ts", "hc"), ("d.ts", "hd")]);
        let d = diff(&old, &new);
        assert_eq!(d.added, vec!["d.ts"]);
        assert_eq!(d.modified, vec!["b.ts"]);
        assert_eq!(d.deleted, vec!["a.ts"]);
        assert_eq!(d.unchanged, vec!["c.ts"]);
        assert!(d.renamed.is_empty());
    }

    #[test]
    fn diff_pairs_renames_by_hash() {
        let old = tree(&[("old/name.rs", "same"), ("keep.rs", "k")]);
        let new = tree(&[("new/name.rs", "same"), ("keep.rs", "k")]);
        let d = diff(&old, &new);
        assert_eq!(
            d.renamed,
            vec![("old/name.rs".to_string(), "new/name.rs".to_string())]
        );
        assert!(d.added.is_empty());
        assert!(d.deleted.is_empty());
    }

    #[test]
    fn rename_pairing_is_one_to_one() {
        // Two deleted paths share a hash with one added path: only one pairs.
        let old = tree(&[("a.rs", "same"), ("b.rs", "same")]);
        let new = tree(&[("c.rs", "same")]);
        let d = diff(&old, &new);
        assert_eq!(d.renamed.len(), 1);
        assert_eq!(d.renamed[0].1, "c.rs");
        assert_eq!(d.deleted.len(), 1);
    }

    #[test]
    fn snapshot_paths_differ_per_root() {
        let dir = Path::new("/tmp/snaps");
        let a = snapshot_path(dir, Path::new("/home/u/project-a"));
        let b = snapshot_path(dir, Path::new("/home/u/project-b"));
        assert_ne!(a, b);
    }
}
