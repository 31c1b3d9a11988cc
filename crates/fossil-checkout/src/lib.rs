//! Working-tree model (C7), grounded on `vfile.c`: one row per tracked
//! file, a signature check that decides whether disk content has drifted
//! from what was checked out, and the materialize/revert/uncheckout
//! operations that move bytes between the blob store and the filesystem.

use std::path::{Path, PathBuf};

use fossil_artifact::Index;
use fossil_objects::{BlobStore, ObjectError, Rid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("object store error: {0}")]
    Object(#[from] ObjectError),
    #[error("crosslink index error: {0}")]
    Index(#[from] fossil_artifact::ArtifactError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no such tracked file: {0}")]
    NotTracked(String),
}

/// `vfile.chnged` (spec §4.7), extended with an independent mode bit
/// (SPEC_FULL.md §B) so a chmod-only edit can be reported without being
/// conflated with a content edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeState {
    Unchanged,
    Edited,
    /// Left over from an unresolved merge (spec §4.7's merge-conflict
    /// check-in rule).
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VFileRow {
    pub path: String,
    /// The blob this file is checked out at, `None` if newly added and not
    /// yet committed.
    pub mrid: Option<u64>,
    pub deleted: bool,
    pub chnged: ChangeState,
    /// SPEC_FULL.md §B: true when only the executable bit differs from
    /// what was checked out, independent of `chnged`.
    pub mode_changed: bool,
    pub executable: bool,
    pub size: u64,
    pub mtime: Option<i64>,
}

pub struct Checkout {
    root: PathBuf,
    vfile: sled::Tree,
}

fn io_err(path: &Path, source: std::io::Error) -> CheckoutError {
    CheckoutError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn file_mtime(path: &Path) -> std::io::Result<Option<i64>> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta
                .modified()?
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            Ok(Some(mtime))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> std::io::Result<bool> {
    Ok(false)
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perm = std::fs::metadata(path)?.permissions();
    let mode = perm.mode();
    perm.set_mode(if executable { mode | 0o111 } else { mode & !0o111 });
    std::fs::set_permissions(path, perm)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
    Ok(())
}

impl Checkout {
    pub fn open(db: &sled::Db, root: impl Into<PathBuf>) -> Result<Self, CheckoutError> {
        Ok(Checkout {
            root: root.into(),
            vfile: db.open_tree("vfile")?,
        })
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn get_row(&self, path: &str) -> Result<Option<VFileRow>, CheckoutError> {
        Ok(self
            .vfile
            .get(path.as_bytes())?
            .map(|raw| bincode::deserialize(&raw))
            .transpose()?)
    }

    fn put_row(&self, row: &VFileRow) -> Result<(), CheckoutError> {
        self.vfile
            .insert(row.path.as_bytes(), bincode::serialize(row)?)?;
        Ok(())
    }

    pub fn tracked_files(&self) -> Result<Vec<VFileRow>, CheckoutError> {
        let mut out: Vec<VFileRow> = Vec::new();
        for entry in self.vfile.iter() {
            let (_, raw) = entry?;
            out.push(bincode::deserialize(&raw)?);
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Populate the working-tree table from a check-in's mlink rows
    /// (`vfile_build` in the original). Clears any prior contents first —
    /// a checkout always replaces the table wholesale.
    pub fn load_from_checkin(
        &self,
        store: &BlobStore,
        index: &Index,
        ci_rid: Rid,
    ) -> Result<(), CheckoutError> {
        self.vfile.clear()?;
        for mlink in index.mlink_rows_for_checkin(ci_rid)? {
            let path = index
                .path_of(mlink.path_id)?
                .ok_or_else(|| CheckoutError::NotTracked(mlink.path_id.to_string()))?;
            let mrid = mlink.new_fid;
            let size = match mrid {
                Some(rid) => store.size(Rid(rid))?,
                None => 0,
            };
            self.put_row(&VFileRow {
                path,
                mrid,
                deleted: false,
                chnged: ChangeState::Unchanged,
                mode_changed: false,
                executable: mlink.permission.as_deref() == Some("x"),
                size,
                mtime: None,
            })?;
        }
        Ok(())
    }

    /// Write every tracked, non-deleted file's checked-in content to disk
    /// (`vfile_to_disk`).
    pub fn materialize_to_disk(&self, store: &BlobStore) -> Result<(), CheckoutError> {
        for row in self.tracked_files()? {
            if row.deleted {
                continue;
            }
            let Some(mrid) = row.mrid else { continue };
            let bytes = store.get(Rid(mrid))?;
            let full = self.full_path(&row.path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            std::fs::write(&full, &bytes).map_err(|e| io_err(&full, e))?;
            if row.executable {
                set_executable(&full, true).map_err(|e| io_err(&full, e))?;
            }
            let mtime = file_mtime(&full)
                .map_err(|e| io_err(&full, e))?
                .unwrap_or(0);
            self.put_row(&VFileRow {
                mtime: Some(mtime),
                size: bytes.len() as u64,
                ..row
            })?;
        }
        Ok(())
    }

    /// Compare every tracked file's on-disk state against what was checked
    /// out, setting `chnged`/`mode_changed` accordingly
    /// (`vfile_check_signature`). `use_content_hash` forces a content
    /// comparison even when size and mtime both match, mirroring the
    /// original's `useSha1sum` override of the `mtime-changes` fast path.
    pub fn signature_check(
        &self,
        store: &BlobStore,
        use_content_hash: bool,
    ) -> Result<(), CheckoutError> {
        for row in self.tracked_files()? {
            let full = self.full_path(&row.path);
            let mut updated = row.clone();
            let disk_mtime = file_mtime(&full).map_err(|e| io_err(&full, e))?;

            if row.deleted {
                updated.chnged = ChangeState::Edited;
            } else if disk_mtime.is_none() {
                updated.chnged = ChangeState::Edited;
            } else {
                let disk_size = std::fs::metadata(&full).map(|m| m.len()).unwrap_or(0);
                if disk_size != row.size {
                    updated.chnged = ChangeState::Edited;
                } else if use_content_hash || disk_mtime != row.mtime {
                    let disk_bytes = std::fs::read(&full).map_err(|e| io_err(&full, e))?;
                    let stored_bytes = match row.mrid {
                        Some(rid) => store.get(Rid(rid))?,
                        None => Vec::new(),
                    };
                    updated.chnged = if disk_bytes == stored_bytes {
                        ChangeState::Unchanged
                    } else {
                        ChangeState::Edited
                    };
                    updated.mtime = disk_mtime;
                } else {
                    updated.chnged = ChangeState::Unchanged;
                }

                let disk_executable = is_executable(&full).unwrap_or(false);
                updated.mode_changed = disk_executable != row.executable;
            }

            if updated.chnged != row.chnged
                || updated.mode_changed != row.mode_changed
                || updated.mtime != row.mtime
            {
                self.put_row(&updated)?;
            }
        }
        Ok(())
    }

    /// Restore the listed paths (or every tracked file, if `paths` is
    /// empty) to their checked-in content, discarding local edits.
    pub fn revert(&self, store: &BlobStore, paths: &[String]) -> Result<(), CheckoutError> {
        let targets = if paths.is_empty() {
            self.tracked_files()?
        } else {
            paths
                .iter()
                .map(|p| {
                    self.get_row(p)?
                        .ok_or_else(|| CheckoutError::NotTracked(p.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        for row in targets {
            let Some(mrid) = row.mrid else { continue };
            let bytes = store.get(Rid(mrid))?;
            let full = self.full_path(&row.path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            std::fs::write(&full, &bytes).map_err(|e| io_err(&full, e))?;
            if row.executable {
                set_executable(&full, true).map_err(|e| io_err(&full, e))?;
            }
            let mtime = file_mtime(&full).map_err(|e| io_err(&full, e))?;
            self.put_row(&VFileRow {
                deleted: false,
                chnged: ChangeState::Unchanged,
                mode_changed: false,
                mtime,
                size: bytes.len() as u64,
                ..row
            })?;
        }
        Ok(())
    }

    /// Delete every tracked file from disk and drop the working-tree table
    /// (`vfile_unlink` plus clearing VFILE), then remove any directory left
    /// empty by the unlinks. The checkout root is never removed, nor is any
    /// directory named in `empty_dirs` (spec §4.6's `empty-dirs` setting).
    pub fn uncheckout(&self, empty_dirs: &[String]) -> Result<(), CheckoutError> {
        let mut touched_dirs: Vec<PathBuf> = Vec::new();
        for row in self.tracked_files()? {
            let full = self.full_path(&row.path);
            match std::fs::remove_file(&full) {
                Ok(()) => {
                    if let Some(parent) = full.parent() {
                        touched_dirs.push(parent.to_path_buf());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&full, e)),
            }
        }
        self.vfile.clear()?;
        self.remove_empty_dirs(touched_dirs, empty_dirs)?;
        Ok(())
    }

    /// Walk each touched directory and its ancestors (bottom-up, stopping
    /// at the checkout root), removing any that are empty and not
    /// protected by `empty_dirs`.
    fn remove_empty_dirs(
        &self,
        touched_dirs: Vec<PathBuf>,
        empty_dirs: &[String],
    ) -> Result<(), CheckoutError> {
        let mut seen = std::collections::HashSet::new();
        for dir in touched_dirs {
            let mut current = dir.as_path();
            loop {
                if current == self.root || !current.starts_with(&self.root) {
                    break;
                }
                if !seen.insert(current.to_path_buf()) {
                    break;
                }
                let protected = current
                    .strip_prefix(&self.root)
                    .ok()
                    .and_then(|rel| rel.to_str())
                    .map(|rel| empty_dirs.iter().any(|d| d == rel))
                    .unwrap_or(false);
                if !protected {
                    let is_empty = std::fs::read_dir(current)
                        .map(|mut entries| entries.next().is_none())
                        .unwrap_or(false);
                    if is_empty {
                        match std::fs::remove_dir(current) {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(io_err(current, e)),
                        }
                    }
                }
                let Some(parent) = current.parent() else { break };
                current = parent;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fossil_artifact::index::{Index as CrosslinkIndex, MlinkRow};
    use fossil_objects::{PutFlags, StoreConfig};

    fn setup() -> (sled::Db, tempfile::TempDir, BlobStore) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open_in_memory(StoreConfig::default()).unwrap();
        (db, dir, store)
    }

    fn seed_one_file(db: &sled::Db, store: &BlobStore, path: &str, content: &[u8]) -> Rid {
        let index = CrosslinkIndex::open(db).unwrap();
        let rid = match store.put(content, PutFlags::NONE).unwrap() {
            fossil_objects::PutOutcome::Stored { rid, .. } => rid,
            _ => panic!(),
        };
        let path_id = {
            // Force path allocation through the real crosslink path by
            // writing a synthetic mlink row directly, since constructing a
            // full check-in artifact is unnecessary for this unit test.
            let filename = db.open_tree("filename").unwrap();
            let filename_rev = db.open_tree("filename_rev").unwrap();
            let id = 1u64;
            filename.insert(path.as_bytes(), id.to_be_bytes().to_vec()).unwrap();
            filename_rev.insert(id.to_be_bytes(), path.as_bytes().to_vec()).unwrap();
            id
        };
        let mlink = db.open_tree("mlink").unwrap();
        let ci_rid = Rid(100);
        let mut key = ci_rid.0.to_be_bytes().to_vec();
        key.extend_from_slice(&path_id.to_be_bytes());
        mlink
            .insert(
                key,
                bincode::serialize(&MlinkRow {
                    ci_rid: ci_rid.0,
                    path_id,
                    new_fid: Some(rid.0),
                    old_fid: None,
                    permission: None,
                })
                .unwrap(),
            )
            .unwrap();
        let _ = index;
        rid
    }

    #[test]
    fn load_materialize_and_signature_check_round_trip() {
        let (db, dir, store) = setup();
        seed_one_file(&db, &store, "a.txt", b"hello world");
        let index = CrosslinkIndex::open(&db).unwrap();
        let checkout = Checkout::open(&db, dir.path()).unwrap();
        checkout.load_from_checkin(&store, &index, Rid(100)).unwrap();
        checkout.materialize_to_disk(&store).unwrap();

        let on_disk = std::fs::read(dir.path().join("a.txt")).unwrap();
        assert_eq!(on_disk, b"hello world");

        checkout.signature_check(&store, false).unwrap();
        let row = checkout.get_row("a.txt").unwrap().unwrap();
        assert_eq!(row.chnged, ChangeState::Unchanged);
    }

    #[test]
    fn editing_the_file_on_disk_is_detected() {
        let (db, dir, store) = setup();
        seed_one_file(&db, &store, "a.txt", b"hello world");
        let index = CrosslinkIndex::open(&db).unwrap();
        let checkout = Checkout::open(&db, dir.path()).unwrap();
        checkout.load_from_checkin(&store, &index, Rid(100)).unwrap();
        checkout.materialize_to_disk(&store).unwrap();

        std::fs::write(dir.path().join("a.txt"), b"hello MUTATED").unwrap();
        checkout.signature_check(&store, true).unwrap();
        let row = checkout.get_row("a.txt").unwrap().unwrap();
        assert_eq!(row.chnged, ChangeState::Edited);
    }

    #[test]
    fn revert_restores_checked_in_content() {
        let (db, dir, store) = setup();
        seed_one_file(&db, &store, "a.txt", b"hello world");
        let index = CrosslinkIndex::open(&db).unwrap();
        let checkout = Checkout::open(&db, dir.path()).unwrap();
        checkout.load_from_checkin(&store, &index, Rid(100)).unwrap();
        checkout.materialize_to_disk(&store).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"corrupted").unwrap();

        checkout.revert(&store, &["a.txt".to_string()]).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello world");
        let row = checkout.get_row("a.txt").unwrap().unwrap();
        assert_eq!(row.chnged, ChangeState::Unchanged);
    }

    #[test]
    fn uncheckout_removes_files_from_disk() {
        let (db, dir, store) = setup();
        seed_one_file(&db, &store, "a.txt", b"hello world");
        let index = CrosslinkIndex::open(&db).unwrap();
        let checkout = Checkout::open(&db, dir.path()).unwrap();
        checkout.load_from_checkin(&store, &index, Rid(100)).unwrap();
        checkout.materialize_to_disk(&store).unwrap();

        checkout.uncheckout(&[]).unwrap();
        assert!(!dir.path().join("a.txt").exists());
        assert!(checkout.tracked_files().unwrap().is_empty());
    }

    #[test]
    fn uncheckout_removes_directories_left_empty() {
        let (db, dir, store) = setup();
        seed_one_file(&db, &store, "sub/a.txt", b"hello world");
        let index = CrosslinkIndex::open(&db).unwrap();
        let checkout = Checkout::open(&db, dir.path()).unwrap();
        checkout.load_from_checkin(&store, &index, Rid(100)).unwrap();
        checkout.materialize_to_disk(&store).unwrap();
        assert!(dir.path().join("sub").is_dir());

        checkout.uncheckout(&[]).unwrap();
        assert!(!dir.path().join("sub").exists());
    }

    #[test]
    fn uncheckout_keeps_directories_named_in_empty_dirs() {
        let (db, dir, store) = setup();
        seed_one_file(&db, &store, "sub/a.txt", b"hello world");
        let index = CrosslinkIndex::open(&db).unwrap();
        let checkout = Checkout::open(&db, dir.path()).unwrap();
        checkout.load_from_checkin(&store, &index, Rid(100)).unwrap();
        checkout.materialize_to_disk(&store).unwrap();

        checkout.uncheckout(&["sub".to_string()]).unwrap();
        assert!(dir.path().join("sub").is_dir());
    }
}
