//! Library reconciler - the only writer of the local library.
//!
//! Each game ID owns one directory under `packages/` and one row in the
//! index. Placement builds the new directory next to the old one and swaps
//! it in with renames, so a failure leaves the previous install untouched.

pub mod db;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use depot_schema::version::is_newer;
use depot_schema::{FreshnessPolicy, GameId, RepoKey, VersionMarker};
use tracing::{info, warn};

use crate::assemble::{AssembledPackage, FileSource};
use crate::error::EngineError;
use crate::paths::{db_path, package_dir, packages_path};
use db::{DbError, LibraryEntry, StateDb};

/// Result of reconciling one package against the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Installed,
    Upgraded { previous: VersionMarker },
    Skipped { installed: VersionMarker },
    Rejected { reason: String },
}

/// Serialises writes to the library per game ID.
pub struct LibraryReconciler {
    root: PathBuf,
    db: Mutex<StateDb>,
    locks: Mutex<HashMap<GameId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for LibraryReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryReconciler")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl LibraryReconciler {
    /// Open (or create) a library rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        fs::create_dir_all(packages_path(root))?;
        let db = StateDb::open_at(&db_path(root))?;
        Ok(Self {
            root: root.to_path_buf(),
            db: Mutex::new(db),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding an installed package.
    pub fn package_dir(&self, game_id: GameId) -> PathBuf {
        package_dir(&self.root, game_id)
    }

    fn lock_for(&self, game_id: GameId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(game_id).or_default())
    }

    /// Drop a per-ID lock once nobody else holds or waits on it.
    fn release_lock(&self, game_id: GameId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks
            .get(&game_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&game_id);
        }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, StateDb> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All installed entries, ordered by game ID.
    pub fn entries(&self) -> Result<Vec<LibraryEntry>, EngineError> {
        Ok(self.db().entries()?)
    }

    pub fn entry(&self, game_id: GameId) -> Result<Option<LibraryEntry>, EngineError> {
        Ok(self.db().entry(game_id)?)
    }

    /// Delete an installed package and its index row.
    pub async fn remove(&self, game_id: GameId) -> Result<Vec<String>, EngineError> {
        let lock = self.lock_for(game_id);
        let result = {
            let _guard = lock.lock().await;
            self.remove_locked(game_id)
        };
        self.release_lock(game_id, lock);
        result
    }

    fn remove_locked(&self, game_id: GameId) -> Result<Vec<String>, EngineError> {
        let files = self.db().remove(game_id)?;
        match fs::remove_dir_all(self.package_dir(game_id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        info!(game_id = %game_id, "removed");
        Ok(files)
    }

    /// Existing entry, ignoring one whose files were deleted behind our back.
    fn intact_entry(&self, game_id: GameId) -> Result<Option<LibraryEntry>, EngineError> {
        let Some(entry) = self.db().entry(game_id)? else {
            return Ok(None);
        };
        let dir = self.package_dir(game_id);
        if entry.files.iter().all(|f| dir.join(f).is_file()) {
            Ok(Some(entry))
        } else {
            warn!(game_id = %game_id, "library entry has missing files, treating as absent");
            Ok(None)
        }
    }

    /// Merge an assembled package into the library.
    ///
    /// Installs when nothing is recorded for the game, upgrades when the
    /// incoming version is newer under `policy`, and skips otherwise.
    pub async fn reconcile(
        &self,
        game_id: GameId,
        package: &AssembledPackage<'_>,
        repository: &RepoKey,
        version: &VersionMarker,
        policy: FreshnessPolicy,
    ) -> Result<ReconcileOutcome, EngineError> {
        let lock = self.lock_for(game_id);
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_locked(game_id, package, repository, version, policy)
        };
        self.release_lock(game_id, lock);
        result
    }

    fn reconcile_locked(
        &self,
        game_id: GameId,
        package: &AssembledPackage<'_>,
        repository: &RepoKey,
        version: &VersionMarker,
        policy: FreshnessPolicy,
    ) -> Result<ReconcileOutcome, EngineError> {
        let existing = self.intact_entry(game_id)?;
        if let Some(current) = &existing
            && !is_newer(policy, &current.version, version)
        {
            info!(game_id = %game_id, version = %current.version, "already installed");
            return Ok(ReconcileOutcome::Skipped {
                installed: current.version.clone(),
            });
        }

        let mut files: Vec<String> = package.files.iter().map(|f| f.path.clone()).collect();
        files.sort();
        let entry = LibraryEntry {
            game_id,
            version: version.clone(),
            repository: repository.clone(),
            installed_at: Utc::now(),
            files,
        };

        if let Err(reason) = self.place(package, &entry) {
            warn!(game_id = %game_id, "placement rejected: {reason}");
            return Ok(ReconcileOutcome::Rejected { reason });
        }

        Ok(match existing {
            Some(previous) => {
                info!(game_id = %game_id, from = %previous.version, to = %version, "upgraded");
                ReconcileOutcome::Upgraded {
                    previous: previous.version,
                }
            }
            None => {
                info!(game_id = %game_id, version = %version, "installed");
                ReconcileOutcome::Installed
            }
        })
    }

    /// Build the package next to its final location, swap it in, then commit.
    fn place(&self, package: &AssembledPackage<'_>, entry: &LibraryEntry) -> Result<(), String> {
        let packages = packages_path(&self.root);
        let incoming = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempdir_in(&packages)
            .map_err(|e| format!("creating staging directory: {e}"))?;

        for file in &package.files {
            write_file(incoming.path(), &file.path, &file.source)
                .map_err(|e| format!("writing {}: {e}", file.path))?;
        }

        let target = self.package_dir(entry.game_id);
        let backup = packages.join(format!(".previous-{}", entry.game_id));
        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(|e| format!("clearing old backup: {e}"))?;
        }
        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &backup).map_err(|e| format!("moving previous install aside: {e}"))?;
        }

        let committed = fs::rename(incoming.path(), &target)
            .map_err(|e| format!("moving package into place: {e}"))
            .and_then(|()| self.db().record(entry).map_err(|e| e.to_string()));

        if let Err(reason) = committed {
            let problems = self.roll_back(entry.game_id, &target, &backup, had_previous);
            if problems.is_empty() {
                return Err(reason);
            }
            return Err(format!("{reason}; rollback: {}", problems.join("; ")));
        }

        if had_previous && let Err(e) = fs::remove_dir_all(&backup) {
            warn!(game_id = %entry.game_id, "leaving old backup at {}: {e}", backup.display());
        }
        Ok(())
    }

    /// Undo a failed swap, returning whatever could not be undone.
    ///
    /// If no package directory is left afterwards, the index row goes too.
    fn roll_back(&self, game_id: GameId, target: &Path, backup: &Path, had_previous: bool) -> Vec<String> {
        let mut problems = Vec::new();
        if target.exists()
            && let Err(e) = fs::remove_dir_all(target)
        {
            problems.push(format!("removing new files: {e}"));
        }
        if had_previous && let Err(e) = fs::rename(backup, target) {
            problems.push(format!("restoring previous install: {e}"));
        }
        if !target.exists() {
            match self.db().remove(game_id) {
                Ok(_) | Err(DbError::EntryNotFound(_)) => {}
                Err(e) => problems.push(format!("dropping index row: {e}")),
            }
        }
        for problem in &problems {
            warn!(game_id = %game_id, "rollback: {problem}");
        }
        problems
    }
}

fn write_file(root: &Path, relative: &str, source: &FileSource) -> io::Result<()> {
    let dest = root.join(relative);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match source {
        FileSource::Staged(from) => fs::copy(from, &dest).map(|_| ()),
        FileSource::Generated(text) => fs::write(&dest, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::StagedPackage;
    use crate::assemble::PackageFile;
    use depot_schema::TargetAgent;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn package<'a>(staged: &'a StagedPackage, script: &str) -> AssembledPackage<'a> {
        AssembledPackage {
            game_id: GameId::new(730),
            agent: TargetAgent::SteamTools,
            files: vec![PackageFile {
                path: "730.lua".into(),
                source: FileSource::Generated(script.into()),
            }],
            depots: BTreeMap::new(),
            staged,
        }
    }

    fn repo() -> RepoKey {
        RepoKey::new("swa").unwrap()
    }

    async fn reconcile(
        lib: &LibraryReconciler,
        pkg: &AssembledPackage<'_>,
        version: &str,
    ) -> ReconcileOutcome {
        lib.reconcile(
            GameId::new(730),
            pkg,
            &repo(),
            &VersionMarker::new(version),
            FreshnessPolicy::Floating,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn install_then_skip() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        let pkg = package(&staged, "v5");

        assert_eq!(reconcile(&lib, &pkg, "5").await, ReconcileOutcome::Installed);
        assert_eq!(
            reconcile(&lib, &pkg, "5").await,
            ReconcileOutcome::Skipped {
                installed: VersionMarker::new("5")
            }
        );
        assert_eq!(lib.entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn newer_version_upgrades_older_is_skipped() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));

        reconcile(&lib, &package(&staged, "v5"), "5").await;
        assert_eq!(
            reconcile(&lib, &package(&staged, "v10"), "10").await,
            ReconcileOutcome::Upgraded {
                previous: VersionMarker::new("5")
            }
        );
        assert_eq!(
            fs::read_to_string(lib.package_dir(GameId::new(730)).join("730.lua")).unwrap(),
            "v10"
        );
        assert!(matches!(
            reconcile(&lib, &package(&staged, "v9"), "9").await,
            ReconcileOutcome::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn failed_placement_keeps_previous_install() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        reconcile(&lib, &package(&staged, "v5"), "5").await;

        let mut broken = package(&staged, "v6");
        broken.files.push(PackageFile {
            path: "depotcache/731_1.manifest".into(),
            source: FileSource::Staged(dir.path().join("does-not-exist")),
        });
        let outcome = reconcile(&lib, &broken, "6").await;
        assert!(matches!(outcome, ReconcileOutcome::Rejected { .. }));

        let entry = lib.entry(GameId::new(730)).unwrap().unwrap();
        assert_eq!(entry.version.as_str(), "5");
        let pkg_dir = lib.package_dir(GameId::new(730));
        assert_eq!(fs::read_to_string(pkg_dir.join("730.lua")).unwrap(), "v5");
        assert!(!pkg_dir.join("depotcache").exists());
        let leftovers: Vec<_> = fs::read_dir(packages_path(dir.path()))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn tampered_entry_is_reinstalled() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        let pkg = package(&staged, "v5");

        reconcile(&lib, &pkg, "5").await;
        fs::remove_file(lib.package_dir(GameId::new(730)).join("730.lua")).unwrap();
        assert_eq!(reconcile(&lib, &pkg, "5").await, ReconcileOutcome::Installed);
    }

    #[tokio::test]
    async fn removal_is_tolerated() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        let pkg = package(&staged, "v5");

        reconcile(&lib, &pkg, "5").await;
        assert_eq!(lib.remove(GameId::new(730)).await.unwrap(), vec!["730.lua"]);
        assert!(!lib.package_dir(GameId::new(730)).exists());
        assert_eq!(reconcile(&lib, &pkg, "5").await, ReconcileOutcome::Installed);
    }

    #[tokio::test]
    async fn concurrent_reconciles_for_one_id_never_duplicate() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        let pkg = package(&staged, "v5");

        let (a, b) = tokio::join!(reconcile(&lib, &pkg, "5"), reconcile(&lib, &pkg, "5"));
        let installed = [&a, &b]
            .iter()
            .filter(|o| ***o == ReconcileOutcome::Installed)
            .count();
        assert_eq!(installed, 1);
        assert_eq!(lib.entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_restore_drops_the_stale_row() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        reconcile(&lib, &package(&staged, "v5"), "5").await;

        // The previous install was moved aside and then lost.
        let target = lib.package_dir(GameId::new(730));
        let backup = packages_path(dir.path()).join(".previous-730");
        fs::rename(&target, &backup).unwrap();
        fs::remove_dir_all(&backup).unwrap();

        let problems = lib.roll_back(GameId::new(730), &target, &backup, true);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("restoring previous install"));
        assert!(lib.entry(GameId::new(730)).unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_rollback_reports_nothing_and_keeps_row() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        reconcile(&lib, &package(&staged, "v5"), "5").await;

        let target = lib.package_dir(GameId::new(730));
        let backup = packages_path(dir.path()).join(".previous-730");
        fs::rename(&target, &backup).unwrap();
        fs::create_dir_all(&target).unwrap();

        assert!(lib.roll_back(GameId::new(730), &target, &backup, true).is_empty());
        assert_eq!(fs::read_to_string(target.join("730.lua")).unwrap(), "v5");
        assert!(lib.entry(GameId::new(730)).unwrap().is_some());
    }

    #[tokio::test]
    async fn per_id_locks_are_released() {
        let dir = tempdir().unwrap();
        let lib = LibraryReconciler::open(dir.path()).unwrap();
        let staged = StagedPackage::empty(GameId::new(730));
        let pkg = package(&staged, "v5");

        let _ = tokio::join!(reconcile(&lib, &pkg, "5"), reconcile(&lib, &pkg, "5"));
        lib.remove(GameId::new(730)).await.unwrap();
        assert!(lib.locks.lock().unwrap().is_empty());
    }
}
