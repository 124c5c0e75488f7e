//! Builder: strategy-driven filesystem merge
//!
//! The builder overlays the platform tree with every resolved package, in
//! dependency order, and materializes the result in the build directory.
//!
//! ## Process
//!
//! 1.  **Platform walk**: every platform path becomes an `FsEntry` keyed by
//!     its relative path, except the `.compose` area, the manifest file,
//!     paths removed by `remove-extra-local-files` strategies, and (when
//!     requested) files not versioned in the platform's git repository.
//!
//! 2.  **Package walks**: packages are visited in topological order so
//!     dependencies land before their dependents. Each path runs through the
//!     package's strategy list; without a match the default merge applies:
//!     first writer wins, conflicts resolve to the existing entry.
//!
//! 3.  **Materialization**: entries are written to the build directory in
//!     discovery order: directories, symlinks, then streamed file copies,
//!     with modes carried over from the source.
//!
//! The entry list and the map over relative paths always hold the same set;
//! the list defines iteration order, the map provides conflict lookup.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::composer::MAIN_DIR;
use crate::error::{Error, Result};
use crate::git;
use crate::graph::{DependencyGraph, DEPENDENCY_ROOT};
use crate::manifest::{
    COMPOSE_FILE, STRATEGY_FILTER_PACKAGE, STRATEGY_IGNORE_EXTRA_PACKAGE,
    STRATEGY_OVERWRITE_LOCAL, STRATEGY_REMOVE_EXTRA_LOCAL,
};
use crate::package::Package;

/// Origin label for entries sourced from the platform tree.
const PLATFORM_FROM: &str = "domain repo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyKind {
    OverwriteLocal,
    RemoveExtraLocal,
    IgnoreExtraPackage,
    FilterPackage,
}

/// Whether a strategy filters the platform walk or a package walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyTarget {
    Local,
    Package,
}

#[derive(Debug, Clone)]
struct MergeStrategy {
    kind: StrategyKind,
    paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictResolve {
    None,
    ToLocal,
    ToPackage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// One merge record: where the path comes from and what to write.
#[derive(Debug, Clone)]
pub struct FsEntry {
    /// Absolute directory the entry was sourced from.
    pub prefix: PathBuf,
    /// Path relative to the prefix, `/`-separated.
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    /// Platform label or package name.
    pub from: String,
}

fn identify_strategy(name: &str) -> Option<(StrategyKind, StrategyTarget)> {
    match name {
        STRATEGY_OVERWRITE_LOCAL => Some((StrategyKind::OverwriteLocal, StrategyTarget::Package)),
        STRATEGY_REMOVE_EXTRA_LOCAL => {
            Some((StrategyKind::RemoveExtraLocal, StrategyTarget::Local))
        }
        STRATEGY_IGNORE_EXTRA_PACKAGE => {
            Some((StrategyKind::IgnoreExtraPackage, StrategyTarget::Package))
        }
        STRATEGY_FILTER_PACKAGE => Some((StrategyKind::FilterPackage, StrategyTarget::Package)),
        _ => None,
    }
}

/// Normalize strategy paths: lexical clean, then exactly one trailing
/// separator so prefix comparison is non-greedy. A bare `.` selects the
/// whole tree.
fn clean_strategy_paths(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .map(|p| {
            let cleaned = clean_path(p);
            if cleaned == "." {
                String::new()
            } else {
                format!("{cleaned}/")
            }
        })
        .collect()
}

fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn ensure_prefix_path(path: &str, strategy_paths: &[String]) -> bool {
    strategy_paths.iter().any(|sp| path.starts_with(sp.as_str()))
}

/// Whether any strategy path lies under `path`, i.e. this directory is an
/// ancestor of an included file.
fn ensure_contains_path(path: &str, strategy_paths: &[String]) -> bool {
    strategy_paths.iter().any(|sp| sp.contains(path))
}

/// Split each package's strategies into the merged local-targeting list and
/// a per-package map of package-targeting strategies.
fn retrieve_strategies(
    packages: &[Package],
) -> (Vec<MergeStrategy>, HashMap<String, Vec<MergeStrategy>>) {
    let mut local = Vec::new();
    let mut per_package = HashMap::new();

    for pkg in packages {
        let mut strategies = Vec::new();
        for item in pkg.strategies() {
            let Some((kind, target)) = identify_strategy(&item.name) else {
                continue;
            };
            let strategy = MergeStrategy {
                kind,
                paths: clean_strategy_paths(&item.paths),
            };
            match target {
                StrategyTarget::Local => local.push(strategy),
                StrategyTarget::Package => strategies.push(strategy),
            }
        }
        per_package.insert(pkg.name.clone(), strategies);
    }

    (local, per_package)
}

/// Merges the platform and package trees into the build directory.
pub struct Builder {
    platform_dir: PathBuf,
    target_dir: PathBuf,
    source_dir: PathBuf,
    skip_not_versioned: bool,
    log_conflicts: bool,
    packages: Vec<Package>,
}

impl Builder {
    pub fn new(
        platform_dir: PathBuf,
        target_dir: PathBuf,
        source_dir: PathBuf,
        skip_not_versioned: bool,
        log_conflicts: bool,
        packages: Vec<Package>,
    ) -> Self {
        Self {
            platform_dir,
            target_dir,
            source_dir,
            skip_not_versioned,
            log_conflicts,
            packages,
        }
    }

    pub fn build(&self, token: &CancelToken) -> Result<()> {
        info!("Creating composition...");
        fs::create_dir_all(&self.target_dir)?;

        // Versioned lookup failures silently degrade to "everything is
        // versioned" so a platform without git history still composes.
        let mut versioned = None;
        if self.skip_not_versioned {
            match git::versioned_paths(&self.platform_dir) {
                Ok(set) => versioned = Some(set),
                Err(e) => debug!("couldn't load versioned paths, keeping all files: {e}"),
            }
        }

        let (local_strategies, package_strategies) = retrieve_strategies(&self.packages);

        let mut tree: Vec<FsEntry> = Vec::new();
        let mut entries: HashMap<String, usize> = HashMap::new();
        self.walk_platform(
            &mut tree,
            &mut entries,
            &local_strategies,
            versioned.as_ref(),
            token,
        )?;

        let order = DependencyGraph::build(&self.packages).top_sort(DEPENDENCY_ROOT);
        let targets: HashMap<&str, &str> = self
            .packages
            .iter()
            .map(|p| (p.name.as_str(), p.target()))
            .collect();

        if self.log_conflicts {
            info!("Conflicting files:");
        }

        for pkg_name in &order {
            token.check()?;
            if pkg_name == DEPENDENCY_ROOT {
                continue;
            }
            let Some(target) = targets.get(pkg_name.as_str()) else {
                continue;
            };
            let pkg_path = self.source_dir.join(pkg_name).join(target);
            self.walk_package(
                pkg_name,
                &pkg_path,
                package_strategies.get(pkg_name.as_str()),
                &mut tree,
                &mut entries,
                token,
            )?;
        }

        self.materialize(&tree, token)
    }

    fn walk_platform(
        &self,
        tree: &mut Vec<FsEntry>,
        entries: &mut HashMap<String, usize>,
        local_strategies: &[MergeStrategy],
        versioned: Option<&std::collections::HashSet<String>>,
        token: &CancelToken,
    ) -> Result<()> {
        let walker = WalkDir::new(&self.platform_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            // The compose area itself never takes part in the merge.
            .filter_entry(|e| e.depth() != 1 || e.file_name() != MAIN_DIR);

        for entry in walker {
            token.check()?;
            let entry = entry.map_err(io::Error::from)?;
            if entry.depth() == 0 {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.platform_dir)
                .expect("walked path is under its root")
                .to_string_lossy()
                .into_owned();
            let metadata = entry.metadata().map_err(io::Error::from)?;
            let kind = entry_kind(&metadata);

            if kind != EntryKind::Dir && entry.file_name() == COMPOSE_FILE {
                continue;
            }

            // Strategies that target local files.
            if local_strategies
                .iter()
                .filter(|s| s.kind == StrategyKind::RemoveExtraLocal)
                .any(|s| ensure_prefix_path(&rel, &s.paths))
            {
                continue;
            }

            // The .git tree is carried along whether versioned checking is
            // on or not.
            if let Some(versioned) = versioned {
                if !is_git_path(&rel) && !versioned.contains(&rel) {
                    continue;
                }
            }

            let index = tree.len();
            tree.push(FsEntry {
                prefix: self.platform_dir.clone(),
                path: rel.clone(),
                kind,
                mode: entry_mode(&metadata),
                from: PLATFORM_FROM.to_string(),
            });
            entries.insert(rel, index);
        }

        Ok(())
    }

    fn walk_package(
        &self,
        pkg_name: &str,
        pkg_path: &Path,
        strategies: Option<&Vec<MergeStrategy>>,
        tree: &mut Vec<FsEntry>,
        entries: &mut HashMap<String, usize>,
        token: &CancelToken,
    ) -> Result<()> {
        let walker = WalkDir::new(pkg_path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            // Skip the package's own .git folder.
            .filter_entry(|e| e.depth() != 1 || e.file_name() != ".git");

        for entry in walker {
            token.check()?;
            let entry = entry.map_err(io::Error::from)?;
            if entry.depth() == 0 {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(pkg_path)
                .expect("walked path is under its root")
                .to_string_lossy()
                .into_owned();
            let metadata = entry.metadata().map_err(io::Error::from)?;
            let kind = entry_kind(&metadata);

            let fs_entry = FsEntry {
                prefix: pkg_path.to_path_buf(),
                path: rel.clone(),
                kind,
                mode: entry_mode(&metadata),
                from: pkg_name.to_string(),
            };

            let resolve = match strategies {
                // No strategies for this package: default merge.
                None => add_entry(tree, entries, fs_entry),
                Some(strategies) => add_strategy_entries(strategies, tree, entries, fs_entry),
            };

            if self.log_conflicts && kind != EntryKind::Dir && resolve != ConflictResolve::None {
                if let Some(&index) = entries.get(&rel) {
                    info!("[{pkg_name}] - {rel} > Selected from {}", tree[index].from);
                }
            }
        }

        Ok(())
    }

    fn materialize(&self, tree: &[FsEntry], token: &CancelToken) -> Result<()> {
        for item in tree {
            token.check()?;
            let source = item.prefix.join(&item.path);
            let dest = self.target_dir.join(&item.path);

            match item.kind {
                EntryKind::Dir => {
                    create_dir(&dest)?;
                    set_mode(&dest, 0o755)?;
                }
                EntryKind::Symlink => {
                    // Modes are meaningless on the link itself.
                    copy_symlink(&source, &dest)?;
                }
                EntryKind::File => {
                    copy_file(&source, &dest)?;
                    set_mode(&dest, item.mode)?;
                }
            }
        }

        Ok(())
    }
}

/// Default merge: first writer wins, a second writer records a conflict
/// resolved to the existing (local or earlier) entry.
fn add_entry(
    tree: &mut Vec<FsEntry>,
    entries: &mut HashMap<String, usize>,
    entry: FsEntry,
) -> ConflictResolve {
    if entries.contains_key(&entry.path) {
        return ConflictResolve::ToLocal;
    }
    let index = tree.len();
    entries.insert(entry.path.clone(), index);
    tree.push(entry);
    ConflictResolve::None
}

/// Run a package path through its strategy list. The first strategy whose
/// guard matches settles the path; an exhausted list falls back to the
/// default merge.
fn add_strategy_entries(
    strategies: &[MergeStrategy],
    tree: &mut Vec<FsEntry>,
    entries: &mut HashMap<String, usize>,
    entry: FsEntry,
) -> ConflictResolve {
    for strategy in strategies {
        match strategy.kind {
            StrategyKind::OverwriteLocal => {
                if !ensure_prefix_path(&entry.path, &strategy.paths) {
                    continue;
                }
                if let Some(&index) = entries.get(&entry.path) {
                    // Resolve the conflict to the package in place; the
                    // entry keeps its position in the iteration order.
                    let existing = &mut tree[index];
                    existing.prefix = entry.prefix;
                    existing.kind = entry.kind;
                    existing.mode = entry.mode;
                    existing.from = entry.from;
                    return ConflictResolve::ToPackage;
                }
                let index = tree.len();
                entries.insert(entry.path.clone(), index);
                tree.push(entry);
                return ConflictResolve::None;
            }
            StrategyKind::FilterPackage => {
                if !entries.contains_key(&entry.path)
                    && (ensure_prefix_path(&entry.path, &strategy.paths)
                        || (entry.kind == EntryKind::Dir
                            && ensure_contains_path(&entry.path, &strategy.paths)))
                {
                    let index = tree.len();
                    entries.insert(entry.path.clone(), index);
                    tree.push(entry);
                }
                return ConflictResolve::None;
            }
            StrategyKind::IgnoreExtraPackage => {
                if !ensure_prefix_path(&entry.path, &strategy.paths) {
                    continue;
                }
                // Matched: drop the path.
                return ConflictResolve::None;
            }
            // Local-targeting, never present in a package list.
            StrategyKind::RemoveExtraLocal => continue,
        }
    }

    add_entry(tree, entries, entry)
}

fn is_git_path(rel: &str) -> bool {
    rel == ".git" || rel.starts_with(".git/")
}

fn entry_kind(metadata: &fs::Metadata) -> EntryKind {
    if metadata.file_type().is_symlink() {
        EntryKind::Symlink
    } else if metadata.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

#[cfg(unix)]
fn entry_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn entry_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn create_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| Error::CreateDir {
        path: dir.display().to_string(),
        message: e.to_string(),
    })
}

/// Recreate a symlink at the destination. A vanished source is skipped
/// silently.
fn copy_symlink(source: &Path, dest: &Path) -> Result<()> {
    let link = match fs::read_link(source) {
        Ok(link) => link,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    #[cfg(unix)]
    std::os::unix::fs::symlink(link, dest)?;
    #[cfg(not(unix))]
    let _ = link;
    Ok(())
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let metadata = fs::metadata(source)?;
    if !metadata.is_file() {
        return Err(Error::NotRegularFile {
            path: source.display().to_string(),
        });
    }

    let mut reader = fs::File::open(source)?;
    let mut writer = fs::File::create(dest)?;
    io::copy(&mut reader, &mut writer)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
