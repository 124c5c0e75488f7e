//! Download manager and downloader dispatch
//!
//! The manager walks a manifest's dependencies in declaration order, hands
//! each one to the downloader matching its source type, and recurses into any
//! manifest the downloaded package carries. Packages are accumulated
//! post-order so dependencies always precede their dependents in the
//! resolved list handed to the builder.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::cancel::CancelToken;
use crate::credentials::CredentialBroker;
use crate::error::{Error, Result};
use crate::git::GitDownloader;
use crate::http::HttpDownloader;
use crate::manifest::{Manifest, SourceType, COMPOSE_FILE};
use crate::package::Package;

/// A package transport: git checkout or downloadable archive.
pub trait Downloader {
    /// Check whether the existing checkout at `download_path` already
    /// satisfies the requested source; `false` triggers a re-fetch.
    fn ensure_latest(
        &self,
        pkg: &Package,
        download_path: &Path,
        broker: &mut CredentialBroker,
    ) -> Result<bool>;

    /// Fetch the package into `target_dir`.
    fn download(
        &self,
        pkg: &Package,
        target_dir: &Path,
        broker: &mut CredentialBroker,
        token: &CancelToken,
    ) -> Result<()>;
}

/// Pick the downloader for a source type. The only place the type tag is
/// dispatched on.
fn downloader_for(source_type: SourceType) -> Box<dyn Downloader> {
    match source_type {
        SourceType::Git => Box::new(GitDownloader::new()),
        SourceType::Http => Box::new(HttpDownloader::new()),
    }
}

/// Recursively resolves and fetches all packages reachable from a manifest.
pub struct DownloadManager {
    broker: CredentialBroker,
}

impl DownloadManager {
    pub fn new(broker: CredentialBroker) -> Self {
        Self { broker }
    }

    /// Download every package reachable from `manifest` into `working_dir`
    /// and return the resolved list, dependencies before dependents.
    ///
    /// Credentials added along the way are persisted once at the end of a
    /// successful run.
    pub fn download(
        &mut self,
        manifest: &Manifest,
        working_dir: &Path,
        token: &CancelToken,
    ) -> Result<Vec<Package>> {
        fs::create_dir_all(working_dir)?;

        let mut packages = Vec::new();
        let mut in_flight = HashSet::new();
        self.recursive_download(
            manifest,
            &mut packages,
            None,
            working_dir,
            &mut in_flight,
            token,
        )?;

        if self.broker.should_update() {
            self.broker.save()?;
        }

        Ok(packages)
    }

    fn recursive_download(
        &mut self,
        manifest: &Manifest,
        packages: &mut Vec<Package>,
        mut parent: Option<&mut Package>,
        working_dir: &Path,
        in_flight: &mut HashSet<(String, String)>,
        token: &CancelToken,
    ) -> Result<()> {
        for dep in &manifest.dependencies {
            token.check()?;

            let mut pkg = dep.to_package();
            if let Some(parent) = parent.as_deref_mut() {
                parent.add_dependency(&dep.name);
            }

            if pkg.url().is_empty() {
                return Err(Error::NoUrl {
                    package: pkg.name.clone(),
                });
            }

            // Nested manifests could reference each other; refuse to re-enter
            // a package that is still being resolved further up the stack.
            let key = (pkg.name.clone(), pkg.url().to_string());
            if !in_flight.insert(key.clone()) {
                warn!(
                    "dependency {} ({}) is already being resolved, skipping",
                    pkg.name,
                    pkg.url()
                );
                continue;
            }

            let package_path = working_dir.join(&pkg.name).join(pkg.target());
            self.download_package(&pkg, working_dir, token)?;

            // A downloaded package may carry its own manifest; absence or a
            // broken one is not an error here.
            if package_path.join(COMPOSE_FILE).exists() {
                if let Ok(nested) = Manifest::lookup(&package_path) {
                    self.recursive_download(
                        &nested,
                        packages,
                        Some(&mut pkg),
                        working_dir,
                        in_flight,
                        token,
                    )?;
                }
            }

            in_flight.remove(&key);
            packages.push(pkg);
        }

        Ok(())
    }

    fn download_package(
        &mut self,
        pkg: &Package,
        working_dir: &Path,
        token: &CancelToken,
    ) -> Result<()> {
        let downloader = downloader_for(pkg.source_type());
        let package_path = working_dir.join(&pkg.name);
        let mut download_path = package_path.join(pkg.target());

        if downloader.ensure_latest(pkg, &download_path, &mut self.broker)? {
            debug!("{} is up to date", pkg.name);
            return Ok(());
        }

        // Stale checkout must not survive into the fresh download.
        remove_dir_if_exists(&download_path)?;

        // Http archives extract through the package directory; the archive
        // root is renamed to the target afterwards.
        if pkg.source_type() == SourceType::Http {
            download_path = package_path;
        }

        if let Err(err) = downloader.download(pkg, &download_path, &mut self.broker, token) {
            if let Err(cleanup) = remove_dir_if_exists(&download_path) {
                debug!(
                    "error cleaning package folder {}: {cleanup}",
                    download_path.display()
                );
            }
            return Err(err);
        }

        Ok(())
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether a checkout directory should be treated as absent: no entries at
/// all, or nothing but a `.git` directory.
pub fn is_empty_checkout(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir)?;
    let Some(first) = entries.next() else {
        return Ok(true);
    };
    let first = first?;

    Ok(first.file_name() == ".git" && entries.next().is_none())
}
