//! Composer: orchestrates download and build
//!
//! Wires the manifest, the credential broker, the download manager and the
//! builder together for one composition run. The build directory is wiped on
//! every run; the packages cache only when a clean run is requested. An
//! interrupt cancels the ambient token and runs the same build-dir cleanup as
//! normal teardown.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::builder::Builder;
use crate::cancel::CancelToken;
use crate::credentials::{CredentialBroker, CredentialStore};
use crate::download::DownloadManager;
use crate::error::Result;
use crate::manifest::Manifest;

/// Internal compose area under the platform directory.
pub const MAIN_DIR: &str = ".compose";
/// Composition output, rebuilt from scratch on every run.
pub const BUILD_DIR: &str = ".compose/build";
/// Default packages cache.
pub const DEFAULT_WORKING_DIR: &str = ".compose/packages";

/// Options consumed by a composition run.
#[derive(Debug, Clone)]
pub struct ComposerOptions {
    /// Also wipe the packages cache at start.
    pub clean: bool,
    /// Packages cache path, relative to the platform directory.
    pub working_dir: String,
    /// Exclude files not tracked by the platform's git repository.
    pub skip_not_versioned: bool,
    /// Emit one line per resolved file-level conflict.
    pub conflicts_verbosity: bool,
    /// Permit TTY prompts for credentials.
    pub interactive: bool,
}

impl Default for ComposerOptions {
    fn default() -> Self {
        Self {
            clean: false,
            working_dir: DEFAULT_WORKING_DIR.to_string(),
            skip_not_versioned: false,
            conflicts_verbosity: false,
            interactive: false,
        }
    }
}

/// One composition run over a platform directory.
pub struct Composer {
    pwd: PathBuf,
    options: ComposerOptions,
    manifest: Manifest,
}

impl Composer {
    /// Load the manifest at `pwd` and prepare a run with the given options.
    pub fn new(pwd: PathBuf, options: ComposerOptions) -> Result<Self> {
        let manifest = Manifest::lookup(&pwd)?;
        Ok(Self {
            pwd,
            options,
            manifest,
        })
    }

    /// Download all packages and build the composition.
    pub fn run_install(&self, store: Box<dyn CredentialStore>) -> Result<()> {
        let token = CancelToken::new();

        {
            let token = token.clone();
            let build_path = self.path(BUILD_DIR);
            let result = ctrlc::set_handler(move || {
                eprintln!("\nTermination signal received. Cleaning up...");
                if let Err(e) = fs::remove_dir_all(&build_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        eprintln!("couldn't clean build dir: {e}");
                    }
                }
                token.cancel();
            });
            if let Err(e) = result {
                // A handler from an earlier run in this process stays in
                // charge; the token check below still applies.
                debug!("signal handler already installed: {e}");
            }
        }

        let (build_path, packages_path) = self.prepare_install(self.options.clean)?;

        let broker = CredentialBroker::new(store, self.options.interactive);
        let mut manager = DownloadManager::new(broker);
        let packages = manager.download(&self.manifest, &packages_path, &token)?;

        let builder = Builder::new(
            self.pwd.clone(),
            build_path,
            packages_path,
            self.options.skip_not_versioned,
            self.options.conflicts_verbosity,
            packages,
        );
        builder.build(&token)
    }

    /// Wipe the build directory, and the packages cache when `clean` is set.
    fn prepare_install(&self, clean: bool) -> Result<(PathBuf, PathBuf)> {
        let build_path = self.path(BUILD_DIR);
        let packages_path = self.path(&self.options.working_dir);

        info!("Cleaning build dir: {BUILD_DIR}");
        remove_dir_if_exists(&build_path)?;

        if clean {
            info!("Cleaning packages dir: {}", packages_path.display());
            remove_dir_if_exists(&packages_path)?;
        }

        Ok((build_path, packages_path))
    }

    fn path(&self, value: &str) -> PathBuf {
        self.pwd.join(value)
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
