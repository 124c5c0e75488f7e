//! Credential store access and the interactive auth ladder
//!
//! The passphrase-protected store itself lives outside this crate; it is
//! consumed through the `CredentialStore` trait (`get_for_url` / `add_item` /
//! `save` plus the not-found / empty-passphrase sentinels). `CredentialBroker`
//! wraps a store handle and mediates the ladder the downloaders climb:
//! anonymous first, then stored credentials, then a TTY prompt when
//! interactive mode permits it. Newly prompted credentials are added to the
//! store and persisted once at the end of a successful download phase.

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A username/password pair bound to a URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Contract consumed from the external credential store.
pub trait CredentialStore {
    /// Look up credentials for a URL. Returns the `CredentialsNotFound`
    /// sentinel when no item matches and `EmptyPassphrase` when the store is
    /// locked.
    fn get_for_url(&self, url: &str) -> Result<Credential>;

    /// Add or replace an item. The change is not durable until `save`.
    fn add_item(&mut self, credential: Credential) -> Result<()>;

    /// Persist pending changes.
    fn save(&mut self) -> Result<()>;
}

/// Wraps a credential store and owns the run-wide auth state: whether
/// prompting a human is allowed, and whether anything new was added that
/// warrants a save at the end of the run.
pub struct CredentialBroker {
    store: Box<dyn CredentialStore>,
    interactive: bool,
    should_update: bool,
}

impl CredentialBroker {
    pub fn new(store: Box<dyn CredentialStore>, interactive: bool) -> Self {
        Self {
            store,
            interactive,
            should_update: false,
        }
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn should_update(&self) -> bool {
        self.should_update
    }

    /// Fetch credentials for a URL, falling back to an interactive prompt
    /// when the store has no item and prompting is permitted.
    pub fn get_for_url(&mut self, url: &str) -> Result<Credential> {
        match self.store.get_for_url(url) {
            Ok(credential) => Ok(credential),
            // The store itself is locked; surface unchanged.
            Err(Error::EmptyPassphrase) => Err(Error::EmptyPassphrase),
            Err(Error::CredentialsNotFound { .. }) if !self.interactive => {
                Err(Error::CredentialsNotFound {
                    url: url.to_string(),
                })
            }
            Err(Error::CredentialsNotFound { .. }) => {
                let credential = self.fill_credentials(url)?;
                self.store.add_item(credential.clone())?;
                self.should_update = true;
                Ok(credential)
            }
            Err(other) => {
                debug!("{other}");
                Err(Error::StoreMalformed)
            }
        }
    }

    /// Unconditionally prompt for a username and password for the URL.
    pub fn fill_credentials(&self, url: &str) -> Result<Credential> {
        if !url.is_empty() {
            eprintln!("Please add login and password for URL - {url}");
        }
        let username: String = dialoguer::Input::new()
            .with_prompt("Username")
            .interact_text()
            .map_err(|e| Error::Credentials {
                message: e.to_string(),
            })?;
        let password = dialoguer::Password::new()
            .with_prompt("Password")
            .interact()
            .map_err(|e| Error::Credentials {
                message: e.to_string(),
            })?;

        Ok(Credential {
            url: url.to_string(),
            username,
            password,
        })
    }

    /// Persist the store. Called once by the download manager when
    /// `should_update` is set.
    pub fn save(&mut self) -> Result<()> {
        self.store.save()
    }
}

/// Plain YAML-file credential store used by the command line binary.
///
/// This is deliberately minimal: items live in a single YAML list on disk.
/// Deployments with a passphrase-protected keyring plug their own
/// `CredentialStore` implementation into the composer instead.
pub struct FileStore {
    path: PathBuf,
    items: Vec<Credential>,
}

impl FileStore {
    /// Open the store at `path`, loading existing items if the file exists.
    pub fn open(path: &Path) -> Result<Self> {
        let items = match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_yaml::from_str(&raw).map_err(|e| Error::Credentials {
                message: format!("malformed credentials file {}: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            items,
        })
    }
}

impl CredentialStore for FileStore {
    fn get_for_url(&self, url: &str) -> Result<Credential> {
        self.items
            .iter()
            .find(|item| item.url == url)
            .cloned()
            .ok_or_else(|| Error::CredentialsNotFound {
                url: url.to_string(),
            })
    }

    fn add_item(&mut self, credential: Credential) -> Result<()> {
        if let Some(existing) = self.items.iter_mut().find(|i| i.url == credential.url) {
            *existing = credential;
        } else {
            self.items.push(credential);
        }
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_yaml::to_string(&self.items)?;
        std::fs::write(&self.path, raw)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}
