//! Http downloader
//!
//! Fetches an archive over HTTP(S), extracts it next to the package checkout
//! and renames the archive's root directory to the package target. Archives
//! are treated as immutable by URL: an existing checkout directory is always
//! considered up to date.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;

use crate::archive;
use crate::cancel::CancelToken;
use crate::credentials::CredentialBroker;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::package::Package;

/// Last path segment of a URL, used as the archive filename.
fn name_from_url(url: &str) -> &str {
    static RGX: OnceLock<Regex> = OnceLock::new();
    let rgx = RGX.get_or_init(|| Regex::new(r"[^/]+(/$|$)").expect("static regex"));
    rgx.find(url).map(|m| m.as_str()).unwrap_or_default()
}

pub struct HttpDownloader;

impl HttpDownloader {
    pub fn new() -> Self {
        HttpDownloader
    }

    /// Perform one GET and map the status code onto the transport error
    /// taxonomy the auth ladder drives on.
    fn do_request(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let response = request.send()?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::UNAUTHORIZED => Err(Error::AuthenticationRequired {
                url: url.to_string(),
            }),
            StatusCode::FORBIDDEN => Err(Error::AuthorizationFailed {
                url: url.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(Error::RepositoryNotFound {
                url: url.to_string(),
            }),
            status => Err(Error::HttpUnknown {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// GET through the auth ladder: anonymous, stored credentials, manual.
    fn fetch(&self, client: &Client, url: &str, broker: &mut CredentialBroker) -> Result<Response> {
        debug!("auth none");
        match self.do_request(client.get(url), url) {
            Ok(response) => return Ok(response),
            Err(Error::AuthenticationRequired { .. }) => {
                info!("auth required, trying stored credentials");
            }
            Err(e) => return Err(e),
        }

        debug!("auth stored");
        let credential = broker.get_for_url(url)?;
        let request = client
            .get(url)
            .basic_auth(&credential.username, Some(&credential.password));
        match self.do_request(request, url) {
            Ok(response) => return Ok(response),
            Err(Error::AuthorizationFailed { .. }) if broker.interactive() => {
                info!("invalid auth, trying manual credentials");
            }
            Err(e) => return Err(e),
        }

        debug!("auth manual");
        let credential = broker.fill_credentials(url)?;
        let request = client
            .get(url)
            .basic_auth(&credential.username, Some(&credential.password));
        self.do_request(request, url)
    }
}

impl Downloader for HttpDownloader {
    /// Archives don't change under a fixed URL; an existing checkout is
    /// always current.
    fn ensure_latest(
        &self,
        _pkg: &Package,
        download_path: &Path,
        _broker: &mut CredentialBroker,
    ) -> Result<bool> {
        Ok(download_path.exists())
    }

    fn download(
        &self,
        pkg: &Package,
        target_dir: &Path,
        broker: &mut CredentialBroker,
        token: &CancelToken,
    ) -> Result<()> {
        let url = pkg.url();
        let name = name_from_url(url);
        if name.is_empty() {
            return Err(Error::NoUrl {
                package: pkg.name.clone(),
            });
        }
        token.check()?;

        info!("http download: {name}");
        fs::create_dir_all(target_dir)?;
        let archive_path = target_dir.join(name);

        let client = Client::new();
        let mut response = self.fetch(&client, url, broker)?;

        let mut out = fs::File::create(&archive_path)?;
        io::copy(&mut response, &mut out)?;
        drop(out);
        token.check()?;

        let root_dir = archive::extract(&archive_path, target_dir)?;
        if let Some(root_dir) = root_dir.filter(|r| !r.is_empty()) {
            // Rename the archive's root folder to the package target and
            // drop the archive itself.
            fs::rename(target_dir.join(&root_dir), target_dir.join(pkg.target()))?;
            fs::remove_file(&archive_path)?;
        }

        Ok(())
    }
}
