//! Error handling types for the plasma-compose application

use thiserror::Error;

/// Main error type for compose operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("plasma-compose.yaml doesn't exist at {path}")]
    ManifestNotFound { path: String },

    #[error("incorrect mapping for plasma-compose.yaml, ensure structure is correct: {message}")]
    ManifestMalformed { message: String },

    #[error("duplicate dependency name in manifest: {name}")]
    DuplicateDependency { name: String },

    #[error("duplicate dependency url in manifest: {url}")]
    DuplicateUrl { url: String },

    #[error("submitted strategy {name} doesn't exist")]
    UnknownStrategy { name: String },

    #[error("invalid package url for {package}")]
    NoUrl { package: String },

    #[error("authentication required for {url}")]
    AuthenticationRequired { url: String },

    #[error("authorization failed for {url}")]
    AuthorizationFailed { url: String },

    #[error("repository not found: {url}")]
    RepositoryNotFound { url: String },

    #[error("unhandled http status {status} for {url}")]
    HttpUnknown { url: String, status: u16 },

    #[error("couldn't find remote ref \"{reference}\" at {url}")]
    RefNotFound { url: String, reference: String },

    #[error("git {command} failed for {url}: {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    #[error("not supported archive type: {name}")]
    UnsupportedArchive { name: String },

    #[error("content filepath is tainted: {path}")]
    InvalidArchivePath { path: String },

    #[error("failed to ensure HEAD of {path}")]
    EnsureHead { path: String },

    /// Sentinel returned by a credential store when no item matches a URL.
    #[error("credentials not found for {url}")]
    CredentialsNotFound { url: String },

    /// Sentinel returned by a credential store locked behind an empty passphrase.
    #[error("empty credentials store passphrase")]
    EmptyPassphrase,

    #[error("the credentials store is malformed or wrong passphrase provided")]
    StoreMalformed,

    #[error("credentials error: {message}")]
    Credentials { message: String },

    #[error("composition cancelled")]
    Cancelled,

    #[error("{path} is not a regular file")]
    NotRegularFile { path: String },

    #[error("failed to create directory: '{path}', error: '{message}'")]
    CreateDir { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Result type alias for compose operations
pub type Result<T> = std::result::Result<T, Error>;
