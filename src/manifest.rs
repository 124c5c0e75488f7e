//! # Manifest Schema and Parsing
//!
//! This module defines the data structures that represent the
//! `plasma-compose.yaml` manifest file, as well as the logic for loading and
//! validating it.
//!
//! ## Key Components
//!
//! - **`Manifest`**: A named document holding an ordered list of dependencies.
//!
//! - **`Dependency`**: A unique name plus a `Source` describing where the
//!   package comes from.
//!
//! - **`Source`**: The transport (`git` or `http`), the URL, an optional
//!   revision (`ref`) and an optional list of merge strategies.
//!
//! ## Validation
//!
//! `Manifest::lookup` is the main entry point. Beyond YAML decoding it
//! enforces the structural rules the rest of the pipeline relies on:
//! dependency names and URLs are unique within a manifest, and strategy names
//! are recognized. The deprecated `tag` field is accepted and folded into
//! `ref`, emitting one warning per affected dependency.

use std::fmt;
use std::fs;
use std::path::Path;

use log::warn;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Manifest file name, fixed for compatibility.
pub const COMPOSE_FILE: &str = "plasma-compose.yaml";

/// Strategy name constants recognized in a manifest.
pub const STRATEGY_OVERWRITE_LOCAL: &str = "overwrite-local-file";
pub const STRATEGY_REMOVE_EXTRA_LOCAL: &str = "remove-extra-local-files";
pub const STRATEGY_IGNORE_EXTRA_PACKAGE: &str = "ignore-extra-package-files";
pub const STRATEGY_FILTER_PACKAGE: &str = "filter-package-files";

/// Transport used to fetch a package source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Git,
    Http,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Git => write!(f, "git"),
            SourceType::Http => write!(f, "http"),
        }
    }
}

// Accept any capitalization of "git"/"http", matching how the source type
// was historically compared after lowercasing.
impl<'de> Deserialize<'de> for SourceType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TypeVisitor;

        impl<'de> Visitor<'de> for TypeVisitor {
            type Value = SourceType;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("\"git\" or \"http\"")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<SourceType, E>
            where
                E: de::Error,
            {
                if value.eq_ignore_ascii_case("git") {
                    Ok(SourceType::Git)
                } else if value.eq_ignore_ascii_case("http") {
                    Ok(SourceType::Http)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(value), &self))
                }
            }
        }

        deserializer.deserialize_str(TypeVisitor)
    }
}

/// A merge strategy declaration attached to a dependency source.
///
/// `paths` are directory-prefix selectors; they are normalized by the builder
/// so that prefix comparison is non-greedy (`a/b/` does not match `a/bc`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// One of the four recognized strategy names.
    pub name: String,
    /// Directory prefixes the strategy applies to.
    #[serde(default, rename = "path")]
    pub paths: Vec<String>,
}

/// Package source definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    /// Transport type, defaults to git.
    #[serde(default, rename = "type")]
    pub source_type: SourceType,
    /// Transport URL.
    #[serde(default)]
    pub url: String,
    /// Revision identifier (branch or tag for git).
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Deprecated alias for `ref`, folded into it at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Merge strategies overriding the default overlay semantics.
    #[serde(default, rename = "strategy", skip_serializing_if = "Vec::is_empty")]
    pub strategies: Vec<Strategy>,
}

/// A manifest dependency: unique name plus a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub source: Source,
}

/// A parsed `plasma-compose.yaml` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Manifest {
    /// Load and validate the manifest from `dir/plasma-compose.yaml`.
    ///
    /// Missing or empty file maps to `ManifestNotFound`; YAML errors map to
    /// `ManifestMalformed`. On success the deprecated `tag` fields have been
    /// folded into `ref` (with one warning each) and structural invariants
    /// hold: unique names, unique URLs, known strategy names.
    pub fn lookup(dir: &Path) -> Result<Manifest> {
        let path = dir.join(COMPOSE_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Err(Error::ManifestNotFound {
                path: path.display().to_string(),
            });
        }

        Manifest::parse(&raw)
    }

    /// Parse and validate manifest content.
    pub fn parse(raw: &str) -> Result<Manifest> {
        let mut manifest: Manifest =
            serde_yaml::from_str(raw).map_err(|e| Error::ManifestMalformed {
                message: e.to_string(),
            })?;

        manifest.validate()?;
        manifest.fold_deprecated_tags();
        Ok(manifest)
    }

    /// Enforce uniqueness of dependency names and URLs and reject unknown
    /// strategy names at configuration time.
    fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        let mut urls = std::collections::HashSet::new();

        for dep in &self.dependencies {
            if !names.insert(dep.name.as_str()) {
                return Err(Error::DuplicateDependency {
                    name: dep.name.clone(),
                });
            }
            if !dep.source.url.is_empty() && !urls.insert(dep.source.url.as_str()) {
                return Err(Error::DuplicateUrl {
                    url: dep.source.url.clone(),
                });
            }

            for strategy in &dep.source.strategies {
                if !matches!(
                    strategy.name.as_str(),
                    STRATEGY_OVERWRITE_LOCAL
                        | STRATEGY_REMOVE_EXTRA_LOCAL
                        | STRATEGY_IGNORE_EXTRA_PACKAGE
                        | STRATEGY_FILTER_PACKAGE
                ) {
                    return Err(Error::UnknownStrategy {
                        name: strategy.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Fold the deprecated `tag` field into `ref`, warning once per
    /// dependency. An explicit `ref` wins over `tag`.
    fn fold_deprecated_tags(&mut self) {
        for dep in &mut self.dependencies {
            if let Some(tag) = dep.source.tag.take() {
                warn!(
                    "found deprecated field `tag` in `{}` dependency. Use `ref` field for tags or branches.",
                    dep.name
                );
                if dep.source.reference.is_none() {
                    dep.source.reference = Some(tag);
                }
            }
        }
    }
}
