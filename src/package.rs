//! Resolved package model
//!
//! A `Package` is a dependency after it has been picked up by the download
//! manager: the declared source plus the ordered list of child names
//! discovered while recursing into its own manifest.

use crate::manifest::{Dependency, Source, SourceType, Strategy};

/// Target directory name used when no revision is pinned.
pub const LATEST_TARGET: &str = "latest";

/// A dependency resolved by recursive download.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub source: Source,
    /// Names of child packages found in this package's nested manifest, in
    /// declaration order.
    pub dependencies: Vec<String>,
}

impl Package {
    pub fn new(name: String, source: Source) -> Self {
        Self {
            name,
            source,
            dependencies: Vec::new(),
        }
    }

    /// Append a child package name discovered during recursion.
    pub fn add_dependency(&mut self, name: &str) {
        self.dependencies.push(name.to_string());
    }

    pub fn source_type(&self) -> SourceType {
        self.source.source_type
    }

    pub fn url(&self) -> &str {
        &self.source.url
    }

    pub fn reference(&self) -> Option<&str> {
        self.source.reference.as_deref()
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.source.strategies
    }

    /// Leaf directory name of the package checkout under
    /// `<workingDir>/<name>/`: the pinned ref, or `latest`.
    pub fn target(&self) -> &str {
        match self.source.reference.as_deref() {
            Some(reference) if !reference.is_empty() => reference,
            _ => LATEST_TARGET,
        }
    }
}

impl Dependency {
    /// Build the resolved package for this dependency.
    pub fn to_package(&self) -> Package {
        Package::new(self.name.clone(), self.source.clone())
    }
}
