//! # Plasma Compose Library
//!
//! This library composes a single output directory tree (the build) by
//! overlaying a local platform tree with the contents of a set of remote
//! packages. Packages come from git repositories or downloadable archives,
//! may declare further packages in their own manifests, and may carry merge
//! strategies that override the default overlay semantics.
//!
//! ## Quick Example
//!
//! ```
//! use plasma_compose::manifest::Manifest;
//!
//! let manifest = Manifest::parse(r#"
//! name: platform
//! dependencies:
//!     - name: compose-example
//!       source:
//!         type: git
//!         url: https://github.com/example/compose-example.git
//!         ref: 0.0.7
//! "#).unwrap();
//!
//! assert_eq!(manifest.dependencies.len(), 1);
//! assert_eq!(manifest.dependencies[0].to_package().target(), "0.0.7");
//! ```
//!
//! ## Core Concepts
//!
//! - **Manifest (`manifest`)**: The `plasma-compose.yaml` schema: named
//!   dependencies with a source (git or http), an optional revision and
//!   optional merge strategies.
//! - **Packages (`package`, `download`)**: Dependencies resolved by the
//!   download manager, which recurses into nested manifests and accumulates
//!   packages post-order so dependencies precede their dependents.
//! - **Downloaders (`git`, `http`, `archive`)**: Transport implementations
//!   behind one `Downloader` trait; both climb the credential auth ladder
//!   (anonymous, stored, interactive) mediated by `credentials`.
//! - **Graph (`graph`)**: Dependency graph with a synthetic root node and a
//!   deterministic topological sort directing merge order.
//! - **Builder (`builder`)**: Walks the platform tree and each package tree,
//!   applies merge strategies, and materializes the overlaid tree on disk.
//! - **Composer (`composer`)**: Ties everything together for one run and
//!   owns the build/working directory lifecycle and signal-driven cleanup.
//!
//! ## Execution Flow
//!
//! 1.  Load and validate the root manifest.
//! 2.  Recursively download every reachable package into the working
//!     directory, re-fetching only checkouts that are out of date.
//! 3.  Build the dependency graph and sort it topologically.
//! 4.  Walk the platform, then each package in order, resolving conflicts
//!     by strategy (default: local wins).
//! 5.  Materialize the merged entries into `.compose/build`.

pub mod archive;
pub mod builder;
pub mod cancel;
pub mod composer;
pub mod credentials;
pub mod download;
pub mod error;
pub mod git;
pub mod graph;
pub mod http;
pub mod manifest;
pub mod package;
