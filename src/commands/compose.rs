//! Compose command implementation
//!
//! Runs one composition over the current working directory: downloads all
//! packages declared in `plasma-compose.yaml` and overlays them onto the
//! platform tree under `.compose/build`.

use anyhow::{Context, Result};
use clap::Args;

use plasma_compose::composer::{Composer, ComposerOptions, DEFAULT_WORKING_DIR, MAIN_DIR};
use plasma_compose::credentials::FileStore;

/// Arguments for the compose command
#[derive(Args, Debug)]
pub struct ComposeArgs {
    /// Remove the packages cache before composing
    #[arg(long)]
    pub clean: bool,

    /// Working directory for downloaded packages, relative to the platform
    #[arg(long, short = 'w', value_name = "DIR", default_value = DEFAULT_WORKING_DIR)]
    pub working_dir: String,

    /// Skip files not versioned in the platform's git repository
    #[arg(long, short = 's')]
    pub skip_not_versioned: bool,

    /// Log file conflicts and how they were resolved
    #[arg(long)]
    pub conflicts_verbosity: bool,

    /// Allow interactive credential prompts during the run
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub interactive: bool,
}

impl Default for ComposeArgs {
    fn default() -> Self {
        Self {
            clean: false,
            working_dir: DEFAULT_WORKING_DIR.to_string(),
            skip_not_versioned: false,
            conflicts_verbosity: false,
            interactive: true,
        }
    }
}

/// Execute the compose command
pub fn execute(args: ComposeArgs) -> Result<()> {
    let pwd = std::env::current_dir().context("Failed to resolve current directory")?;

    let store = FileStore::open(&pwd.join(MAIN_DIR).join("credentials.yaml"))
        .context("Failed to open credentials store")?;

    let composer = Composer::new(
        pwd,
        ComposerOptions {
            clean: args.clean,
            working_dir: args.working_dir,
            skip_not_versioned: args.skip_not_versioned,
            conflicts_verbosity: args.conflicts_verbosity,
            interactive: args.interactive,
        },
    )
    .context("Failed to load plasma-compose.yaml")?;

    composer
        .run_install(Box::new(store))
        .context("Composition failed")?;

    Ok(())
}
