//! Settings of the command line tool.
//!
//! Defaults are overridden by an optional `cuds.toml` (or any other format
//! the `config` crate understands) and then by `CUDS__` prefixed environment
//! variables, e.g. `CUDS__STORE__BACKEND=json`.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;
use crate::wrapper::Backend;

pub const DEFAULT_FILE: &str = "cuds";

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub backend: Backend,
    pub location: PathBuf,
    /// Create the store when it does not exist.
    pub create: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    /// JSON ontology definition, see [`crate::ontology::OntologyDefinition`].
    pub ontology: Option<PathBuf>,
    /// Filter directives used when `RUST_LOG` is not set.
    pub log: String,
    /// Populate an empty store with the water molecule example.
    pub seed_demo: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_file(DEFAULT_FILE)
    }

    /// Reads settings with `file` as the (optional) file name without extension.
    pub fn from_file(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("store.backend", "sqlite")?
            .set_default("store.location", "cuds.db")?
            .set_default("store.create", true)?
            .set_default("log", "info")?
            .set_default("seed_demo", false)?
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("CUDS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
