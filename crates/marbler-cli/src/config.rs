use std::path::{Path, PathBuf};

use marbler_env::process::SimulationConfig;
use marbler_training::config::TrainingConfig;
use serde::{Deserialize, Serialize};

use crate::util;

/// Contents of a `--config` file. Every section and field is optional.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct RunConfig {
    pub(crate) training: TrainingConfig,
    pub(crate) simulation: SimulationConfig,
}

impl RunConfig {
    pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => util::read_json_file("run configuration", path),
            None => Ok(Self::default()),
        }
    }
}

/// Simulation flags shared by every subcommand.
#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct SimulationArg {
    /// Path of the simulation server binary
    #[arg(long)]
    server_bin: Option<PathBuf>,
    /// Path of the simulation client binary
    #[arg(long)]
    client_bin: Option<PathBuf>,
    /// Race timeout enforced by the server
    #[arg(long)]
    max_game_seconds: Option<u32>,
    /// Run the server without rendering
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    headless: Option<bool>,
}

impl SimulationArg {
    pub(crate) fn apply(&self, config: &mut SimulationConfig) {
        if let Some(path) = &self.server_bin {
            config.server_executable.clone_from(path);
        }
        if let Some(path) = &self.client_bin {
            config.client_executable.clone_from(path);
        }
        if let Some(seconds) = self.max_game_seconds {
            config.max_game_seconds = seconds;
        }
        if let Some(headless) = self.headless {
            config.headless = headless;
        }
    }
}
