use crate::{executors::CalculationRequest, staging::Stager};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound)
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

/// resolve a bare program name through `PATH`, paths are returned as they are
pub fn find_executable(exec: &Path) -> Option<PathBuf> {
    if exec.components().count() > 1 {
        return exec.is_file().then(|| exec.to_path_buf());
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(exec))
            .find(|candidate| candidate.is_file())
    })
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}")]
    ReadConfig { path: PathBuf, source: Error },
    #[error("Config file is not valid")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("File not found")]
    FileNotFound,
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(default)]
    pub launcher: LauncherConfig,
    // optional staging step, runs before any calculation is submitted
    pub staging: Option<StagingConfig>,
    #[serde(default)]
    pub calculations: Vec<CalculationRequest>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_parallel_launcher")]
    pub parallel_launcher: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallel_launcher: default_parallel_launcher(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StagingConfig {
    pub source: PathBuf,
    pub prefix: PathBuf,
    pub count: usize,
    pub files: Vec<String>,
}

impl StagingConfig {
    pub fn stager(&self) -> Stager {
        Stager::new(&self.source, &self.prefix, self.files.clone())
    }
}

impl BatchConfig {
    /// Read a YAML batch file, relative paths are taken relative to the file itself
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        for calculation in self.calculations.iter_mut() {
            calculation.working_directory = base.join(&calculation.working_directory);

            // bare program names are looked up in PATH instead
            if calculation.executable.components().count() > 1 {
                calculation.executable = base.join(&calculation.executable);
            }
        }

        if let Some(staging) = self.staging.as_mut() {
            staging.source = base.join(&staging.source);
            staging.prefix = base.join(&staging.prefix);
        }
    }

    /// Report every problem of the config at once, returns true if any of them is fatal
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.launcher.workers == 0 {
            error!("launcher.workers must be at least 1");
            contains_error = true;
        }

        if let Some(staging) = &self.staging {
            if staging.count == 0 {
                error!("staging.count must be at least 1");
                contains_error = true;
            }
            if staging.files.is_empty() {
                error!("staging.files is empty, staged folders would not contain any input");
                contains_error = true;
            }
            if !staging.source.is_dir() {
                error!(
                    "staging.source {} is not a directory",
                    staging.source.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if self.calculations.is_empty() {
            error!("No calculation was defined, nothing to launch");
            contains_error = true;
        }

        for (index, calculation) in self.calculations.iter().enumerate() {
            if let Err(e) = calculation.validate() {
                error!("calculations[{index}] is invalid: {e}");
                contains_error = true;
            }

            match find_executable(&calculation.executable) {
                None => warn!(
                    "calculations[{index}].exec {} was not found, the calculation will fail to launch",
                    calculation.executable.to_string_lossy()
                ),
                Some(path) => match check_executable(&path) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "calculations[{index}].exec {} is not executable, this might cause problems",
                        path.to_string_lossy()
                    ),
                    Err(e) => warn!(
                        "Failed to determine if calculations[{index}].exec ({}) is an executable: {e}",
                        path.to_string_lossy()
                    ),
                },
            }

            // staged folders only appear once staging ran
            if self.staging.is_none() && !calculation.working_directory.is_dir() {
                warn!(
                    "calculations[{index}].dir {} does not exist",
                    calculation.working_directory.to_string_lossy()
                );
            }
        }

        for (dir, indices) in self
            .calculations
            .iter()
            .enumerate()
            .map(|(index, calculation)| (&calculation.working_directory, index))
            .into_group_map()
            .into_iter()
            .filter(|(_, indices)| indices.len() > 1)
            .sorted()
        {
            warn!(
                "calculations {} share the working directory {}, their outputs will clash",
                indices.iter().join(", "),
                dir.to_string_lossy()
            );
        }

        contains_error
    }
}

fn default_workers() -> usize {
    4
}

fn default_parallel_launcher() -> PathBuf {
    PathBuf::from("mpirun")
}
