// Copyright (c) Microsoft. All rights reserved.

use std::path::{Path, PathBuf};

use crate::Error;

/// Provider configuration, read from TOML.
///
/// ```toml
/// generate_certs = true
///
/// [[tokens]]
/// key_ring = "projects/my-project/locations/us/keyRings/my-ring"
/// label = "signing"
/// ```
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// One token per key ring, exposed in slot order.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,

    /// Issue a certificate for every key version, for applications that locate keys through certificates.
    #[serde(default)]
    pub generate_certs: bool,

    /// Name the key storage provider is opened with. Defaults to the built-in provider name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,

    /// Directory to append log output to. Logs go to stderr if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<PathBuf>,

    /// Appended to the log file name, for telling apart the logs of several processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filename_suffix: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TokenConfig {
    /// `projects/*/locations/*/keyRings/*`
    pub key_ring: String,

    /// Token label. At most 32 bytes.
    #[serde(default)]
    pub label: String,
}

impl Config {
    /// Reads `config_path` and merges every `*.toml` file of `config_directory_path` into it,
    /// in file name order. A missing directory is the same as an empty one.
    pub fn load(config_path: &Path, config_directory_path: Option<&Path>) -> Result<Self, Error> {
        let mut config = read_toml(config_path)?;

        if let Some(config_directory_path) = config_directory_path {
            for patch_path in patch_paths(config_directory_path)? {
                let patch = read_toml(&patch_path)?;
                merge_toml(&mut config, patch);
            }
        }

        serde::Deserialize::deserialize(config).map_err(|err| {
            Error::invalid_argument(format!("invalid config {}", config_path.display()))
                .with_source(err)
        })
    }

    /// Loads the config file named by the environment variable `var`, merging patches from the
    /// directory named by `dir_var` if that is set.
    pub fn from_env(var: &str, dir_var: &str) -> Result<Self, Error> {
        let config_path = std::env::var_os(var)
            .ok_or_else(|| Error::failed_precondition(format!("{var} is not set")))?;
        let config_directory_path = std::env::var_os(dir_var).map(PathBuf::from);

        Config::load(Path::new(&config_path), config_directory_path.as_deref())
    }
}

fn read_toml(path: &Path) -> Result<toml::Value, Error> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        Error::failed_precondition(format!("could not read config {}", path.display()))
            .with_source(err)
    })?;
    toml::from_str(&contents).map_err(|err| {
        Error::invalid_argument(format!("could not parse config {}", path.display()))
            .with_source(err)
    })
}

fn patch_paths(config_directory_path: &Path) -> Result<Vec<PathBuf>, Error> {
    let read_error = |err: std::io::Error| {
        Error::failed_precondition(format!(
            "could not read config directory {}",
            config_directory_path.display()
        ))
        .with_source(err)
    };

    let entries = match std::fs::read_dir(config_directory_path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(read_error(err)),
    };

    let mut patch_paths = vec![];
    for entry in entries {
        let entry = entry.map_err(read_error)?;
        if !entry.file_type().map_err(read_error)?.is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(std::ffi::OsStr::to_str) == Some("toml") {
            patch_paths.push(path);
        }
    }
    patch_paths.sort();

    Ok(patch_paths)
}

/// Tables merge key by key, arrays are concatenated, anything else is replaced by the patch.
fn merge_toml(base: &mut toml::Value, patch: toml::Value) {
    match (base, patch) {
        (toml::Value::Table(base), toml::Value::Table(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(original) => merge_toml(original, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }

        (toml::Value::Array(base), toml::Value::Array(patch)) => base.extend(patch),

        (base, patch) => *base = patch,
    }
}
