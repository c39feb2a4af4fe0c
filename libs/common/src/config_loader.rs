//! Layered configuration loading (figment)
//!
//! Priority (highest to lowest):
//! 1. Environment variables `{SERVICE}_*`, nested keys separated by `__`
//! 2. Explicit config file (`--config`)
//! 3. `config/{service}.{toml,yaml,yml,json}`
//! 4. Compiled-in defaults

use errors::{VoltageError, VoltageResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// Build the figment for a service without extracting it
pub fn config_figment<T>(service_name: &str, explicit: Option<&Path>) -> VoltageResult<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()))
        .merge(Toml::file(format!("config/{}.toml", service_name)))
        .merge(Yaml::file(format!("config/{}.yaml", service_name)))
        .merge(Yaml::file(format!("config/{}.yml", service_name)))
        .merge(Json::file(format!("config/{}.json", service_name)));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(VoltageError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        figment = merge_file(figment, path)?;
    }

    Ok(figment.merge(Env::prefixed(&format!("{}_", service_name.to_uppercase())).split("__")))
}

/// Load configuration from defaults, files and environment
pub fn load_config<T>(service_name: &str, explicit: Option<&Path>) -> VoltageResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    config_figment::<T>(service_name, explicit)?
        .extract()
        .map_err(|e| VoltageError::Configuration(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from a single file on top of defaults (no env layer)
pub fn load_config_from_file<T, P>(path: P) -> VoltageResult<T>
where
    T: Serialize + DeserializeOwned + Default,
    P: AsRef<Path>,
{
    merge_file(Figment::from(Serialized::defaults(T::default())), path.as_ref())?
        .extract()
        .map_err(|e| {
            VoltageError::Configuration(format!("Failed to load configuration from file: {}", e))
        })
}

fn merge_file(figment: Figment, path: &Path) -> VoltageResult<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| VoltageError::Configuration("Config file must have an extension".into()))?;

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        other => Err(VoltageError::Configuration(format!(
            "Unsupported config file format: {}",
            other
        ))),
    }
}
