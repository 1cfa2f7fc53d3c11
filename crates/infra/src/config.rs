//! Process configuration: environment variables plus an optional device registry file.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `STGCMT_DEVICE_NAME` | `dcm4chee-arc` | local archive device receiving confirmations |
//! | `STGCMT_USE_PERSISTENT_STORES` | `false` | use Postgres instead of in-memory stores |
//! | `DATABASE_URL` | required if persistent | Postgres connection string |
//! | `STGCMT_DB_MAX_CONNECTIONS` | `5` | pool size |
//! | `STGCMT_DEVICE_CONFIG` | unset | JSON device / exporter registry |

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use stgcmt_archive::ExporterDescriptor;
use stgcmt_core::{DeviceName, DomainError};

use crate::exporter_registry::DeviceRegistry;

pub const DEFAULT_DEVICE_NAME: &str = "dcm4chee-arc";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set when STGCMT_USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read device config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed device config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid device config entry: {0}")]
    Domain(#[from] DomainError),
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StgCmtConfig {
    pub device_name: DeviceName,
    pub persistence: Persistence,
    pub device_config_path: Option<PathBuf>,
}

impl StgCmtConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let device_name = lookup("STGCMT_DEVICE_NAME").unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());
        let device_name: DeviceName = device_name.parse().map_err(|e: DomainError| ConfigError::Invalid {
            key: "STGCMT_DEVICE_NAME",
            value: device_name.clone(),
            reason: e.to_string(),
        })?;

        let use_persistent = match lookup("STGCMT_USE_PERSISTENT_STORES") {
            Some(raw) => raw.trim().parse::<bool>().map_err(|e| ConfigError::Invalid {
                key: "STGCMT_USE_PERSISTENT_STORES",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => false,
        };

        let persistence = if use_persistent {
            let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let max_connections = match lookup("STGCMT_DB_MAX_CONNECTIONS") {
                Some(raw) => match raw.trim().parse::<u32>() {
                    Ok(n) if n > 0 => n,
                    Ok(_) => {
                        return Err(ConfigError::Invalid {
                            key: "STGCMT_DB_MAX_CONNECTIONS",
                            value: raw,
                            reason: "must be at least 1".to_string(),
                        });
                    }
                    Err(e) => {
                        return Err(ConfigError::Invalid {
                            key: "STGCMT_DB_MAX_CONNECTIONS",
                            value: raw.clone(),
                            reason: e.to_string(),
                        });
                    }
                },
                None => DEFAULT_MAX_CONNECTIONS,
            };
            Persistence::Postgres {
                database_url,
                max_connections,
            }
        } else {
            Persistence::InMemory
        };

        let device_config_path = lookup("STGCMT_DEVICE_CONFIG")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            device_name,
            persistence,
            device_config_path,
        })
    }

    /// Load the exporter registry. Without a config file the local device is registered
    /// with no exporters.
    pub fn load_registry(&self) -> Result<DeviceRegistry, ConfigError> {
        let registry = match &self.device_config_path {
            Some(path) => load_device_registry(path)?,
            None => DeviceRegistry::new(),
        };
        Ok(registry.with_device(self.device_name.clone()))
    }
}

pub fn load_device_registry(path: &Path) -> Result<DeviceRegistry, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_device_registry(&raw)
}

pub fn parse_device_registry(json: &str) -> Result<DeviceRegistry, ConfigError> {
    let file: RegistryFile = serde_json::from_str(json)?;

    let mut registry = DeviceRegistry::new();
    for device in file.devices {
        let name: DeviceName = device.device_name.parse()?;
        registry = registry.with_device(name.clone());
        for entry in device.exporters {
            registry.register(name.clone(), entry.into_descriptor()?);
        }
    }
    Ok(registry)
}

// Registry file format

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceEntry {
    #[serde(alias = "dicomDeviceName")]
    device_name: String,
    #[serde(default, alias = "dcmExporter")]
    exporters: Vec<ExporterEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExporterEntry {
    #[serde(alias = "dcmExporterID")]
    exporter_id: String,
    #[serde(alias = "dcmURI")]
    uri: String,
    #[serde(default, alias = "dcmQueueName")]
    queue_name: Option<String>,
    #[serde(rename = "stgCmtScpAETitle", alias = "dcmStgCmtSCP")]
    stgcmt_scp_ae_title: String,
    #[serde(default, rename = "retrieveAETitles", alias = "dcmRetrieveAET")]
    retrieve_ae_titles: Vec<String>,
}

impl ExporterEntry {
    fn into_descriptor(self) -> Result<ExporterDescriptor, DomainError> {
        let titles = self
            .retrieve_ae_titles
            .iter()
            .map(|t| t.parse())
            .collect::<Result<Vec<_>, _>>()?;

        let mut descriptor = ExporterDescriptor::new(
            self.exporter_id.parse()?,
            self.uri,
            self.stgcmt_scp_ae_title.parse()?,
        )
        .with_retrieve_ae_titles(titles);
        if let Some(queue) = self.queue_name {
            descriptor = descriptor.with_queue_name(queue);
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter_registry::ExporterRegistry;
    use std::collections::HashMap;
    use stgcmt_archive::RetrieveAePolicy;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory_local_device() {
        let config = StgCmtConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.device_name.as_str(), DEFAULT_DEVICE_NAME);
        assert_eq!(config.persistence, Persistence::InMemory);
        assert!(config.device_config_path.is_none());
    }

    #[test]
    fn persistent_stores_require_database_url() {
        let err = StgCmtConfig::from_lookup(lookup(&[("STGCMT_USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));

        let config = StgCmtConfig::from_lookup(lookup(&[
            ("STGCMT_USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stgcmt"),
            ("STGCMT_DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();
        assert_eq!(
            config.persistence,
            Persistence::Postgres {
                database_url: "postgres://localhost/stgcmt".to_string(),
                max_connections: 12,
            }
        );
    }

    #[test]
    fn rejects_malformed_values() {
        let err = StgCmtConfig::from_lookup(lookup(&[("STGCMT_USE_PERSISTENT_STORES", "yes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STGCMT_USE_PERSISTENT_STORES", .. }));

        let err = StgCmtConfig::from_lookup(lookup(&[
            ("STGCMT_USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stgcmt"),
            ("STGCMT_DB_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STGCMT_DB_MAX_CONNECTIONS", .. }));

        let err = StgCmtConfig::from_lookup(lookup(&[("STGCMT_DEVICE_NAME", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STGCMT_DEVICE_NAME", .. }));
    }

    #[test]
    fn parses_registry_with_camel_case_and_ldap_names() {
        let registry = parse_device_registry(
            r#"{
                "devices": [
                    {
                        "deviceName": "dcm4chee-arc",
                        "exporters": [
                            {
                                "exporterId": "STORESCP",
                                "uri": "dicom:STORESCP",
                                "queueName": "Export1",
                                "stgCmtScpAETitle": "STGCMTSCP",
                                "retrieveAETitles": ["AE1", "AE2"]
                            },
                            {
                                "dcmExporterID": "CLOUD",
                                "dcmURI": "dicom:CLOUD",
                                "dcmStgCmtSCP": "CLOUDSCP"
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        let device: DeviceName = "dcm4chee-arc".parse().unwrap();
        let store = registry.resolve_exporter(&device, &"STORESCP".parse().unwrap()).unwrap();
        assert_eq!(store.queue_name(), Some("Export1"));
        assert_eq!(store.retrieve_policy().configured_titles().len(), 2);

        let cloud = registry.resolve_exporter(&device, &"CLOUD".parse().unwrap()).unwrap();
        assert_eq!(cloud.stgcmt_scp_ae_title().as_str(), "CLOUDSCP");
        assert_eq!(cloud.retrieve_policy(), &RetrieveAePolicy::PerObject);
    }

    #[test]
    fn registry_rejects_invalid_ae_title() {
        let err = parse_device_registry(
            r#"{"devices": [{"deviceName": "d", "exporters": [
                {"exporterId": "X", "uri": "dicom:X", "stgCmtScpAETitle": "WAY_TOO_LONG_FOR_AN_AE_TITLE"}
            ]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Domain(_)));
    }

    #[test]
    fn missing_registry_file_is_reported() {
        let config = StgCmtConfig::from_lookup(lookup(&[(
            "STGCMT_DEVICE_CONFIG",
            "/nonexistent/stgcmt-devices.json",
        )]))
        .unwrap();
        assert!(matches!(config.load_registry(), Err(ConfigError::Io { .. })));
    }
}
