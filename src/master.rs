use indexmap::IndexMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const MAX_PRODUCTION_TYPE: u16 = 32;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("production type master not found: {0}")]
    NotFound(String),
    #[error("invalid production type master {file}: {message}")]
    Invalid { file: String, message: String },
    #[error("production type {production_type} is not configured for line {line}")]
    NotConfigured { production_type: u16, line: String },
}

/// One production-type (machine variant) entry of the static master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionTypeConfig {
    pub name: String,
    /// Units per pallet, always > 0.
    pub fully: u32,
    /// Cycle time of a single unit in seconds, always > 0.
    pub seconds_per_product: f64,
}

/// Static production-type master, loaded once per process and immutable
/// afterwards. One YAML file per line name.
#[derive(Debug)]
pub struct Master {
    line_name: String,
    configs: IndexMap<u16, ProductionTypeConfig>,
}

fn master_dir() -> PathBuf {
    env::var("MASTER_DIR").map_or_else(
        |_| PathBuf::from("config/production_types"),
        PathBuf::from,
    )
}

impl Master {
    /// Loads the master for the given line from
    /// `config/production_types/<LINE_NAME>.yaml` (or `MASTER_DIR`).
    pub fn load(line_name: &str) -> Result<Self, MasterError> {
        let mut path = master_dir();
        path.push(format!("{}.yaml", line_name));
        let raw = fs::read_to_string(&path)
            .map_err(|_| MasterError::NotFound(path.display().to_string()))?;
        let master = Self::from_yaml(line_name, &raw).map_err(|e| match e {
            MasterError::Invalid { message, .. } => MasterError::Invalid {
                file: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        info!(
            "production type master loaded: line={}, {} type(s)",
            line_name,
            master.configs.len()
        );
        Ok(master)
    }

    pub fn from_yaml(line_name: &str, raw: &str) -> Result<Self, MasterError> {
        let configs: IndexMap<u16, ProductionTypeConfig> =
            serde_yaml::from_str(raw).map_err(|e| MasterError::Invalid {
                file: line_name.to_owned(),
                message: e.to_string(),
            })?;
        for (code, config) in &configs {
            if *code > MAX_PRODUCTION_TYPE {
                return Err(MasterError::Invalid {
                    file: line_name.to_owned(),
                    message: format!("production type {} out of range", code),
                });
            }
            if config.fully == 0 {
                return Err(MasterError::Invalid {
                    file: line_name.to_owned(),
                    message: format!("type {}: fully must be > 0", code),
                });
            }
            if config.seconds_per_product <= 0.0 {
                return Err(MasterError::Invalid {
                    file: line_name.to_owned(),
                    message: format!("type {}: seconds_per_product must be > 0", code),
                });
            }
        }
        Ok(Self {
            line_name: line_name.to_owned(),
            configs,
        })
    }

    pub fn get(&self, production_type: u16) -> Result<&ProductionTypeConfig, MasterError> {
        self.configs
            .get(&production_type)
            .ok_or(MasterError::NotConfigured {
                production_type,
                line: self.line_name.clone(),
            })
    }

    #[inline]
    pub fn line_name(&self) -> &str {
        &self.line_name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
0:
  name: TYPE-A
  fully: 2800
  seconds_per_product: 1.2
1:
  name: TYPE-B
  fully: 1400
  seconds_per_product: 0.8
"#;

    #[test]
    fn loads_and_resolves() {
        let master = Master::from_yaml("LINE_1", SAMPLE).unwrap();
        assert_eq!(master.len(), 2);
        assert_eq!(master.get(1).unwrap().name, "TYPE-B");
        assert_eq!(master.get(0).unwrap().fully, 2800);
    }

    #[test]
    fn undefined_code_is_typed_error() {
        let master = Master::from_yaml("LINE_1", SAMPLE).unwrap();
        match master.get(7) {
            Err(MasterError::NotConfigured {
                production_type, ..
            }) => assert_eq!(production_type, 7),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_zero_fully() {
        let raw = "0:\n  name: BAD\n  fully: 0\n  seconds_per_product: 1.0\n";
        assert!(Master::from_yaml("LINE_1", raw).is_err());
    }

    #[test]
    fn rejects_out_of_range_code() {
        let raw = "40:\n  name: BAD\n  fully: 10\n  seconds_per_product: 1.0\n";
        assert!(Master::from_yaml("LINE_1", raw).is_err());
    }
}
