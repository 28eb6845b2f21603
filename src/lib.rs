use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub mod config;
pub mod datasets;
pub mod gbs;
pub mod logger;
pub mod models;
pub mod nn;
pub mod optim;
pub mod runner;

/// Anything serde-serializable round-trips through ron, which is how
/// run parameters are written next to checkpoints and reloaded later.
pub trait Config: Send + Sync {
    fn config(&self) -> String;
    fn load_config(&mut self, config: &str) -> Result<()>;
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Config for T {
    fn config(&self) -> String {
        ron::to_string(self).unwrap()
    }
    fn load_config(&mut self, config: &str) -> Result<()> {
        *self = ron::from_str(config).context(format!("Failed to parse config {}", config))?;
        Ok(())
    }
}

#[test]
fn config_roundtrip() {
    let mut c = config::RunConfig::default();
    let s = c.config();
    c.load_config(&s).unwrap();
    assert_eq!(c.config(), s);
}
