use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Parameters of a single training run. Serialized as ron, a copy is
/// written into the save directory so a run can be reproduced later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// columns resampled per weight-update micro-step
    pub v: usize,
    pub k0: f32,
    /// classifier logit scaling factor
    pub fac1: f32,
    /// bootstrap ensemble size at test time
    pub num_bs: usize,
    pub is_gbs: bool,
    pub num_classes: usize,
    /// number of blocks the training set is partitioned into
    pub n_a: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub lr: f32,
    pub momentum: f32,
    pub dampening: f32,
    pub wd: f32,
    pub nesterov: bool,
    /// epochs at which the learning rate is multiplied by `gamma`
    pub milestones: Vec<usize>,
    pub gamma: f32,
    /// gate multiplies pooled features when true, is concatenated otherwise
    pub feature_adaptive: bool,
    /// side length of the cutout mask, 0 disables it
    pub cutout: usize,
    pub data_path: PathBuf,
    pub save_path: PathBuf,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            v: 2,
            k0: 1.0,
            fac1: 0.125,
            num_bs: 10,
            is_gbs: true,
            num_classes: 10,
            n_a: 10,
            batch_size: 64,
            epochs: 150,
            lr: 0.1,
            momentum: 0.9,
            dampening: 0.0,
            wd: 5e-4,
            nesterov: true,
            milestones: vec![50, 100],
            gamma: 0.1,
            feature_adaptive: true,
            cutout: 8,
            data_path: PathBuf::from(".mnist"),
            save_path: PathBuf::from("runs/gbs"),
            seed: 0,
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        ron::from_str(&s).with_context(|| format!("failed to parse config {:?}", path))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_sane() {
        let c = RunConfig::default();
        assert!(c.v > 0 && c.num_bs > 0 && c.num_classes > 1);
        assert!(c.gamma > 0.0 && c.gamma < 1.0);
    }

    #[test]
    fn ron_roundtrip() {
        let c = RunConfig::default();
        let s = ron::to_string(&c).unwrap();
        let d: RunConfig = ron::from_str(&s).unwrap();
        assert_eq!(d.batch_size, c.batch_size);
        assert_eq!(d.milestones, c.milestones);
    }
}
