use anyhow::Result;

use gbsnet_lib::config::RunConfig;
use gbsnet_lib::datasets::mnist::{MnistLoader, MnistParams};
use gbsnet_lib::models::GbsConvNet;
use gbsnet_lib::runner::GbsRunner;

const WIDTH: usize = 64;

fn main() -> Result<()> {
    let cfg = match std::env::args().nth(1) {
        Some(path) => RunConfig::from_file(std::path::Path::new(&path))?,
        None => RunConfig::default(),
    };

    let loader = MnistLoader::new(&MnistParams {
        path: cfg.data_path.clone(),
        batch_size: cfg.batch_size,
        n_a: cfg.n_a,
        cutout: cfg.cutout,
    })?;
    let model = GbsConvNet::new(1, WIDTH, cfg.n_a, cfg.num_classes, cfg.feature_adaptive);

    let resume = cfg.save_path.join("best.ckpt").exists();
    let mut runner = GbsRunner::new(cfg, loader, model)?;
    if resume {
        runner.resume()?;
    }
    runner.train()?;
    runner.test()?;
    Ok(())
}
