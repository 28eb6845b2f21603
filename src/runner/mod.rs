use anyhow::{Context, Result};
use itertools::izip;
use ndarray::prelude::*;
use ndarray::s;
use ndarray_npy::write_npy;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::datasets::{Loader, Phase};
use crate::gbs::{cyclic_indices, ExpSampler, WeightTable};
use crate::logger::Logger;
use crate::models::GbsConvNet;
use crate::nn::{cross_entropy, Reduce};
use crate::optim::{Sgd, StepDecay};
use crate::Config;

pub mod checkpoint;

/// Orchestrates the GBS training run: TRAIN -> VAL per epoch, then the
/// bootstrap-ensemble TEST pass over the best checkpoint.
pub struct GbsRunner<L: Loader> {
    cfg: RunConfig,
    loader: L,
    model: GbsConvNet,
    opt: Sgd,
    sched: StepDecay,
    table: WeightTable,
    a_test: ExpSampler,
    logger: Logger,
    rng: StdRng,
    /// cyclic cursor into the weight table, reset each epoch, wraps modulo nsub
    start: usize,
    epoch: usize,
    best_acc: f32,
    last_loss: f32,
}

impl<L: Loader> GbsRunner<L> {
    pub fn new(cfg: RunConfig, loader: L, model: GbsConvNet) -> Result<GbsRunner<L>> {
        let table = WeightTable::new(loader.n_a(), loader.n_b(), loader.sub_size(), cfg.v);
        let a_test = ExpSampler::new(loader.n_a());
        let logger = Logger::new(&cfg.save_path)?;
        std::fs::write(cfg.save_path.join("config.ron"), cfg.config())
            .context("failed to persist run config")?;
        let opt = Sgd {
            momentum: cfg.momentum,
            dampening: cfg.dampening,
            wd: cfg.wd,
            nesterov: cfg.nesterov,
        };
        let sched = StepDecay {
            base: cfg.lr,
            gamma: cfg.gamma,
            milestones: cfg.milestones.clone(),
        };
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(GbsRunner {
            cfg,
            loader,
            model,
            opt,
            sched,
            table,
            a_test,
            logger,
            rng,
            start: 0,
            epoch: 0,
            best_acc: f32::NEG_INFINITY,
            last_loss: f32::NAN,
        })
    }

    /// Mean training loss of the most recent epoch.
    pub fn last_loss(&self) -> f32 {
        self.last_loss
    }

    pub fn alpha_shape(&self) -> (usize, usize) {
        self.table.alpha().dim()
    }

    /// Pick up a previous run from its best checkpoint, continuing at the
    /// epoch after the one that produced it.
    pub fn resume(&mut self) -> Result<()> {
        let best = self.cfg.save_path.join("best.ckpt");
        let (epoch, acc) = checkpoint::load(&best, &mut self.model, &mut self.table)?;
        self.epoch = epoch + 1;
        self.best_acc = acc;
        self.logger
            .write(&format!("resumed epoch {} acc {} from {:?}", epoch, acc, best))?;
        Ok(())
    }

    pub fn train(&mut self) -> Result<()> {
        self.logger.write("Start to train")?;
        let nsub = self.table.nsub();
        for epoch in self.epoch..self.cfg.epochs {
            let lr = self.sched.lr(epoch);
            let mut losses = 0.0f64;
            let mut steps = 0usize;
            self.start = 0;

            let mut stream = self.loader.load(Phase::Train);
            while let Some(batch) = stream.next() {
                let bsz = batch.images.shape()[0];
                let end = self.start + bsz;
                let indices = cyclic_indices(self.start, end, nsub);
                self.start = end % nsub;

                let w1 = if self.cfg.is_gbs {
                    Some(self.table.generate(&mut self.rng, bsz, &indices))
                } else {
                    None
                };
                let alpha_rows = self.table.rows(&indices);
                let (logits, mut back) =
                    self.model
                        .forward_t(&batch.images, &alpha_rows, self.cfg.fac1, true);
                let (loss, dlogits) =
                    cross_entropy(&logits, &batch.labels, w1.as_ref(), Reduce::Mean);
                losses += loss as f64;
                steps += 1;

                self.model.zero_grad();
                back(&mut self.model, &dlogits);
                self.model.step(&self.opt, lr);
            }
            drop(stream);

            self.last_loss = (losses / steps.max(1) as f64) as f32;
            self.logger
                .write(&format!("[Train] epoch:{} loss:{}", epoch, self.last_loss))?;
            self.val(epoch)?;
        }
        self.epoch = self.cfg.epochs;
        Ok(())
    }

    fn val(&mut self, epoch: usize) -> Result<f32> {
        let n_a = self.loader.n_a();
        let mut hits = 0usize;
        let mut total = 0usize;
        let stream = self.loader.load(Phase::Val);
        for batch in stream {
            let n = batch.images.shape()[0];
            let w = Array2::<f32>::ones((n, n_a));
            let (logits, _) = self.model.forward_t(&batch.images, &w, self.cfg.fac1, false);
            for (row, &label) in izip!(logits.rows(), batch.labels.iter()) {
                hits += (argmax(row) == label as usize) as usize;
            }
            total += n;
        }
        let acc = hits as f32 / total as f32;
        if acc > self.best_acc {
            self.best_acc = acc;
            checkpoint::save(
                &self.cfg.save_path.join("best.ckpt"),
                epoch,
                acc,
                &self.model,
                &self.table,
            )?;
        }
        self.logger.write(&format!("[Val] {} acc : {}", epoch, acc))?;
        Ok(acc)
    }

    /// Bootstrap ensemble over `num_bs` independently resampled weight
    /// vectors, averaged before the final argmax. Persists the raw
    /// per-resample outputs to `output.npy` for offline analysis.
    pub fn test(&mut self) -> Result<f32> {
        let best = self.cfg.save_path.join("best.ckpt");
        checkpoint::load(&best, &mut self.model, &mut self.table)
            .with_context(|| format!("no best checkpoint at {:?}", best))?;

        let (num_bs, k, n_a) = (self.cfg.num_bs, self.cfg.num_classes, self.loader.n_a());
        let n_test = self.loader.n_test();
        let a_test = self.a_test.sample_n(&mut self.rng, num_bs);
        let mut outputs = Array3::<f32>::zeros((num_bs, n_test, k + 1));

        let mut beg = 0usize;
        let mut stream = self.loader.load(Phase::Test);
        while let Some(batch) = stream.next() {
            let n = batch.images.shape()[0];
            for bs in 0..num_bs {
                // broadcast one sampled weight vector over the whole batch
                let w = Array2::from_shape_fn((n, n_a), |(_, j)| a_test[[bs, j]]);
                let (logits, _) = self.model.forward_t(&batch.images, &w, self.cfg.fac1, false);
                for i in 0..n {
                    for c in 0..k {
                        outputs[[bs, beg + i, c]] = logits[[i, c]];
                    }
                    outputs[[bs, beg + i, k]] = batch.labels[i] as f32;
                }
            }
            beg += n;
        }
        drop(stream);

        let summed = outputs.sum_axis(Axis(0));
        let truth = outputs.index_axis(Axis(0), 0);
        let mut hits = 0usize;
        for (row, label) in izip!(summed.rows(), truth.column(k).iter()) {
            hits += (argmax(row.slice(s![..k])) == *label as usize) as usize;
        }
        let acc = hits as f32 / n_test as f32;

        write_npy(self.cfg.save_path.join("output.npy"), &outputs)
            .context("failed to write output.npy")?;
        self.logger.write(&format!("[Test] acc : {}", acc))?;
        Ok(acc)
    }
}

fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
