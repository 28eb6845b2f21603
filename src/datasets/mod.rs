use std::str::FromStr;

use anyhow::{Error, Result};
use ndarray::prelude::*;
use rand::seq::SliceRandom;

pub mod mnist;
pub mod transforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Val,
    Test,
}

impl FromStr for Phase {
    type Err = Error;
    fn from_str(s: &str) -> Result<Phase> {
        match s {
            "train" => Ok(Phase::Train),
            "val" => Ok(Phase::Val),
            "test" => Ok(Phase::Test),
            other => Err(Error::msg(format!(
                "Phase should be one of [train, val, test], got {:?}",
                other
            ))),
        }
    }
}

/// One mini-batch, images are [N, C, H, W] normalized floats.
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<u32>,
}

/// The loader interface the runner consumes: phase streams plus the block
/// bookkeeping attributes that size the weight table.
pub trait Loader {
    fn load(&self, phase: Phase) -> BatchStream<'_>;
    fn len(&self, phase: Phase) -> usize;
    /// number of blocks the training set is partitioned into
    fn n_a(&self) -> usize;
    /// examples per block
    fn n_b(&self) -> usize;
    /// blocks contributing weight information per resample cycle
    fn sub_size(&self) -> usize;
    fn n_test(&self) -> usize;
}

/// A sequential pass over one phase. Keeps the final partial batch: batch
/// boundaries need not divide the weight table size, the cursor just wraps.
pub struct BatchStream<'a> {
    images: &'a Array4<f32>,
    labels: &'a [u32],
    order: Vec<usize>,
    batch_size: usize,
    idx: usize,
    cutout: Option<usize>,
}

impl<'a> BatchStream<'a> {
    pub fn new(
        images: &'a Array4<f32>,
        labels: &'a [u32],
        order: Vec<usize>,
        batch_size: usize,
        cutout: Option<usize>,
    ) -> BatchStream<'a> {
        assert!(batch_size > 0, "batch size cannot be zero");
        BatchStream {
            images,
            labels,
            order,
            batch_size,
            idx: 0,
            cutout,
        }
    }
}

impl<'a> Iterator for BatchStream<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.idx >= self.order.len() {
            return None;
        }
        let end = (self.idx + self.batch_size).min(self.order.len());
        let picks = &self.order[self.idx..end];
        self.idx = end;

        let mut images = self.images.select(Axis(0), picks);
        let labels = picks.iter().map(|&i| self.labels[i]).collect();
        if let Some(len) = self.cutout {
            transforms::cutout(&mut images, len, &mut rand::thread_rng());
        }
        Some(Batch { images, labels })
    }
}

/// In-memory loader for small datasets and synthetic tests. All three
/// phases read the same backing arrays; the block attributes are explicit.
pub struct MemoryLoader {
    images: Array4<f32>,
    labels: Vec<u32>,
    batch_size: usize,
    n_a: usize,
    n_b: usize,
    sub_size: usize,
    shuffle_val: bool,
}

impl MemoryLoader {
    pub fn new(images: Array4<f32>, labels: Vec<u32>, batch_size: usize, n_a: usize) -> MemoryLoader {
        let n = labels.len();
        let n_b = (n / n_a).max(1);
        let sub_size = if n > 500 { (500 * n_a / n).max(1) } else { n_a };
        MemoryLoader {
            images,
            labels,
            batch_size,
            n_a,
            n_b,
            sub_size,
            shuffle_val: false,
        }
    }

    /// Override the block geometry, for tests that pin nsub independently
    /// of the number of stored examples.
    pub fn with_blocks(mut self, n_b: usize, sub_size: usize) -> MemoryLoader {
        self.n_b = n_b;
        self.sub_size = sub_size;
        self
    }
}

impl Loader for MemoryLoader {
    fn load(&self, phase: Phase) -> BatchStream<'_> {
        let mut order: Vec<usize> = (0..self.labels.len()).collect();
        if phase == Phase::Val && self.shuffle_val {
            order.shuffle(&mut rand::thread_rng());
        }
        BatchStream::new(&self.images, &self.labels, order, self.batch_size, None)
    }

    fn len(&self, _phase: Phase) -> usize {
        self.labels.len()
    }

    fn n_a(&self) -> usize {
        self.n_a
    }

    fn n_b(&self) -> usize {
        self.n_b
    }

    fn sub_size(&self) -> usize {
        self.sub_size
    }

    fn n_test(&self) -> usize {
        self.labels.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phase_parse_rejects_unknown() {
        assert_eq!("train".parse::<Phase>().unwrap(), Phase::Train);
        let err = "trian".parse::<Phase>().unwrap_err();
        assert!(err.to_string().contains("[train, val, test]"));
    }

    #[test]
    fn stream_keeps_partial_tail() {
        let images = Array4::<f32>::zeros((7, 1, 2, 2));
        let labels: Vec<u32> = (0..7).collect();
        let loader = MemoryLoader::new(images, labels, 3, 1);
        let batches: Vec<Batch> = loader.load(Phase::Train).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].labels, vec![0, 1, 2]);
        assert_eq!(batches[2].labels, vec![6]);
    }

    #[test]
    fn block_geometry_defaults() {
        let images = Array4::<f32>::zeros((10, 1, 2, 2));
        let loader = MemoryLoader::new(images, (0..10).collect(), 4, 5);
        // small dataset: every block contributes
        assert_eq!(loader.sub_size(), 5);
        assert_eq!(loader.n_b(), 2);
        let pinned = {
            let images = Array4::<f32>::zeros((10, 1, 2, 2));
            MemoryLoader::new(images, (0..10).collect(), 4, 10).with_blocks(5000, 2)
        };
        assert_eq!(pinned.n_b(), 5000);
        assert_eq!(pinned.sub_size(), 2);
    }
}
