use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use ndarray::prelude::*;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::transforms::Normalize;
use super::{BatchStream, Loader, Phase};

const N_TRAIN: usize = 50_000;
const N_VAL: usize = 10_000;
const N_TEST: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnistParams {
    /// directory holding the IDX files, optionally gzipped
    pub path: PathBuf,
    pub batch_size: usize,
    pub n_a: usize,
    /// cutout mask side length for the train stream, 0 disables it
    pub cutout: usize,
}

fn open_idx(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let plain = dir.join(name);
    if plain.exists() {
        return std::fs::read(&plain).with_context(|| format!("failed to read {:?}", plain));
    }
    let gz = dir.join(format!("{name}.gz"));
    let file = std::fs::File::open(&gz)
        .with_context(|| format!("missing MNIST file {:?} (or {:?})", plain, gz))?;
    let mut out = Vec::new();
    flate2::bufread::GzDecoder::new(std::io::BufReader::new(file))
        .read_to_end(&mut out)
        .with_context(|| format!("failed to extract {:?}", gz))?;
    Ok(out)
}

/// IDX image file -> [N, 1, rows, cols] floats in [0, 1].
fn read_images(dir: &Path, name: &str) -> Result<Array4<f32>> {
    let buf = open_idx(dir, name)?;
    let mut r = &buf[..];
    let magic = r.read_u32::<BigEndian>()?;
    if magic != 0x0803 {
        return Err(Error::msg(format!("{name}: bad image magic {magic:#x}")));
    }
    let n = r.read_u32::<BigEndian>()? as usize;
    let rows = r.read_u32::<BigEndian>()? as usize;
    let cols = r.read_u32::<BigEndian>()? as usize;
    if r.len() < n * rows * cols {
        return Err(Error::msg(format!("{name}: truncated image data")));
    }
    let data = r[..n * rows * cols]
        .iter()
        .map(|&b| b as f32 / 255.0)
        .collect();
    Ok(Array4::from_shape_vec((n, 1, rows, cols), data)?)
}

fn read_labels(dir: &Path, name: &str) -> Result<Vec<u32>> {
    let buf = open_idx(dir, name)?;
    let mut r = &buf[..];
    let magic = r.read_u32::<BigEndian>()?;
    if magic != 0x0801 {
        return Err(Error::msg(format!("{name}: bad label magic {magic:#x}")));
    }
    let n = r.read_u32::<BigEndian>()? as usize;
    if r.len() < n {
        return Err(Error::msg(format!("{name}: truncated label data")));
    }
    Ok(r[..n].iter().map(|&b| b as u32).collect())
}

/// MNIST with the 50000/10000 train/val split off the training files.
/// Train traversal is block-sequential so weight table row i stays glued to
/// example i; the val order is reshuffled on every load.
pub struct MnistLoader {
    train_images: Array4<f32>,
    train_labels: Vec<u32>,
    test_images: Array4<f32>,
    test_labels: Vec<u32>,
    batch_size: usize,
    cutout: usize,
    n_a: usize,
    n_b: usize,
    sub_size: usize,
}

impl MnistLoader {
    pub fn new(params: &MnistParams) -> Result<MnistLoader> {
        if params.batch_size == 0 {
            return Err(Error::msg("batch size cannot be zero"));
        }
        let dir = &params.path;
        let mut train_images = read_images(dir, "train-images-idx3-ubyte")?;
        let train_labels = read_labels(dir, "train-labels-idx1-ubyte")?;
        let mut test_images = read_images(dir, "t10k-images-idx3-ubyte")?;
        let test_labels = read_labels(dir, "t10k-labels-idx1-ubyte")?;
        if train_labels.len() != N_TRAIN + N_VAL || test_labels.len() != N_TEST {
            return Err(Error::msg(format!(
                "unexpected MNIST sizes: {} train, {} test",
                train_labels.len(),
                test_labels.len()
            )));
        }

        let norm = Normalize::mnist();
        norm.apply(&mut train_images);
        norm.apply(&mut test_images);

        let n_a = params.n_a;
        let n_b = N_TRAIN / n_a;
        let sub_size = (500 * n_a / N_TRAIN).max(1);

        Ok(MnistLoader {
            train_images,
            train_labels,
            test_images,
            test_labels,
            batch_size: params.batch_size,
            cutout: params.cutout,
            n_a,
            n_b,
            sub_size,
        })
    }
}

impl Loader for MnistLoader {
    fn load(&self, phase: Phase) -> BatchStream<'_> {
        match phase {
            Phase::Train => BatchStream::new(
                &self.train_images,
                &self.train_labels,
                (0..N_TRAIN).collect(),
                self.batch_size,
                (self.cutout > 0).then_some(self.cutout),
            ),
            Phase::Val => {
                let mut order: Vec<usize> = (N_TRAIN..N_TRAIN + N_VAL).collect();
                order.shuffle(&mut rand::thread_rng());
                BatchStream::new(
                    &self.train_images,
                    &self.train_labels,
                    order,
                    self.batch_size,
                    None,
                )
            }
            Phase::Test => BatchStream::new(
                &self.test_images,
                &self.test_labels,
                (0..N_TEST).collect(),
                self.batch_size,
                None,
            ),
        }
    }

    fn len(&self, phase: Phase) -> usize {
        match phase {
            Phase::Train => N_TRAIN,
            Phase::Val => N_VAL,
            Phase::Test => N_TEST,
        }
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
        N_TEST
    }
}
