use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::prelude::*;
use ndarray::Dimension;

use crate::gbs::WeightTable;
use crate::models::GbsConvNet;

const MAGIC: u32 = 0x4742_5331; // "GBS1"

pub fn write_arr<D: Dimension>(w: &mut dyn Write, a: &Array<f32, D>) -> std::io::Result<()> {
    for &v in a.iter() {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_arr<D: Dimension>(r: &mut dyn Read, a: &mut Array<f32, D>) -> std::io::Result<()> {
    for v in a.iter_mut() {
        *v = r.read_f32::<LittleEndian>()?;
    }
    Ok(())
}

/// Best-checkpoint bundle: epoch, validation accuracy, model parameters with
/// running statistics, and the full weight table snapshot. Shapes are implied
/// by the run configuration, only the alpha dimensions are framed explicitly.
pub fn save(
    path: &Path,
    epoch: usize,
    acc: f32,
    model: &GbsConvNet,
    table: &WeightTable,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u64::<LittleEndian>(epoch as u64)?;
    w.write_f32::<LittleEndian>(acc)?;
    let alpha = table.alpha();
    w.write_u64::<LittleEndian>(alpha.nrows() as u64)?;
    w.write_u64::<LittleEndian>(alpha.ncols() as u64)?;
    write_arr(&mut w, alpha)?;
    model.write_state(&mut w)?;
    w.flush()?;
    Ok(())
}

/// Restores into an existing model/table of the right architecture.
/// Returns (epoch, acc).
pub fn load(path: &Path, model: &mut GbsConvNet, table: &mut WeightTable) -> Result<(usize, f32)> {
    let file = File::open(path).with_context(|| format!("failed to open checkpoint {:?}", path))?;
    let mut r = BufReader::new(file);
    let magic = r.read_u32::<LittleEndian>()?;
    anyhow::ensure!(magic == MAGIC, "{:?} is not a gbsnet checkpoint", path);
    let epoch = r.read_u64::<LittleEndian>()? as usize;
    let acc = r.read_f32::<LittleEndian>()?;
    let rows = r.read_u64::<LittleEndian>()? as usize;
    let cols = r.read_u64::<LittleEndian>()? as usize;
    anyhow::ensure!(
        table.alpha().dim() == (rows, cols),
        "checkpoint alpha is [{rows}, {cols}], run expects {:?}",
        table.alpha().dim()
    );
    read_arr(&mut r, table.alpha_mut())?;
    model.read_state(&mut r)?;
    Ok((epoch, acc))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_preserves_forward() {
        let dir = std::env::temp_dir().join("gbsnet_ckpt_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("best.ckpt");

        let mut model = GbsConvNet::new(1, 4, 6, 3, true);
        let mut table = WeightTable::new(6, 5, 2, 2);
        table.alpha_mut()[[3, 4]] = 9.5;

        let x = Array4::from_shape_fn((2, 1, 8, 8), |(b, _, i, j)| {
            ((b + i * j) as f32 * 0.13).sin()
        });
        let alpha = Array2::ones((2, 6));
        let (before, _) = model.forward_t(&x, &alpha, 1.0, false);

        save(&path, 7, 0.83, &model, &table).unwrap();

        let mut restored = GbsConvNet::new(1, 4, 6, 3, true);
        let mut rtable = WeightTable::new(6, 5, 2, 2);
        let (epoch, acc) = load(&path, &mut restored, &mut rtable).unwrap();
        assert_eq!(epoch, 7);
        assert!((acc - 0.83).abs() < 1e-6);
        assert_eq!(rtable.alpha()[[3, 4]], 9.5);

        let (after, _) = restored.forward_t(&x, &alpha, 1.0, false);
        assert!(crate::nn::isclose(&before, &after));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = std::env::temp_dir().join("gbsnet_ckpt_bad_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("junk.ckpt");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let mut model = GbsConvNet::new(1, 4, 6, 3, true);
        let mut table = WeightTable::new(6, 5, 2, 2);
        assert!(load(&path, &mut model, &mut table).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
