// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/output/csv_record.rs - 逐像素 CSV 记录
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::{
  model::ClassMap,
  output::{Render, output_path},
  tensor::PreparedTile,
};

pub const CSV_HEADER: [&str; 3] = ["Latitude", "Longitude", "Class"];

#[derive(Error, Debug)]
pub enum CsvRecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("CSV 错误: {0}")]
  CsvError(#[from] csv::Error),
}

/// 写出 `output_data_<stem>.csv`
///
/// 坐标直接用像素的整数 (col, row) 经仿射变换得到，不做像素中心偏移。
pub struct CsvRecordOutput {
  directory: PathBuf,
}

impl CsvRecordOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn file_name(stem: &str) -> String {
    format!("output_data_{stem}.csv")
  }
}

impl Render<PreparedTile, ClassMap> for CsvRecordOutput {
  type Error = CsvRecordError;

  fn render_result(&self, tile: &PreparedTile, classes: &ClassMap) -> Result<(), Self::Error> {
    let path = output_path(&self.directory, Self::file_name(&tile.stem()))?;
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(CSV_HEADER)?;

    let transform = &tile.raster.transform;
    for ((row, col), class) in classes.indexed_iter() {
      let (x, y) = transform.apply(col as f64, row as f64);
      writer.serialize((x, y, *class))?;
    }
    writer.flush()?;

    info!("CSV 已写入 {} ({} 行)", path.display(), classes.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geo::{Crs, GeoTransform};
  use crate::raster::GeoRaster;
  use crate::tensor::TensorBatch;
  use ndarray::{Array3, array};

  fn tile(height: usize, width: usize) -> PreparedTile {
    let raster = GeoRaster::new(
      Array3::from_elem((1, height, width), 3.0),
      GeoTransform::north_up(500000.0, 6100000.0, 10.0, 10.0),
      Some(Crs(32754)),
    );
    let tensor = TensorBatch::from_bands(&raster.bands).unwrap();
    PreparedTile {
      path: PathBuf::from("patches/tile_07.tif"),
      raster,
      tensor,
    }
  }

  #[test]
  fn rows_follow_row_major_order_with_native_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let output = CsvRecordOutput::new(dir.path());
    let classes = array![[1u8, 2], [3, 255]];

    output.render_result(&tile(2, 2), &classes).unwrap();

    let mut reader = csv::Reader::from_path(dir.path().join("output_data_tile_07.csv")).unwrap();
    assert_eq!(reader.headers().unwrap(), &csv::StringRecord::from(CSV_HEADER.to_vec()));
    let rows: Vec<(f64, f64, u8)> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(
      rows,
      vec![
        (500000.0, 6100000.0, 1),
        (500010.0, 6100000.0, 2),
        (500000.0, 6099990.0, 3),
        (500010.0, 6099990.0, 255),
      ]
    );
  }
}
