// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/output/geotiff_output.rs - 追加类别波段的 GeoTIFF 输出
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
  raster::RasterError,
  tensor::PreparedTile,
};

#[derive(Error, Debug)]
pub enum GeoTiffOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("栅格写入错误: {0}")]
  RasterError(#[from] RasterError),
}

/// 写出 `output_patch_<tile_name>`，原始波段在前，类别波段在最后
pub struct GeoTiffOutput {
  directory: PathBuf,
}

impl GeoTiffOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  pub fn file_name(tile_name: &str) -> String {
    format!("output_patch_{tile_name}")
  }
}

impl Render<PreparedTile, ClassMap> for GeoTiffOutput {
  type Error = GeoTiffOutputError;

  fn render_result(&self, tile: &PreparedTile, classes: &ClassMap) -> Result<(), Self::Error> {
    let path = output_path(&self.directory, Self::file_name(&tile.name()))?;
    tile.raster.save_with_class_band(&path, classes.view())?;
    info!(
      "GeoTIFF 已写入 {} ({} 个波段)",
      path.display(),
      tile.raster.channels() + 1
    );
    Ok(())
  }
}
