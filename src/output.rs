// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/output.rs - 输出定义
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
use tracing::debug;

use crate::config::JobConfig;
use crate::model::ClassMap;
use crate::tensor::PreparedTile;

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod csv_record;
pub use self::csv_record::{CsvRecordError, CsvRecordOutput};

mod geotiff_output;
pub use self::geotiff_output::{GeoTiffOutput, GeoTiffOutputError};

#[cfg(feature = "save_image_file")]
mod class_map_image;
#[cfg(feature = "save_image_file")]
pub use self::class_map_image::{ClassMapImageError, ClassMapImageOutput};

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("CSV 输出错误: {0}")]
  CsvRecord(#[from] CsvRecordError),
  #[error("GeoTIFF 输出错误: {0}")]
  GeoTiff(#[from] GeoTiffOutputError),
  #[cfg(feature = "save_image_file")]
  #[error("类别图输出错误: {0}")]
  ClassMapImage(#[from] ClassMapImageError),
  #[error("类别图尺寸 {actual:?} 与瓦片 {expected:?} 不一致")]
  ShapeMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
}

/// 单个瓦片的全部导出：CSV、带类别波段的 GeoTIFF，以及可选的类别图预览
pub struct TileExporter {
  csv: CsvRecordOutput,
  geotiff: GeoTiffOutput,
  #[cfg(feature = "save_image_file")]
  preview: Option<ClassMapImageOutput>,
}

impl TileExporter {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    let directory = directory.as_ref();
    Self {
      csv: CsvRecordOutput::new(directory),
      geotiff: GeoTiffOutput::new(directory),
      #[cfg(feature = "save_image_file")]
      preview: None,
    }
  }

  pub fn from_config(config: &JobConfig) -> Self {
    let exporter = Self::new(&config.output_dir);
    exporter.with_preview(config.class_map_preview)
  }

  #[cfg(feature = "save_image_file")]
  pub fn with_preview(mut self, enabled: bool) -> Self {
    self.preview = enabled.then(|| ClassMapImageOutput::new(self.csv.directory()));
    self
  }

  #[cfg(not(feature = "save_image_file"))]
  pub fn with_preview(self, enabled: bool) -> Self {
    if enabled {
      tracing::warn!("未启用 save_image_file 特性，忽略类别图预览");
    }
    self
  }

  pub fn directory(&self) -> &Path {
    self.csv.directory()
  }
}

impl Render<PreparedTile, ClassMap> for TileExporter {
  type Error = ExportError;

  fn render_result(&self, tile: &PreparedTile, classes: &ClassMap) -> Result<(), Self::Error> {
    let expected = (tile.raster.height(), tile.raster.width());
    if classes.dim() != expected {
      return Err(ExportError::ShapeMismatch {
        expected,
        actual: classes.dim(),
      });
    }

    self.csv.render_result(tile, classes)?;
    self.geotiff.render_result(tile, classes)?;
    #[cfg(feature = "save_image_file")]
    if let Some(preview) = &self.preview {
      preview.render_result(tile, classes)?;
    }

    debug!("瓦片 {} 导出完成", tile.name());
    Ok(())
  }
}

/// 确保输出目录存在并返回目标文件路径
fn output_path(directory: &Path, file_name: String) -> std::io::Result<PathBuf> {
  if !directory.as_os_str().is_empty() {
    std::fs::create_dir_all(directory)?;
  }
  Ok(directory.join(file_name))
}
