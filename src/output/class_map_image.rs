// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/output/class_map_image.rs - 类别图彩色预览
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

use image::{Rgb, RgbImage};
use thiserror::Error;
use tracing::warn;

use crate::{
  label::{LandCover, WithLabel},
  model::ClassMap,
  output::{Render, output_path},
  tensor::PreparedTile,
};

const UNMAPPED_COLOR: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug)]
pub enum ClassMapImageError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 按饼图配色把类别图保存为 `class_map_<stem>.png`
pub struct ClassMapImageOutput {
  directory: PathBuf,
}

impl ClassMapImageOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  pub fn file_name(stem: &str) -> String {
    format!("class_map_{stem}.png")
  }
}

pub fn colorize(classes: &ClassMap) -> RgbImage {
  let (height, width) = classes.dim();
  RgbImage::from_fn(width as u32, height as u32, |x, y| {
    let id = classes[[y as usize, x as usize]];
    let color = LandCover::from_label_id(id as u32)
      .map(|label| label.color())
      .unwrap_or(UNMAPPED_COLOR);
    Rgb(color)
  })
}

impl Render<PreparedTile, ClassMap> for ClassMapImageOutput {
  type Error = ClassMapImageError;

  fn render_result(&self, tile: &PreparedTile, classes: &ClassMap) -> Result<(), Self::Error> {
    let path = output_path(&self.directory, Self::file_name(&tile.stem()))?;
    colorize(classes).save(&path)?;
    warn!("保存类别图到文件: {}", path.display());
    Ok(())
  }
}
