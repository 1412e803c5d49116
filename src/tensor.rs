// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/tensor.rs - 瓦片到 NCHW 张量的预处理
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

use ndarray::{Array3, Array4, ArrayView2, Axis, s};
use thiserror::Error;
use tracing::debug;

use crate::geo::GeoTransform;
use crate::raster::{GeoRaster, RasterError};

/// 模型固定的输入边长
pub const TILE_SIZE: usize = 224;

/// 逐通道归一化时加在最大值上的小量
pub const NORMALIZE_EPSILON: f32 = 1e-5;

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("读取瓦片失败: {0}")]
  Raster(#[from] RasterError),
  #[error("Shape error: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("无法判断瓦片 {height}x{width} 位于镶嵌图的哪条边")]
  ShapeResolution { height: usize, width: usize },
}

/// 四个名义角点是否落在瓦片范围内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CornerCoverage {
  pub top_left: bool,
  pub top_right: bool,
  pub bottom_left: bool,
  pub bottom_right: bool,
}

impl CornerCoverage {
  /// 以显式边界检查 `nominal x nominal` 瓦片的四个角点
  pub fn of(height: usize, width: usize, nominal: usize) -> Self {
    let last = nominal.saturating_sub(1);
    let valid = |row: usize, col: usize| row < height && col < width;
    Self {
      top_left: valid(0, 0),
      top_right: valid(0, last),
      bottom_left: valid(last, 0),
      bottom_right: valid(last, last),
    }
  }

  fn count(&self) -> usize {
    [
      self.top_left,
      self.top_right,
      self.bottom_left,
      self.bottom_right,
    ]
    .into_iter()
    .filter(|&v| v)
    .count()
  }
}

/// 四周补零的像素数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Padding {
  pub top: usize,
  pub bottom: usize,
  pub left: usize,
  pub right: usize,
}

impl Padding {
  pub fn is_none(&self) -> bool {
    *self == Self::default()
  }

  /// 根据角点有效性推断瓦片所在的镶嵌边并决定补零方向
  pub fn resolve(height: usize, width: usize, nominal: usize) -> Result<Self, TensorError> {
    let unresolved = TensorError::ShapeResolution { height, width };
    if height == 0 || width == 0 || height > nominal || width > nominal {
      return Err(unresolved);
    }

    let rows = nominal - height;
    let cols = nominal - width;
    let corners = CornerCoverage::of(height, width, nominal);
    let CornerCoverage {
      top_left: tl,
      top_right: tr,
      bottom_left: bl,
      bottom_right: br,
    } = corners;

    let padding = match corners.count() {
      4 => Self::default(),
      2 if bl && br => Self {
        top: rows,
        ..Self::default()
      },
      2 if tl && tr => Self {
        bottom: rows,
        ..Self::default()
      },
      2 if tr && br => Self {
        left: cols,
        ..Self::default()
      },
      2 if tl && bl => Self {
        right: cols,
        ..Self::default()
      },
      1 if tl => Self {
        bottom: rows,
        right: cols,
        ..Self::default()
      },
      1 if tr => Self {
        bottom: rows,
        left: cols,
        ..Self::default()
      },
      1 if bl => Self {
        top: rows,
        right: cols,
        ..Self::default()
      },
      1 if br => Self {
        top: rows,
        left: cols,
        ..Self::default()
      },
      _ => return Err(unresolved),
    };

    if padding.top + padding.bottom != rows || padding.left + padding.right != cols {
      return Err(unresolved);
    }
    Ok(padding)
  }

  /// 裁掉补零区域，恢复到原始瓦片的形状
  pub fn crop<'a, T>(&self, padded: ArrayView2<'a, T>) -> ArrayView2<'a, T> {
    let (height, width) = padded.dim();
    padded.slice_move(s![
      self.top..height.saturating_sub(self.bottom),
      self.left..width.saturating_sub(self.right)
    ])
  }
}

/// 批大小为 1 的 NCHW 张量，以及补零记录
#[derive(Debug, Clone)]
pub struct TensorBatch {
  pub data: Array4<f32>,
  pub padding: Padding,
}

impl TensorBatch {
  /// 归一化、增加批维度，并在边缘瓦片上补零到 `TILE_SIZE x TILE_SIZE`
  pub fn from_bands(bands: &Array3<f32>) -> Result<Self, TensorError> {
    let mut normalized = bands.clone();
    normalize_channels(&mut normalized);

    let (channels, height, width) = normalized.dim();
    let padding = Padding::resolve(height, width, TILE_SIZE)?;
    let data = if padding.is_none() {
      normalized.insert_axis(Axis(0))
    } else {
      debug!("边缘瓦片 {}x{} 补零: {:?}", height, width, padding);
      let mut padded = Array4::<f32>::zeros((1, channels, TILE_SIZE, TILE_SIZE));
      padded
        .slice_mut(s![
          0,
          ..,
          padding.top..padding.top + height,
          padding.left..padding.left + width
        ])
        .assign(&normalized);
      padded
    };

    Ok(Self { data, padding })
  }

  pub fn shape(&self) -> (usize, usize, usize, usize) {
    self.data.dim()
  }
}

/// 每个通道除以自身最大值加上 `NORMALIZE_EPSILON`
pub fn normalize_channels(bands: &mut Array3<f32>) {
  for mut channel in bands.axis_iter_mut(Axis(0)) {
    let max = channel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let divisor = max + NORMALIZE_EPSILON;
    channel.mapv_inplace(|v| v / divisor);
  }
}

/// 读入瓦片并生成模型输入张量与其仿射变换
pub fn prepare_tensor(tile_path: impl AsRef<Path>) -> Result<(TensorBatch, GeoTransform), TensorError> {
  let tile = PreparedTile::load(tile_path)?;
  Ok((tile.tensor, tile.raster.transform))
}

/// 预处理后的瓦片：保留原始栅格以便导出
#[derive(Debug, Clone)]
pub struct PreparedTile {
  pub path: PathBuf,
  pub raster: GeoRaster,
  pub tensor: TensorBatch,
}

impl PreparedTile {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, TensorError> {
    let path = path.as_ref().to_path_buf();
    let raster = GeoRaster::open(&path)?;
    let tensor = TensorBatch::from_bands(&raster.bands)?;
    Ok(Self {
      path,
      raster,
      tensor,
    })
  }

  /// 文件名，如 `tile_01.tif`
  pub fn name(&self) -> String {
    self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default()
  }

  /// 去掉扩展名的文件名，如 `tile_01`
  pub fn stem(&self) -> String {
    self
      .path
      .file_stem()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}
