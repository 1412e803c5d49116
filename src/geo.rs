// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/geo.rs - 仿射变换与地理范围
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

use serde::{Deserialize, Serialize};

/// 像素 (col, row) 到地理坐标 (x, y) 的仿射变换
///
/// 系数排列与 GDAL/rasterio 的 `Affine` 一致：
/// `x = a * col + b * row + c`，`y = d * col + e * row + f`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
  pub a: f64,
  pub b: f64,
  pub c: f64,
  pub d: f64,
  pub e: f64,
  pub f: f64,
}

impl GeoTransform {
  /// 北向上的栅格：左上角原点与像素大小
  pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
    Self {
      a: pixel_width,
      b: 0.0,
      c: origin_x,
      d: 0.0,
      e: -pixel_height,
      f: origin_y,
    }
  }

  /// 由 GeoTIFF 的 ModelPixelScale 与 ModelTiepoint 标签构造
  pub fn from_scale_and_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
    if scale.len() < 2 || tiepoint.len() < 6 {
      return None;
    }
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let (sx, sy) = (scale[0], scale[1]);
    Some(Self {
      a: sx,
      b: 0.0,
      c: x - i * sx,
      d: 0.0,
      e: -sy,
      f: y + j * sy,
    })
  }

  /// 由 GeoTIFF 的 ModelTransformation（4x4 行主序矩阵）构造
  pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
    if matrix.len() < 16 {
      return None;
    }
    Some(Self {
      a: matrix[0],
      b: matrix[1],
      c: matrix[3],
      d: matrix[4],
      e: matrix[5],
      f: matrix[7],
    })
  }

  pub fn to_model_transformation(&self) -> [f64; 16] {
    [
      self.a, self.b, 0.0, self.c, //
      self.d, self.e, 0.0, self.f, //
      0.0, 0.0, 0.0, 0.0, //
      0.0, 0.0, 0.0, 1.0,
    ]
  }

  pub fn is_north_up(&self) -> bool {
    self.b == 0.0 && self.d == 0.0 && self.e < 0.0
  }

  /// 对像素索引直接应用变换（不做像元中心偏移）
  pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
    (
      self.a * col + self.b * row + self.c,
      self.d * col + self.e * row + self.f,
    )
  }

  /// 像素 (0, 0) 对应的地理坐标
  pub fn origin(&self) -> (f64, f64) {
    self.apply(0.0, 0.0)
  }
}

/// 经纬度坐标（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
  pub lon: f64,
  pub lat: f64,
}

impl LonLat {
  pub fn new(lon: f64, lat: f64) -> Self {
    Self { lon, lat }
  }
}

impl From<(f64, f64)> for LonLat {
  fn from((lon, lat): (f64, f64)) -> Self {
    Self { lon, lat }
  }
}

/// 由东北角与西南角确定的闭区间范围
///
/// 不校验 `south_west` 是否确实位于 `north_east` 的西南方向，由调用方保证。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub north_east: LonLat,
  pub south_west: LonLat,
}

impl BoundingBox {
  pub fn new(north_east: impl Into<LonLat>, south_west: impl Into<LonLat>) -> Self {
    Self {
      north_east: north_east.into(),
      south_west: south_west.into(),
    }
  }

  pub fn contains(&self, point: &LonLat) -> bool {
    self.south_west.lon <= point.lon
      && point.lon <= self.north_east.lon
      && self.south_west.lat <= point.lat
      && point.lat <= self.north_east.lat
  }
}

pub mod projection;
pub use self::projection::{CoordTransformer, Crs, ProjectionError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tiepoint_and_scale_give_north_up_transform() {
    let transform =
      GeoTransform::from_scale_and_tiepoint(&[10.0, 10.0, 0.0], &[0.0, 0.0, 0.0, 500000.0, 6100000.0, 0.0])
        .unwrap();
    assert_eq!(transform, GeoTransform::north_up(500000.0, 6100000.0, 10.0, 10.0));
    assert!(transform.is_north_up());
    assert_eq!(transform.apply(3.0, 2.0), (500030.0, 6099980.0));
  }

  #[test]
  fn tiepoint_off_origin_is_shifted_back_to_pixel_zero() {
    let transform =
      GeoTransform::from_scale_and_tiepoint(&[2.0, 2.0], &[5.0, 4.0, 0.0, 110.0, 92.0, 0.0]).unwrap();
    assert_eq!(transform.origin(), (100.0, 100.0));
  }

  #[test]
  fn model_transformation_keeps_rotation_terms() {
    let source = GeoTransform {
      a: 10.0,
      b: 0.5,
      c: 1000.0,
      d: -0.5,
      e: -10.0,
      f: 2000.0,
    };
    let restored = GeoTransform::from_model_transformation(&source.to_model_transformation()).unwrap();
    assert_eq!(restored, source);
    assert!(!restored.is_north_up());
  }

  #[test]
  fn bounding_box_is_closed_on_every_edge() {
    let bbox = BoundingBox::new((141.0245, -35.2229), (140.9751, -35.2633));
    assert!(bbox.contains(&LonLat::new(141.0245, -35.2229)));
    assert!(bbox.contains(&LonLat::new(140.9751, -35.2633)));
    assert!(bbox.contains(&LonLat::new(141.0, -35.25)));
    assert!(!bbox.contains(&LonLat::new(141.0246, -35.25)));
    assert!(!bbox.contains(&LonLat::new(141.0, -35.2634)));
  }
}
