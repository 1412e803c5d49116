// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/geo/projection.rs - 坐标参考系与重投影
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

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use thiserror::Error;

pub const EPSG_WGS84: u16 = 4326;
pub const EPSG_ETRS89: u16 = 4258;
pub const EPSG_GDA94: u16 = 4283;
pub const EPSG_WEB_MERCATOR: u16 = 3857;

/// 以 EPSG 编码标识的坐标参考系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(pub u16);

impl Crs {
  pub const WGS84: Crs = Crs(EPSG_WGS84);

  pub fn epsg(&self) -> u16 {
    self.0
  }

  /// 地理坐标系（单位为度）
  pub fn is_geographic(&self) -> bool {
    matches!(self.0, EPSG_WGS84 | EPSG_ETRS89 | EPSG_GDA94)
  }

  pub fn proj_string(&self) -> Option<String> {
    get_proj_string(self.0)
  }
}

impl fmt::Display for Crs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "EPSG:{}", self.0)
  }
}

/// 支持的 EPSG 编码对应的 proj 字符串
///
/// 只收录哨兵二号产品常见的坐标系：WGS84 / UTM 各带、GDA94 / MGA 各带，以及 Web 墨卡托。
pub fn get_proj_string(epsg: u16) -> Option<String> {
  match epsg {
    EPSG_WGS84 => Some("+proj=longlat +datum=WGS84 +no_defs".to_string()),
    EPSG_ETRS89 | EPSG_GDA94 => Some("+proj=longlat +ellps=GRS80 +no_defs".to_string()),
    EPSG_WEB_MERCATOR => Some(
      "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
        .to_string(),
    ),
    32601..=32660 => Some(format!(
      "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
      epsg - 32600
    )),
    32701..=32760 => Some(format!(
      "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
      epsg - 32700
    )),
    28348..=28358 => Some(format!(
      "+proj=utm +zone={} +south +ellps=GRS80 +units=m +no_defs",
      epsg - 28300
    )),
    _ => None,
  }
}

#[derive(Error, Debug)]
pub enum ProjectionError {
  #[error("不支持的坐标参考系: {0}")]
  UnsupportedCrs(Crs),
  #[error("无效的投影定义 {0}: {1}")]
  InvalidProjection(Crs, String),
  #[error("坐标转换失败: {0}")]
  TransformFailed(String),
}

/// 两个坐标参考系之间的点转换器（proj4rs，纯 Rust 实现）
pub struct CoordTransformer {
  source: Crs,
  target: Crs,
  projs: Option<(Proj, Proj)>,
}

impl fmt::Debug for CoordTransformer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoordTransformer")
      .field("source", &self.source)
      .field("target", &self.target)
      .finish_non_exhaustive()
  }
}

impl CoordTransformer {
  pub fn new(source: Crs, target: Crs) -> Result<Self, ProjectionError> {
    if source == target {
      return Ok(Self {
        source,
        target,
        projs: None,
      });
    }

    let build = |crs: Crs| -> Result<Proj, ProjectionError> {
      let definition = crs
        .proj_string()
        .ok_or(ProjectionError::UnsupportedCrs(crs))?;
      Proj::from_proj_string(&definition)
        .map_err(|e| ProjectionError::InvalidProjection(crs, format!("{e:?}")))
    };

    Ok(Self {
      source,
      target,
      projs: Some((build(source)?, build(target)?)),
    })
  }

  /// 转换到 EPSG:4326 经纬度
  pub fn to_lonlat_from(source: Crs) -> Result<Self, ProjectionError> {
    Self::new(source, Crs::WGS84)
  }

  pub fn source(&self) -> Crs {
    self.source
  }

  pub fn target(&self) -> Crs {
    self.target
  }

  pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
    let Some((source_proj, target_proj)) = &self.projs else {
      return Ok((x, y));
    };

    // proj4rs 的地理坐标以弧度表示
    let mut point = if self.source.is_geographic() {
      (x.to_radians(), y.to_radians(), 0.0)
    } else {
      (x, y, 0.0)
    };

    transform(source_proj, target_proj, &mut point)
      .map_err(|e| ProjectionError::TransformFailed(format!("{e:?}")))?;

    if self.target.is_geographic() {
      Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
      Ok((point.0, point.1))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn utm_zone_strings_cover_both_hemispheres() {
    assert_eq!(
      get_proj_string(32633).as_deref(),
      Some("+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs")
    );
    assert_eq!(
      get_proj_string(32754).as_deref(),
      Some("+proj=utm +zone=54 +south +datum=WGS84 +units=m +no_defs")
    );
    assert!(get_proj_string(2193).is_none());
  }

  #[test]
  fn identity_transform_returns_input() {
    let transformer = CoordTransformer::new(Crs::WGS84, Crs::WGS84).unwrap();
    assert_eq!(transformer.transform(141.0, -35.2).unwrap(), (141.0, -35.2));
  }

  #[test]
  fn utm_central_meridian_on_equator() {
    let transformer = CoordTransformer::to_lonlat_from(Crs(32633)).unwrap();
    let (lon, lat) = transformer.transform(500000.0, 0.0).unwrap();
    assert!((lon - 15.0).abs() < 1e-6, "lon = {lon}");
    assert!(lat.abs() < 1e-6, "lat = {lat}");

    let transformer = CoordTransformer::to_lonlat_from(Crs(32754)).unwrap();
    let (lon, lat) = transformer.transform(500000.0, 10000000.0).unwrap();
    assert!((lon - 141.0).abs() < 1e-6, "lon = {lon}");
    assert!(lat.abs() < 1e-6, "lat = {lat}");
  }

  #[test]
  fn southern_utm_point_lands_in_australia() {
    let transformer = CoordTransformer::to_lonlat_from(Crs(32754)).unwrap();
    let (lon, lat) = transformer.transform(500000.0, 6100000.0).unwrap();
    assert!((lon - 141.0).abs() < 1e-6);
    assert!(lat < -35.0 && lat > -35.5, "lat = {lat}");
  }

  #[test]
  fn unsupported_crs_is_rejected() {
    let err = CoordTransformer::to_lonlat_from(Crs(2193)).unwrap_err();
    assert!(matches!(err, ProjectionError::UnsupportedCrs(Crs(2193))));
  }
}
