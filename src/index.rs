// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/index.rs - 按经纬度范围检索瓦片
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

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::geo::{BoundingBox, CoordTransformer, Crs, LonLat, ProjectionError};
use crate::raster::{RasterError, read_metadata};

/// 单个瓦片的空间元数据问题；只跳过该瓦片，扫描继续
#[derive(Error, Debug)]
pub enum SpatialMetadataError {
  #[error("无法读取栅格元数据: {0}")]
  Raster(#[from] RasterError),
  #[error("缺少坐标参考系")]
  MissingCrs,
  #[error("缺少仿射变换")]
  MissingTransform,
  #[error("重投影失败: {0}")]
  Projection(#[from] ProjectionError),
}

#[derive(Error, Debug)]
pub enum IndexError {
  #[error("无法列出目录 {path}: {source}")]
  ReadDir {
    path: PathBuf,
    source: std::io::Error,
  },
}

fn is_raster_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
    .unwrap_or(false)
}

/// 按 CRS 缓存到 WGS84 的转换器
#[derive(Debug, Default)]
struct TransformerCache {
  transformers: HashMap<Crs, CoordTransformer>,
}

impl TransformerCache {
  fn get(&mut self, crs: Crs) -> Result<&CoordTransformer, ProjectionError> {
    if !self.transformers.contains_key(&crs) {
      let transformer = CoordTransformer::to_lonlat_from(crs)?;
      self.transformers.insert(crs, transformer);
    }
    self
      .transformers
      .get(&crs)
      .ok_or(ProjectionError::UnsupportedCrs(crs))
  }
}

/// 计算瓦片像素原点 (0, 0) 在 WGS84 下的经纬度
pub fn tile_origin_lonlat(path: impl AsRef<Path>) -> Result<LonLat, SpatialMetadataError> {
  tile_origin_with(path.as_ref(), &mut TransformerCache::default())
}

fn tile_origin_with(
  path: &Path,
  cache: &mut TransformerCache,
) -> Result<LonLat, SpatialMetadataError> {
  let metadata = read_metadata(path)?;
  let crs = metadata.crs.ok_or(SpatialMetadataError::MissingCrs)?;
  let transform = metadata
    .transform
    .ok_or(SpatialMetadataError::MissingTransform)?;

  let (x, y) = transform.apply(0.0, 0.0);
  let (lon, lat) = cache.get(crs)?.transform(x, y)?;
  Ok(LonLat::new(lon, lat))
}

/// 返回像素原点经重投影后落在闭区间范围内的瓦片文件名
///
/// 顺序与目录遍历顺序一致。
pub fn find_tiles_in_bbox(
  north_east: LonLat,
  south_west: LonLat,
  folder: impl AsRef<Path>,
) -> Result<Vec<String>, IndexError> {
  let folder = folder.as_ref();
  let bbox = BoundingBox::new(north_east, south_west);
  let entries = std::fs::read_dir(folder).map_err(|source| IndexError::ReadDir {
    path: folder.to_path_buf(),
    source,
  })?;

  let mut cache = TransformerCache::default();
  let mut selected = Vec::new();
  for entry in entries {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!("跳过无法读取的目录项: {}", e);
        continue;
      }
    };
    let path = entry.path();
    if !path.is_file() || !is_raster_file(&path) {
      continue;
    }
    let name = entry.file_name().to_string_lossy().into_owned();

    match tile_origin_with(&path, &mut cache) {
      Ok(origin) if bbox.contains(&origin) => {
        debug!("瓦片 {} 原点 ({:.6}, {:.6}) 在范围内", name, origin.lon, origin.lat);
        selected.push(name);
      }
      Ok(_) => {}
      Err(e) => warn!("跳过瓦片 {}: {}", name, e),
    }
  }

  info!("在 {} 中找到 {} 个瓦片", folder.display(), selected.len());
  Ok(selected)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geo::GeoTransform;
  use crate::raster::GeoRaster;
  use ndarray::Array3;

  fn write_tile(dir: &Path, name: &str, transform: GeoTransform, crs: Option<Crs>) {
    GeoRaster::new(Array3::from_elem((1, 4, 4), 1.0), transform, crs)
      .save(dir.join(name))
      .unwrap();
  }

  #[test]
  fn geographic_tiles_inside_closed_box_are_selected() {
    let dir = tempfile::tempdir().unwrap();
    let step = 0.0001;
    write_tile(
      dir.path(),
      "inside.tif",
      GeoTransform::north_up(10.5, 45.5, step, step),
      Some(Crs::WGS84),
    );
    write_tile(
      dir.path(),
      "edge.tif",
      GeoTransform::north_up(11.0, 46.0, step, step),
      Some(Crs::WGS84),
    );
    write_tile(
      dir.path(),
      "outside.tif",
      GeoTransform::north_up(12.0, 45.5, step, step),
      Some(Crs::WGS84),
    );
    std::fs::write(dir.path().join("notes.txt"), "not a raster").unwrap();

    let mut names =
      find_tiles_in_bbox(LonLat::new(11.0, 46.0), LonLat::new(10.0, 45.0), dir.path()).unwrap();
    names.sort();
    assert_eq!(names, vec!["edge.tif".to_string(), "inside.tif".to_string()]);
  }

  #[test]
  fn tiles_without_crs_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(
      dir.path(),
      "no_crs.tif",
      GeoTransform::north_up(10.5, 45.5, 0.0001, 0.0001),
      None,
    );
    std::fs::write(dir.path().join("broken.tif"), b"definitely not tiff").unwrap();

    let names =
      find_tiles_in_bbox(LonLat::new(11.0, 46.0), LonLat::new(10.0, 45.0), dir.path()).unwrap();
    assert!(names.is_empty());
    assert!(matches!(
      tile_origin_lonlat(dir.path().join("no_crs.tif")),
      Err(SpatialMetadataError::MissingCrs)
    ));
  }

  #[test]
  fn projected_origin_is_reprojected() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(
      dir.path(),
      "utm.tif",
      GeoTransform::north_up(500000.0, 0.0, 10.0, 10.0),
      Some(Crs(32633)),
    );
    let origin = tile_origin_lonlat(dir.path().join("utm.tif")).unwrap();
    assert!((origin.lon - 15.0).abs() < 1e-6);
    assert!(origin.lat.abs() < 1e-6);
  }

  #[test]
  fn missing_folder_is_an_error() {
    assert!(matches!(
      find_tiles_in_bbox(
        LonLat::new(1.0, 1.0),
        LonLat::new(0.0, 0.0),
        "/definitely/not/a/folder"
      ),
      Err(IndexError::ReadDir { .. })
    ));
  }
}
