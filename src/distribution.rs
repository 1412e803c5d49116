// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/distribution.rs - 类别分布统计与合并归档
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

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use ndarray_npy::{NpzWriter, WriteNpzError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::label::{LandCover, WithLabel};
use crate::model::ClassMap;

#[derive(Error, Debug)]
pub enum ArchiveError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("写入 npz 失败: {0}")]
  Npz(#[from] WriteNpzError),
  #[error("序列化分布失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 单个类别在所有像素中所占的份额
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassShare {
  pub label: u8,
  pub name: &'static str,
  pub color: String,
  pub pixels: u64,
  pub percentage: f64,
}

/// 按类别编号排序的分布；未映射的编号只计入分母
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassDistribution {
  pub total_pixels: u64,
  pub shares: Vec<ClassShare>,
}

impl ClassDistribution {
  pub fn get(&self, name: &str) -> Option<&ClassShare> {
    self.shares.iter().find(|share| share.name == name)
  }

  pub fn percentage(&self, name: &str) -> f64 {
    self.get(name).map(|share| share.percentage).unwrap_or(0.0)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ClassShare> {
    self.shares.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.total_pixels == 0
  }
}

/// 统计全部类别图的像素分布
///
/// 每次都从头重新计数，因此无论在任务中途还是结束时调用，结果都只取决于输入。
pub fn compute_distribution<'a, I>(maps: I) -> ClassDistribution
where
  I: IntoIterator<Item = &'a ClassMap>,
{
  let mut counts = [0u64; 256];
  for map in maps {
    for &value in map.iter() {
      counts[value as usize] += 1;
    }
  }

  let total_pixels: u64 = counts.iter().sum();
  if total_pixels == 0 {
    return ClassDistribution::default();
  }

  let shares = counts
    .iter()
    .enumerate()
    .filter(|&(_, &pixels)| pixels > 0)
    .filter_map(|(label, &pixels)| {
      let class = LandCover::from_label_id(label as u32)?;
      Some(ClassShare {
        label: label as u8,
        name: class.to_label_str(),
        color: class.hex_color(),
        pixels,
        percentage: pixels as f64 / total_pixels as f64 * 100.0,
      })
    })
    .collect();

  ClassDistribution {
    total_pixels,
    shares,
  }
}

#[derive(Serialize)]
struct DistributionReport<'a> {
  generated_at: String,
  tiles: usize,
  #[serde(flatten)]
  distribution: &'a ClassDistribution,
}

/// 任务运行期间累积的类别图
#[derive(Debug, Default)]
pub struct Aggregator {
  maps: Vec<Arc<ClassMap>>,
}

impl Aggregator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, map: ClassMap) -> Arc<ClassMap> {
    let map = Arc::new(map);
    self.maps.push(map.clone());
    map
  }

  pub fn len(&self) -> usize {
    self.maps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.maps.is_empty()
  }

  /// 当前集合的共享快照，随进度事件发送
  pub fn snapshot(&self) -> Vec<Arc<ClassMap>> {
    self.maps.clone()
  }

  pub fn distribution(&self) -> ClassDistribution {
    compute_distribution(self.maps.iter().map(|map| map.as_ref()))
  }

  /// 整体重写合并归档，条目依次命名为 `arr_0`、`arr_1` ...
  pub fn persist_archive(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut npz = NpzWriter::new(File::create(path)?);
    for (index, map) in self.maps.iter().enumerate() {
      npz.add_array(format!("arr_{index}"), &**map)?;
    }
    npz.finish()?;

    debug!("合并归档已写入 {} ({} 个数组)", path.display(), self.maps.len());
    Ok(())
  }

  pub fn persist_distribution(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let distribution = self.distribution();
    let report = DistributionReport {
      generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
      tiles: self.maps.len(),
      distribution: &distribution,
    };
    serde_json::to_writer_pretty(File::create(path)?, &report)?;

    info!("类别分布已写入 {}", path.display());
    Ok(())
  }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array2, array};
  use ndarray_npy::NpzReader;

  #[test]
  fn mapped_percentages_exclude_unmapped_labels() {
    // 4 个像素中 1 个为未映射的 42
    let map: ClassMap = array![[0u8, 7], [255, 42]];
    let distribution = compute_distribution([&map]);

    assert_eq!(distribution.total_pixels, 4);
    assert_eq!(distribution.percentage("Forest"), 25.0);
    assert_eq!(distribution.percentage("Water"), 25.0);
    assert_eq!(distribution.percentage("Invalid"), 25.0);
    let sum: f64 = distribution.iter().map(|s| s.percentage).sum();
    assert!((sum - 75.0).abs() < 1e-9);
    assert!(distribution.iter().all(|s| s.label != 42));
  }

  #[test]
  fn full_coverage_sums_to_hundred() {
    let a = Array2::from_shape_fn((13, 7), |(h, w)| ((h + w) % 8) as u8);
    let b = Array2::from_shape_fn((5, 11), |(h, w)| ((h * w) % 8) as u8);
    let distribution = compute_distribution([&a, &b]);

    assert_eq!(distribution.total_pixels, 13 * 7 + 5 * 11);
    let sum: f64 = distribution.iter().map(|s| s.percentage).sum();
    assert!((sum - 100.0).abs() < 1e-9);
  }

  #[test]
  fn recomputation_matches_single_pass() {
    let maps: Vec<ClassMap> = (0..4)
      .map(|i| Array2::from_elem((3, 3), (i * 2) as u8))
      .collect();

    let mut aggregator = Aggregator::new();
    let mut last = ClassDistribution::default();
    for map in &maps {
      aggregator.push(map.clone());
      last = aggregator.distribution();
    }
    assert_eq!(last, compute_distribution(maps.iter()));
    assert_eq!(last.get("Grassland").map(|s| s.pixels), Some(9));
  }

  #[test]
  fn empty_collection_has_no_shares() {
    let distribution = compute_distribution(std::iter::empty());
    assert!(distribution.is_empty());
    assert!(distribution.shares.is_empty());
  }

  #[test]
  fn archive_is_rewritten_with_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("npy_outputs/all_output_arrays.npz");

    let mut aggregator = Aggregator::new();
    aggregator.push(Array2::zeros((4, 4)));
    aggregator.persist_archive(&path).unwrap();
    aggregator.push(Array2::from_elem((2, 3), 5u8));
    aggregator.persist_archive(&path).unwrap();

    let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
    assert_eq!(npz.len(), 2);
    let second: Array2<u8> = npz.by_index(1).unwrap();
    assert_eq!(second, Array2::from_elem((2, 3), 5u8));
  }

  #[test]
  fn distribution_report_is_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class_distribution.json");

    let mut aggregator = Aggregator::new();
    aggregator.push(array![[1u8, 1], [3, 255]]);
    aggregator.persist_distribution(&path).unwrap();

    let value: serde_json::Value =
      serde_json::from_reader(File::open(&path).unwrap()).unwrap();
    assert_eq!(value["total_pixels"], 4);
    assert_eq!(value["tiles"], 1);
    assert_eq!(value["shares"][0]["name"], "Shrubland");
    assert_eq!(value["shares"][0]["percentage"], 50.0);
    assert!(value["generated_at"].is_string());
  }
}
