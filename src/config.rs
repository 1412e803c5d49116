// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/config.rs - 任务配置
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
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ARCHIVE_FILE_NAME: &str = "all_output_arrays.npz";
pub const DISTRIBUTION_FILE_NAME: &str = "class_distribution.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
  /// 瓦片名称相对于该目录解析
  pub tile_dir: PathBuf,
  pub output_dir: PathBuf,
  pub archive_dir: PathBuf,
  /// 暂停时的轮询间隔
  pub poll_interval_ms: u64,
  pub class_map_preview: bool,
}

impl Default for JobConfig {
  fn default() -> Self {
    Self {
      tile_dir: PathBuf::from("patches"),
      output_dir: PathBuf::from("output"),
      archive_dir: PathBuf::from("npy_outputs"),
      poll_interval_ms: 100,
      class_map_preview: false,
    }
  }
}

impl JobConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
  }

  pub fn with_tile_dir(mut self, tile_dir: impl Into<PathBuf>) -> Self {
    self.tile_dir = tile_dir.into();
    self
  }

  pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
    self.output_dir = output_dir.into();
    self
  }

  pub fn with_archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> Self {
    self.archive_dir = archive_dir.into();
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval_ms = interval.as_millis() as u64;
    self
  }

  pub fn with_class_map_preview(mut self, enabled: bool) -> Self {
    self.class_map_preview = enabled;
    self
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }

  pub fn tile_path(&self, name: &str) -> PathBuf {
    self.tile_dir.join(name)
  }

  pub fn archive_path(&self) -> PathBuf {
    self.archive_dir.join(ARCHIVE_FILE_NAME)
  }

  pub fn distribution_path(&self) -> PathBuf {
    self.archive_dir.join(DISTRIBUTION_FILE_NAME)
  }
}
