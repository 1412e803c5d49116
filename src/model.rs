// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/model.rs - 模型
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

use std::path::Path;

use ndarray::{Array2, Array4, Axis};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 逐像素类别索引
pub type ClassMap = Array2<u8>;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScoreError {
  #[error("得分张量批大小应为 1, 实际为 {0}")]
  BatchSize(usize),
  #[error("类别数 {0} 超出 u8 可表示的范围")]
  TooManyClasses(usize),
  #[error("得分张量空间尺寸 {actual:?} 与输入 {expected:?} 不一致")]
  SpatialMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
}

/// 沿类别维取最大值的下标，得到 (H, W) 的类别图
///
/// 多个类别得分相同时取下标最小者。
pub fn argmax_classes(
  scores: &Array4<f32>,
  expected: (usize, usize),
) -> Result<ClassMap, ScoreError> {
  let (batch, classes, height, width) = scores.dim();
  if batch != 1 {
    return Err(ScoreError::BatchSize(batch));
  }
  if classes == 0 || classes > 256 {
    return Err(ScoreError::TooManyClasses(classes));
  }
  if (height, width) != expected {
    return Err(ScoreError::SpatialMismatch {
      expected,
      actual: (height, width),
    });
  }

  let scores = scores.index_axis(Axis(0), 0);
  Ok(Array2::from_shape_fn((height, width), |(h, w)| {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for k in 0..classes {
      let score = scores[[k, h, w]];
      if score > best_score {
        best_score = score;
        best = k;
      }
    }
    best as u8
  }))
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("线性分割头错误: {0}")]
  LinearHead(#[from] LinearHeadError),
}

/// 按 URL 方案选择的模型后端
pub enum ModelWrapper {
  LinearHead(LinearHead),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == LinearHeadBuilder::SCHEME {
      let model = LinearHeadBuilder::from_url(url)?.build()?;
      return Ok(ModelWrapper::LinearHead(model));
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl ModelWrapper {
  /// 接受 `linear:///path/to/ckpt.json` 形式的 URL 或普通文件路径
  pub fn from_location(location: &str) -> Result<Self, ModelError> {
    // 单字母方案视为 Windows 盘符
    match Url::parse(location) {
      Ok(url) if url.scheme().len() > 1 => Self::from_url(&url),
      _ => {
        info!("按文件路径加载模型: {}", location);
        let model = LinearHeadBuilder::new(Path::new(location)).build()?;
        Ok(ModelWrapper::LinearHead(model))
      }
    }
  }
}

impl Model for ModelWrapper {
  type Input = Array4<f32>;
  type Output = Array4<f32>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::LinearHead(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}

mod linear_head;
pub use self::linear_head::{LinearHead, LinearHeadBuilder, LinearHeadCheckpoint, LinearHeadError};
