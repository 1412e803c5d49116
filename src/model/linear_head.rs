// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/model/linear_head.rs - 逐像素线性分割头
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

use ndarray::{Array1, Array2, Array4, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Model};

#[derive(Error, Debug)]
pub enum LinearHeadError {
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("检查点格式错误: {0}")]
  Checkpoint(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输入通道数 {actual} 与模型期望的 {expected} 不一致")]
  ChannelMismatch { expected: usize, actual: usize },
  #[error("Shape error: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

/// JSON 检查点：`weights[k][c]` 为类别 k 对输入通道 c 的权重
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearHeadCheckpoint {
  pub in_channels: usize,
  pub num_classes: usize,
  pub weights: Vec<Vec<f32>>,
  pub bias: Vec<f32>,
}

/// 等价于 1x1 卷积的分割头
#[derive(Debug, Clone)]
pub struct LinearHead {
  weights: Array2<f32>,
  bias: Array1<f32>,
}

pub struct LinearHeadBuilder {
  checkpoint_path: PathBuf,
}

impl FromUrlWithScheme for LinearHeadBuilder {
  const SCHEME: &'static str = "linear";
}

impl FromUrl for LinearHeadBuilder {
  type Error = LinearHeadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LinearHeadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(LinearHeadBuilder {
      checkpoint_path: PathBuf::from(url.path()),
    })
  }
}

impl LinearHeadBuilder {
  pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
    Self {
      checkpoint_path: checkpoint_path.as_ref().to_path_buf(),
    }
  }

  pub fn build(self) -> Result<LinearHead, LinearHeadError> {
    info!("加载模型文件: {}", self.checkpoint_path.display());
    let data = std::fs::read(&self.checkpoint_path)?;
    debug!("模型文件大小: {:.2} KB", data.len() as f64 / 1024.0);

    let checkpoint: LinearHeadCheckpoint = serde_json::from_slice(&data)?;
    let model = LinearHead::from_checkpoint(checkpoint)?;
    info!(
      "模型加载完成: {} 个输入通道, {} 个类别",
      model.in_channels(),
      model.num_classes()
    );
    Ok(model)
  }
}

impl LinearHead {
  pub fn from_checkpoint(checkpoint: LinearHeadCheckpoint) -> Result<Self, LinearHeadError> {
    let LinearHeadCheckpoint {
      in_channels,
      num_classes,
      weights,
      bias,
    } = checkpoint;

    if num_classes == 0 || num_classes > 256 {
      error!("类别数 {} 不在 1..=256 范围内", num_classes);
      return Err(LinearHeadError::ModelInvalid(format!(
        "类别数 {} 不在 1..=256 范围内",
        num_classes
      )));
    }
    if weights.len() != num_classes || bias.len() != num_classes {
      return Err(LinearHeadError::ModelInvalid(format!(
        "预期 {} 组权重与偏置, 实际为 {} 与 {}",
        num_classes,
        weights.len(),
        bias.len()
      )));
    }
    if let Some(row) = weights.iter().find(|row| row.len() != in_channels) {
      return Err(LinearHeadError::ModelInvalid(format!(
        "预期每组权重 {} 个, 实际为 {}",
        in_channels,
        row.len()
      )));
    }

    let flat: Vec<f32> = weights.into_iter().flatten().collect();
    Ok(Self {
      weights: Array2::from_shape_vec((num_classes, in_channels), flat)?,
      bias: Array1::from_vec(bias),
    })
  }

  pub fn in_channels(&self) -> usize {
    self.weights.dim().1
  }

  pub fn num_classes(&self) -> usize {
    self.weights.dim().0
  }
}

impl Model for LinearHead {
  type Input = Array4<f32>;
  type Output = Array4<f32>;
  type Error = LinearHeadError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (batch, channels, height, width) = input.dim();
    if channels != self.in_channels() {
      return Err(LinearHeadError::ChannelMismatch {
        expected: self.in_channels(),
        actual: channels,
      });
    }

    let mut output = Array4::<f32>::zeros((batch, self.num_classes(), height, width));
    for (sample, mut scores) in input.outer_iter().zip(output.outer_iter_mut()) {
      let pixels = sample
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((channels, height * width))?;
      let logits = self.weights.dot(&pixels) + &self.bias.view().insert_axis(Axis(1));
      scores.assign(&logits.into_shape_with_order((self.num_classes(), height, width))?);
    }

    debug!("线性分割头推理完成: {:?}", output.dim());
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn checkpoint() -> LinearHeadCheckpoint {
    LinearHeadCheckpoint {
      in_channels: 2,
      num_classes: 3,
      weights: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]],
      bias: vec![0.0, 0.0, 0.5],
    }
  }

  #[test]
  fn scores_are_per_pixel_linear_combinations() {
    let model = LinearHead::from_checkpoint(checkpoint()).unwrap();
    let mut input = Array4::<f32>::zeros((1, 2, 2, 2));
    input[[0, 0, 0, 0]] = 0.9;
    input[[0, 1, 0, 1]] = 0.8;

    let scores = model.infer(&input).unwrap();
    assert_eq!(scores.dim(), (1, 3, 2, 2));
    assert_eq!(scores[[0, 0, 0, 0]], 0.9);
    assert_eq!(scores[[0, 1, 0, 1]], 0.8);
    assert_eq!(scores[[0, 2, 1, 1]], 0.5);
    assert!((scores[[0, 2, 0, 0]] - (-0.4)).abs() < 1e-6);
  }

  #[test]
  fn channel_mismatch_is_reported() {
    let model = LinearHead::from_checkpoint(checkpoint()).unwrap();
    let input = Array4::<f32>::zeros((1, 3, 4, 4));
    assert!(matches!(
      model.infer(&input),
      Err(LinearHeadError::ChannelMismatch {
        expected: 2,
        actual: 3
      })
    ));
  }

  #[test]
  fn inconsistent_checkpoint_is_invalid() {
    let mut bad = checkpoint();
    bad.bias.pop();
    assert!(matches!(
      LinearHead::from_checkpoint(bad),
      Err(LinearHeadError::ModelInvalid(_))
    ));
  }

  #[test]
  fn builder_reads_json_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("head.json");
    std::fs::write(&path, serde_json::to_vec(&checkpoint()).unwrap()).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "linear", 1)).unwrap();
    let model = LinearHeadBuilder::from_url(&url).unwrap().build().unwrap();
    assert_eq!((model.in_channels(), model.num_classes()), (2, 3));
  }

  #[test]
  fn malformed_checkpoint_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("head.json");
    std::fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(
      LinearHeadBuilder::new(&path).build(),
      Err(LinearHeadError::Checkpoint(_))
    ));
  }
}
