// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/label.rs - 地表覆盖类别
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

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> &'static str;
  fn from_label_id(id: u32) -> Option<Self>;
  fn label_id(&self) -> u32;
}

/// 简化的 DFC 地表覆盖类别，255 保留为无效像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LandCover {
  Forest = 0,
  Shrubland = 1,
  Grassland = 2,
  Wetlands = 3,
  Croplands = 4,
  UrbanBuiltUp = 5,
  Barren = 6,
  Water = 7,
  Invalid = 255,
}

impl LandCover {
  pub const INVALID_ID: u8 = 255;

  pub const ALL: [LandCover; 9] = [
    LandCover::Forest,
    LandCover::Shrubland,
    LandCover::Grassland,
    LandCover::Wetlands,
    LandCover::Croplands,
    LandCover::UrbanBuiltUp,
    LandCover::Barren,
    LandCover::Water,
    LandCover::Invalid,
  ];

  /// 饼图与类别图使用的配色
  pub fn color(&self) -> [u8; 3] {
    match self {
      LandCover::Forest => [0x2E, 0xCC, 0x71],
      LandCover::Shrubland => [0xF3, 0x9C, 0x12],
      LandCover::Grassland => [0x27, 0xAE, 0x60],
      LandCover::Wetlands => [0x34, 0x98, 0xDB],
      LandCover::Croplands => [0xF1, 0xC4, 0x0F],
      LandCover::UrbanBuiltUp => [0xE7, 0x4C, 0x3C],
      LandCover::Barren => [0x7F, 0x8C, 0x8D],
      LandCover::Water => [0x29, 0x80, 0xB9],
      LandCover::Invalid => [0x8E, 0x44, 0xAD],
    }
  }

  pub fn hex_color(&self) -> String {
    let [r, g, b] = self.color();
    format!("#{r:02X}{g:02X}{b:02X}")
  }
}

impl WithLabel for LandCover {
  fn to_label_str(&self) -> &'static str {
    match self {
      LandCover::Forest => "Forest",
      LandCover::Shrubland => "Shrubland",
      LandCover::Grassland => "Grassland",
      LandCover::Wetlands => "Wetlands",
      LandCover::Croplands => "Croplands",
      LandCover::UrbanBuiltUp => "Urban/Built-up",
      LandCover::Barren => "Barren",
      LandCover::Water => "Water",
      LandCover::Invalid => "Invalid",
    }
  }

  fn from_label_id(id: u32) -> Option<Self> {
    LandCover::ALL
      .into_iter()
      .find(|label| label.label_id() == id)
  }

  fn label_id(&self) -> u32 {
    *self as u32
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_map_to_names() {
    assert_eq!(LandCover::from_label_id(0), Some(LandCover::Forest));
    assert_eq!(
      LandCover::from_label_id(5).map(|l| l.to_label_str()),
      Some("Urban/Built-up")
    );
    assert_eq!(LandCover::from_label_id(255), Some(LandCover::Invalid));
    assert_eq!(LandCover::from_label_id(8), None);
    assert_eq!(LandCover::from_label_id(254), None);
  }

  #[test]
  fn colors_follow_palette() {
    assert_eq!(LandCover::Forest.hex_color(), "#2ECC71");
    assert_eq!(LandCover::Invalid.hex_color(), "#8E44AD");
  }
}
