// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/bin/tile_search.rs - 按范围检索瓦片
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dikuai::{LonLat, find_tiles_in_bbox};

/// 列出像素原点落在经纬度范围内的瓦片
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 瓦片目录
  #[arg(long, value_name = "DIR", default_value = "patches")]
  pub folder: PathBuf,
  /// 东北角经度
  #[arg(long, allow_negative_numbers = true)]
  pub ne_lon: f64,
  /// 东北角纬度
  #[arg(long, allow_negative_numbers = true)]
  pub ne_lat: f64,
  /// 西南角经度
  #[arg(long, allow_negative_numbers = true)]
  pub sw_lon: f64,
  /// 西南角纬度
  #[arg(long, allow_negative_numbers = true)]
  pub sw_lat: f64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  info!("瓦片目录: {}", args.folder.display());

  let tiles = find_tiles_in_bbox(
    LonLat::new(args.ne_lon, args.ne_lat),
    LonLat::new(args.sw_lon, args.sw_lat),
    &args.folder,
  )?;
  for tile in tiles {
    println!("{tile}");
  }

  Ok(())
}
