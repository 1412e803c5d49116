// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/bin/segment_tiles.rs - 运行分割任务
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

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dikuai::{
  JobConfig, JobController, JobEvent, JobState, LonLat, SegmentationJob, compute_distribution,
  find_tiles_in_bbox,
};

/// 对选中的瓦片运行地表覆盖分割
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型检查点：`linear:///path/ckpt.json` 或文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: String,
  /// 瓦片文件名（相对于瓦片目录）
  #[arg(long, value_name = "NAME", num_args = 1..)]
  pub tiles: Vec<String>,
  /// 以范围检索瓦片: 东北经度 东北纬度 西南经度 西南纬度
  #[arg(
    long,
    num_args = 4,
    value_names = ["NE_LON", "NE_LAT", "SW_LON", "SW_LAT"],
    allow_negative_numbers = true,
    conflicts_with = "tiles"
  )]
  pub bbox: Option<Vec<f64>>,
  /// JSON 配置文件，命令行参数覆盖其中的值
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  #[arg(long, value_name = "DIR")]
  pub tile_dir: Option<PathBuf>,
  #[arg(long, value_name = "DIR")]
  pub output_dir: Option<PathBuf>,
  #[arg(long, value_name = "DIR")]
  pub archive_dir: Option<PathBuf>,
  /// 同时保存彩色类别图
  #[arg(long)]
  pub preview: bool,
}

impl Args {
  fn job_config(&self) -> Result<JobConfig> {
    let mut config = match &self.config {
      Some(path) => JobConfig::from_json_file(path)?,
      None => JobConfig::default(),
    };
    if let Some(dir) = &self.tile_dir {
      config = config.with_tile_dir(dir);
    }
    if let Some(dir) = &self.output_dir {
      config = config.with_output_dir(dir);
    }
    if let Some(dir) = &self.archive_dir {
      config = config.with_archive_dir(dir);
    }
    if self.preview {
      config = config.with_class_map_preview(true);
    }
    Ok(config)
  }
}

/// 从标准输入读取 p / r / s 控制命令
fn spawn_console(controller: JobController) -> Result<()> {
  thread::Builder::new()
    .name("console".to_string())
    .spawn(move || {
      for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
          "p" => controller.pause(),
          "r" => controller.resume(),
          "s" => controller.stop(),
          "" => {}
          other => warn!("未知命令: {} (p 暂停, r 恢复, s 停止)", other),
        }
      }
    })?;
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let config = args.job_config()?;

  info!("模型: {}", args.model);
  info!("瓦片目录: {}", config.tile_dir.display());
  info!("输出目录: {}", config.output_dir.display());

  let tiles = match &args.bbox {
    Some(bbox) => find_tiles_in_bbox(
      LonLat::new(bbox[0], bbox[1]),
      LonLat::new(bbox[2], bbox[3]),
      &config.tile_dir,
    )?,
    None => args.tiles.clone(),
  };
  if tiles.is_empty() {
    bail!("没有需要处理的瓦片");
  }
  info!("共 {} 个瓦片", tiles.len());

  let (mut job, events) = SegmentationJob::new(config);
  let controller = job.controller();
  ctrlc::set_handler({
    let controller = controller.clone();
    move || {
      warn!("收到中断信号，在当前瓦片完成后停止...");
      controller.stop();
    }
  })?;
  spawn_console(controller)?;

  job.start(&args.model, tiles)?;
  for event in events.iter() {
    match event {
      JobEvent::Progress(percent) => info!("进度: {}%", percent),
      JobEvent::ResetProgress => {
        warn!("任务已停止");
        break;
      }
      JobEvent::UpdateDistribution(maps) => {
        let distribution = compute_distribution(maps.iter().map(|m| m.as_ref()));
        for share in distribution.iter() {
          info!("  {:<16} {:>6.2}%", share.name, share.percentage);
        }
      }
      JobEvent::Finished(message) => {
        info!("{}", message);
        break;
      }
      JobEvent::Error(message) => {
        error!("{}", message);
        break;
      }
    }
  }

  match job.wait() {
    JobState::Errored => bail!("分割任务失败"),
    state => info!("任务结束: {:?}", state),
  }
  Ok(())
}
