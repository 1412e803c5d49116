// 该文件是 Dikuai （地块分割） 项目的一部分。
// tests/common/mod.rs - 集成测试的瓦片与检查点夹具
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

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use dikuai::JobConfig;
use dikuai::JobEvent;
use dikuai::geo::{Crs, GeoTransform};
use dikuai::model::LinearHeadCheckpoint;
use dikuai::raster::GeoRaster;
use ndarray::Array3;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Sentinel-2 的 10 m 分辨率
pub const PIXEL_SIZE: f64 = 10.0;

pub fn job_config(root: &Path) -> JobConfig {
  JobConfig::default()
    .with_tile_dir(root.join("patches"))
    .with_output_dir(root.join("output"))
    .with_archive_dir(root.join("npy_outputs"))
    .with_poll_interval(Duration::from_millis(10))
}

pub fn write_tile(
  dir: &Path,
  name: &str,
  origin: (f64, f64),
  crs: Option<Crs>,
  shape: (usize, usize, usize),
) -> PathBuf {
  std::fs::create_dir_all(dir).unwrap();
  let bands = Array3::from_shape_fn(shape, |(c, h, w)| ((c * 31 + h * 7 + w * 3) % 97) as f32 + 1.0);
  let transform = GeoTransform::north_up(origin.0, origin.1, PIXEL_SIZE, PIXEL_SIZE);
  let path = dir.join(name);
  GeoRaster::new(bands, transform, crs).save(&path).unwrap();
  path
}

/// Sentinel-2 风格的 u16 反射率样本
pub fn reflectance(bands: usize, height: usize, width: usize) -> Array3<u16> {
  Array3::from_shape_fn((bands, height, width), |(c, h, w)| {
    (((c * 31 + h * 7 + w * 3) % 97) * 100 + 1) as u16
  })
}

/// 按 rasterio/GDAL 默认布局写出瓦片：单页、像素交错、MinIsBlack、
/// 每行一个未压缩条带，地理标签为 PixelScale + Tiepoint + GeoKeyDirectory
pub fn write_rasterio_tile(
  dir: &Path,
  name: &str,
  origin: (f64, f64),
  bands: &Array3<u16>,
) -> PathBuf {
  std::fs::create_dir_all(dir).unwrap();
  let path = dir.join(name);
  let (samples, height, width) = bands.dim();

  let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
  let mut directory = encoder.new_directory().unwrap();
  let mut offsets: Vec<u32> = Vec::new();
  let mut counts: Vec<u32> = Vec::new();
  for row in 0..height {
    let mut strip: Vec<u16> = Vec::with_capacity(width * samples);
    for col in 0..width {
      for band in 0..samples {
        strip.push(bands[[band, row, col]]);
      }
    }
    offsets.push(directory.write_data(&strip[..]).unwrap() as u32);
    counts.push((strip.len() * 2) as u32);
  }

  directory.write_tag(Tag::ImageWidth, width as u32).unwrap();
  directory.write_tag(Tag::ImageLength, height as u32).unwrap();
  directory.write_tag(Tag::BitsPerSample, &vec![16u16; samples][..]).unwrap();
  directory.write_tag(Tag::Compression, 1u16).unwrap();
  directory.write_tag(Tag::PhotometricInterpretation, 1u16).unwrap();
  directory.write_tag(Tag::StripOffsets, &offsets[..]).unwrap();
  directory.write_tag(Tag::SamplesPerPixel, samples as u16).unwrap();
  directory.write_tag(Tag::RowsPerStrip, 1u32).unwrap();
  directory.write_tag(Tag::StripByteCounts, &counts[..]).unwrap();
  directory.write_tag(Tag::PlanarConfiguration, 1u16).unwrap();
  directory.write_tag(Tag::SampleFormat, &vec![1u16; samples][..]).unwrap();
  directory.write_tag(Tag::ExtraSamples, &vec![0u16; samples - 1][..]).unwrap();
  directory
    .write_tag(Tag::ModelPixelScaleTag, &[PIXEL_SIZE, PIXEL_SIZE, 0.0][..])
    .unwrap();
  directory
    .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..])
    .unwrap();
  // WGS 84 / UTM 54S
  let geo_keys: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 32754];
  directory.write_tag(Tag::GeoKeyDirectoryTag, &geo_keys[..]).unwrap();
  directory.finish().unwrap();
  path
}

/// 类别 k 取第 k 个通道（若存在），没有对应通道的类别恒为负
pub fn write_checkpoint(path: &Path, in_channels: usize) -> PathBuf {
  let num_classes = 8;
  let weights = (0..num_classes)
    .map(|k| (0..in_channels).map(|c| if c == k { 1.0 } else { 0.0 }).collect())
    .collect();
  let bias = (0..num_classes)
    .map(|k| if k < in_channels { 0.0 } else { -1.0 })
    .collect();
  let checkpoint = LinearHeadCheckpoint {
    in_channels,
    num_classes,
    weights,
    bias,
  };
  std::fs::write(path, serde_json::to_vec(&checkpoint).unwrap()).unwrap();
  path.to_path_buf()
}

/// 收集事件直到 `done` 返回 true 或超时
pub fn recv_until(
  events: &Receiver<JobEvent>,
  timeout: Duration,
  done: impl Fn(&JobEvent) -> bool,
) -> Vec<JobEvent> {
  let deadline = Instant::now() + timeout;
  let mut received = Vec::new();
  loop {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match events.recv_timeout(remaining) {
      Ok(event) => {
        let stop = done(&event);
        received.push(event);
        if stop {
          return received;
        }
      }
      Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
        return received;
      }
    }
  }
}

pub fn is_terminal(event: &JobEvent) -> bool {
  matches!(event, JobEvent::Finished(_) | JobEvent::Error(_))
}

pub fn progress_values(events: &[JobEvent]) -> Vec<u8> {
  events
    .iter()
    .filter_map(|event| match event {
      JobEvent::Progress(p) => Some(*p),
      _ => None,
    })
    .collect()
}

pub fn count_files_with_extension(dir: &Path, extension: &str) -> usize {
  match std::fs::read_dir(dir) {
    Ok(entries) => entries
      .filter_map(|e| e.ok())
      .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(extension))
      .count(),
    Err(_) => 0,
  }
}
