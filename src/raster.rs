// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/raster.rs - GeoTIFF 读写
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
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::debug;

use crate::geo::{Crs, GeoTransform};

mod chunks;

// GeoKey 编号
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

// TIFF 基线标签取值
const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_IEEEFP: u16 = 3;
const COMPRESSION_NONE: u16 = 1;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PLANAR_CHUNKY: u16 = 1;
const EXTRA_SAMPLE_UNSPECIFIED: u16 = 0;
// NewSubfileType 中的缩略图与掩膜位
const SUBFILE_REDUCED_OR_MASK: u32 = 0b101;

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("TIFF error: {0}")]
  Tiff(#[from] tiff::TiffError),
  #[error("LZW 解码错误: {0}")]
  Lzw(#[from] weezl::LzwError),
  #[error("Shape error: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("不支持的像素格式")]
  UnsupportedPixelFormat,
  #[error("不支持的样本类型: {bits} 位, SampleFormat = {format}")]
  UnsupportedSampleType { bits: u16, format: u16 },
  #[error("不支持的压缩方式: {0}")]
  UnsupportedCompression(u16),
  #[error("不支持的预测器: {0}")]
  UnsupportedPredictor(u16),
  #[error("数据块 {index} 解压后长度 {actual} 小于期望的 {expected}")]
  ChunkLength {
    index: usize,
    expected: usize,
    actual: usize,
  },
  #[error("波段尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  InconsistentBands {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("像素数据长度 {len} 不是 {width}x{height} 的整数倍")]
  SampleCount {
    len: usize,
    width: usize,
    height: usize,
  },
  #[error("栅格数据超出经典 TIFF 的 4 GiB 偏移范围")]
  FileTooLarge,
  #[error("缺少仿射变换信息")]
  MissingTransform,
}

/// 波段在文件中的存储类型
///
/// 计算时统一使用 `f32`，写回时按该类型转换，8/16 位整数与 `f32` 可无损往返。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
  U8,
  I8,
  U16,
  I16,
  U32,
  I32,
  F32,
  F64,
}

impl SampleType {
  pub fn from_tags(bits: u16, format: u16) -> Result<Self, RasterError> {
    match (format, bits) {
      (SAMPLE_FORMAT_UINT, 8) => Ok(Self::U8),
      (SAMPLE_FORMAT_UINT, 16) => Ok(Self::U16),
      (SAMPLE_FORMAT_UINT, 32) => Ok(Self::U32),
      (SAMPLE_FORMAT_INT, 8) => Ok(Self::I8),
      (SAMPLE_FORMAT_INT, 16) => Ok(Self::I16),
      (SAMPLE_FORMAT_INT, 32) => Ok(Self::I32),
      (SAMPLE_FORMAT_IEEEFP, 32) => Ok(Self::F32),
      (SAMPLE_FORMAT_IEEEFP, 64) => Ok(Self::F64),
      _ => Err(RasterError::UnsupportedSampleType { bits, format }),
    }
  }

  pub fn bits(self) -> u16 {
    match self {
      Self::U8 | Self::I8 => 8,
      Self::U16 | Self::I16 => 16,
      Self::U32 | Self::I32 | Self::F32 => 32,
      Self::F64 => 64,
    }
  }

  pub fn bytes(self) -> usize {
    usize::from(self.bits() / 8)
  }

  pub fn format(self) -> u16 {
    match self {
      Self::U8 | Self::U16 | Self::U32 => SAMPLE_FORMAT_UINT,
      Self::I8 | Self::I16 | Self::I32 => SAMPLE_FORMAT_INT,
      Self::F32 | Self::F64 => SAMPLE_FORMAT_IEEEFP,
    }
  }

  /// 按位宽读出的原始整数解释为数值
  fn value_from_bits(self, raw: u64) -> f32 {
    match self {
      Self::U8 => raw as u8 as f32,
      Self::I8 => raw as u8 as i8 as f32,
      Self::U16 => raw as u16 as f32,
      Self::I16 => raw as u16 as i16 as f32,
      Self::U32 => raw as u32 as f32,
      Self::I32 => raw as u32 as i32 as f32,
      Self::F32 => f32::from_bits(raw as u32),
      Self::F64 => f64::from_bits(raw) as f32,
    }
  }

  fn of_decoding_result(result: &DecodingResult) -> Result<Self, RasterError> {
    match result {
      DecodingResult::U8(_) => Ok(Self::U8),
      DecodingResult::I8(_) => Ok(Self::I8),
      DecodingResult::U16(_) => Ok(Self::U16),
      DecodingResult::I16(_) => Ok(Self::I16),
      DecodingResult::U32(_) => Ok(Self::U32),
      DecodingResult::I32(_) => Ok(Self::I32),
      DecodingResult::F32(_) => Ok(Self::F32),
      DecodingResult::F64(_) => Ok(Self::F64),
      _ => Err(RasterError::UnsupportedPixelFormat),
    }
  }
}

/// 只读取标签得到的栅格元数据，不解码像素
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
  pub width: usize,
  pub height: usize,
  pub transform: Option<GeoTransform>,
  pub crs: Option<Crs>,
}

/// 带地理参考的多波段栅格，波段数据按 (channels, height, width) 排列
#[derive(Debug, Clone)]
pub struct GeoRaster {
  pub bands: Array3<f32>,
  pub sample_type: SampleType,
  pub transform: GeoTransform,
  pub crs: Option<Crs>,
}

impl GeoRaster {
  pub fn new(bands: Array3<f32>, transform: GeoTransform, crs: Option<Crs>) -> Self {
    Self {
      bands,
      sample_type: SampleType::F32,
      transform,
      crs,
    }
  }

  pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
    self.sample_type = sample_type;
    self
  }

  pub fn channels(&self) -> usize {
    self.bands.dim().0
  }

  pub fn height(&self) -> usize {
    self.bands.dim().1
  }

  pub fn width(&self) -> usize {
    self.bands.dim().2
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, RasterError> {
    read_raster(path)
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RasterError> {
    write_interleaved(path, self, self.bands.view())
  }

  /// 复制原始波段并在末尾追加一个类别波段，与原始波段同一样本类型
  pub fn save_with_class_band(
    &self,
    path: impl AsRef<Path>,
    classes: ArrayView2<'_, u8>,
  ) -> Result<(), RasterError> {
    let expected = (self.height(), self.width());
    if classes.dim() != expected {
      return Err(RasterError::InconsistentBands {
        expected,
        actual: classes.dim(),
      });
    }
    let mut bands = Array3::<f32>::zeros((self.channels() + 1, expected.0, expected.1));
    bands.slice_mut(s![..self.channels(), .., ..]).assign(&self.bands);
    bands
      .index_axis_mut(Axis(0), self.channels())
      .assign(&classes.mapv(f32::from));
    write_interleaved(path, self, bands.view())
  }
}

/// 读取尺寸、仿射变换与坐标参考系
pub fn read_metadata(path: impl AsRef<Path>) -> Result<RasterMetadata, RasterError> {
  let file = File::open(path)?;
  let mut decoder = Decoder::new(BufReader::new(file))?;
  let (width, height) = decoder.dimensions()?;
  Ok(RasterMetadata {
    width: width as usize,
    height: height as usize,
    transform: read_transform(&mut decoder)?,
    crs: read_crs(&mut decoder)?,
  })
}

/// 读取全部波段
///
/// 支持单页多样本（像素交错或按平面存放）与每页一个波段两种布局，
/// 缩略图与掩膜页会被跳过。
pub fn read_raster(path: impl AsRef<Path>) -> Result<GeoRaster, RasterError> {
  let path = path.as_ref();
  let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
  // 直接读取数据块时使用的独立句柄
  let mut raw = File::open(path)?;
  let big_endian = chunks::is_big_endian(&mut raw)?;

  let transform = read_transform(&mut decoder)?.ok_or(RasterError::MissingTransform)?;
  let crs = read_crs(&mut decoder)?;

  let (width, height) = decoder.dimensions()?;
  let expected = (height as usize, width as usize);
  let mut bands: Vec<Array2<f32>> = Vec::new();
  let mut sample_type = None;

  loop {
    let subfile = decoder
      .find_tag_unsigned::<u32>(Tag::NewSubfileType)?
      .unwrap_or(0);
    if subfile & SUBFILE_REDUCED_OR_MASK == 0 {
      let (w, h) = decoder.dimensions()?;
      let shape = (h as usize, w as usize);
      if shape != expected {
        return Err(RasterError::InconsistentBands {
          expected,
          actual: shape,
        });
      }

      let (page_type, page_bands) = match decoder.colortype() {
        Ok(_) => {
          let result = decoder.read_image()?;
          let page_type = SampleType::of_decoding_result(&result)?;
          (page_type, deinterleave(decoding_result_to_f32(result)?, shape)?)
        }
        // 多样本灰度等 tiff 解码器不接受的布局
        Err(_) => chunks::read_bands(&mut decoder, &mut raw, big_endian)?,
      };
      sample_type = match sample_type {
        None => Some(page_type),
        Some(previous) if previous == page_type => Some(previous),
        Some(_) => Some(SampleType::F32),
      };
      bands.extend(page_bands);
    }

    if !decoder.more_images() {
      break;
    }
    decoder.next_image()?;
  }

  let views: Vec<ArrayView2<'_, f32>> = bands.iter().map(|b| b.view()).collect();
  let bands = ndarray::stack(Axis(0), &views)?;
  let sample_type = sample_type.unwrap_or(SampleType::F32);
  debug!("读取栅格 {}: {:?} {:?}", path.display(), bands.dim(), sample_type);

  Ok(GeoRaster {
    bands,
    sample_type,
    transform,
    crs,
  })
}

fn decoding_result_to_f32(result: DecodingResult) -> Result<Vec<f32>, RasterError> {
  let values = match result {
    DecodingResult::U8(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::U16(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::I8(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::I16(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::F32(buf) => buf,
    DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
    _ => return Err(RasterError::UnsupportedPixelFormat),
  };
  Ok(values)
}

fn deinterleave(
  samples: Vec<f32>,
  (height, width): (usize, usize),
) -> Result<Vec<Array2<f32>>, RasterError> {
  let pixels = height * width;
  if pixels == 0 || samples.len() % pixels != 0 {
    return Err(RasterError::SampleCount {
      len: samples.len(),
      width,
      height,
    });
  }

  let per_pixel = samples.len() / pixels;
  if per_pixel == 1 {
    return Ok(vec![Array2::from_shape_vec((height, width), samples)?]);
  }

  let interleaved = Array3::from_shape_vec((height, width, per_pixel), samples)?;
  Ok(
    interleaved
      .axis_iter(Axis(2))
      .map(|band| band.to_owned())
      .collect(),
  )
}

fn read_transform<R: Read + Seek>(
  decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, RasterError> {
  if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
    return Ok(GeoTransform::from_model_transformation(&value.into_f64_vec()?));
  }

  let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?;
  let tiepoint = decoder.find_tag(Tag::ModelTiepointTag)?;
  match (scale, tiepoint) {
    (Some(scale), Some(tiepoint)) => Ok(GeoTransform::from_scale_and_tiepoint(
      &scale.into_f64_vec()?,
      &tiepoint.into_f64_vec()?,
    )),
    _ => Ok(None),
  }
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<Crs>, RasterError> {
  let Some(directory) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
    return Ok(None);
  };
  Ok(crs_from_geo_keys(&directory.into_u32_vec()?))
}

/// 从 GeoKeyDirectory 中取出投影或地理坐标系编码
///
/// 只识别直接存放在目录中的编码（TIFFTagLocation = 0）。
fn crs_from_geo_keys(directory: &[u32]) -> Option<Crs> {
  if directory.len() < 4 {
    return None;
  }
  let keys = directory[3] as usize;
  let entries = directory[4..].chunks_exact(4).take(keys);

  let mut projected = None;
  let mut geographic = None;
  for entry in entries {
    let (key, location, value) = (entry[0], entry[1], entry[3]);
    if location != 0 {
      continue;
    }
    match u16::try_from(key) {
      Ok(PROJECTED_CS_TYPE_GEO_KEY) => projected = Some(value),
      Ok(GEOGRAPHIC_TYPE_GEO_KEY) => geographic = Some(value),
      _ => {}
    }
  }

  projected
    .or(geographic)
    .and_then(|code| u16::try_from(code).ok())
    .filter(|&code| code != 0 && code != USER_DEFINED)
    .map(Crs)
}

fn geo_key_directory(crs: Crs) -> Vec<u16> {
  let (model_type, crs_key) = if crs.is_geographic() {
    (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
  } else {
    (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
  };
  vec![
    1, 1, 0, 3, //
    GT_MODEL_TYPE_GEO_KEY, 0, 1, model_type, //
    GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA, //
    crs_key, 0, 1, crs.epsg(),
  ]
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
  directory: &mut DirectoryEncoder<'_, W, K>,
  transform: &GeoTransform,
  crs: Option<Crs>,
) -> Result<(), RasterError> {
  if transform.is_north_up() {
    let scale = [transform.a, -transform.e, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, transform.c, transform.f, 0.0];
    directory.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    directory.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
  } else {
    let matrix = transform.to_model_transformation();
    directory.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
  }
  if let Some(crs) = crs {
    let keys = geo_key_directory(crs);
    directory.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
  }
  Ok(())
}

/// 单页、像素交错、MinIsBlack 的多样本 GeoTIFF，整幅图像存为一个条带
fn write_interleaved(
  path: impl AsRef<Path>,
  raster: &GeoRaster,
  bands: ndarray::ArrayView3<'_, f32>,
) -> Result<(), RasterError> {
  let path = path.as_ref();
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  let (samples, height, width) = bands.dim();
  let sample_type = raster.sample_type;
  // (channels, h, w) -> (h, w, channels) 的行主序即像素交错顺序
  let pixels = bands.permuted_axes([1, 2, 0]);
  let values = pixels.iter().copied();

  let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
  let mut directory = encoder.new_directory()?;
  let offset = match sample_type {
    SampleType::U8 => directory.write_data(&values.map(|v| v as u8).collect::<Vec<_>>()[..])?,
    SampleType::I8 => directory.write_data(&values.map(|v| v as i8).collect::<Vec<_>>()[..])?,
    SampleType::U16 => directory.write_data(&values.map(|v| v as u16).collect::<Vec<_>>()[..])?,
    SampleType::I16 => directory.write_data(&values.map(|v| v as i16).collect::<Vec<_>>()[..])?,
    SampleType::U32 => directory.write_data(&values.map(|v| v as u32).collect::<Vec<_>>()[..])?,
    SampleType::I32 => directory.write_data(&values.map(|v| v as i32).collect::<Vec<_>>()[..])?,
    SampleType::F32 => directory.write_data(&values.collect::<Vec<_>>()[..])?,
    SampleType::F64 => {
      directory.write_data(&values.map(f64::from).collect::<Vec<_>>()[..])?
    }
  };
  let offset = u32::try_from(offset).map_err(|_| RasterError::FileTooLarge)?;
  let byte_count = u32::try_from(samples * height * width * sample_type.bytes())
    .map_err(|_| RasterError::FileTooLarge)?;
  let samples_per_pixel = u16::try_from(samples).map_err(|_| RasterError::UnsupportedPixelFormat)?;

  directory.write_tag(Tag::ImageWidth, width as u32)?;
  directory.write_tag(Tag::ImageLength, height as u32)?;
  directory.write_tag(Tag::BitsPerSample, &vec![sample_type.bits(); samples][..])?;
  directory.write_tag(Tag::Compression, COMPRESSION_NONE)?;
  directory.write_tag(Tag::PhotometricInterpretation, PHOTOMETRIC_MIN_IS_BLACK)?;
  directory.write_tag(Tag::StripOffsets, offset)?;
  directory.write_tag(Tag::SamplesPerPixel, samples_per_pixel)?;
  directory.write_tag(Tag::RowsPerStrip, height as u32)?;
  directory.write_tag(Tag::StripByteCounts, byte_count)?;
  directory.write_tag(Tag::PlanarConfiguration, PLANAR_CHUNKY)?;
  directory.write_tag(Tag::SampleFormat, &vec![sample_type.format(); samples][..])?;
  if samples > 1 {
    directory.write_tag(
      Tag::ExtraSamples,
      &vec![EXTRA_SAMPLE_UNSPECIFIED; samples - 1][..],
    )?;
  }
  write_geo_tags(&mut directory, &raster.transform, raster.crs)?;
  directory.finish()?;

  debug!(
    "写入栅格 {}: {} 个波段, {:?}",
    path.display(),
    samples,
    sample_type
  );
  Ok(())
}
