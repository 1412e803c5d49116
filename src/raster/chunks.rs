// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/raster/chunks.rs - 多样本灰度 TIFF 的条带/瓦块解码
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

//! rasterio/GDAL 写出的 N 波段 MinIsBlack 影像（SamplesPerPixel > 1）
//! 不被 tiff 解码器的颜色类型接受，这里按标签自行读取数据块。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use flate2::read::ZlibDecoder;
use ndarray::{Array2, Array3, Axis};
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tracing::trace;

use super::{RasterError, SampleType};

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_ADOBE_DEFLATE: u16 = 32946;
const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;
const PLANAR_SEPARATE: u16 = 2;

/// 由文件头 `II` / `MM` 判断字节序
pub(super) fn is_big_endian(file: &mut File) -> Result<bool, RasterError> {
  let mut magic = [0u8; 2];
  file.seek(SeekFrom::Start(0))?;
  file.read_exact(&mut magic)?;
  Ok(&magic == b"MM")
}

/// 当前页的数据块布局
#[derive(Debug)]
struct ChunkLayout {
  width: usize,
  height: usize,
  samples: usize,
  sample_type: SampleType,
  planar: bool,
  tiled: bool,
  chunk_width: usize,
  chunk_height: usize,
  offsets: Vec<u64>,
  byte_counts: Vec<u64>,
  compression: u16,
  predictor: u16,
}

impl ChunkLayout {
  fn from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Self, RasterError> {
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let samples = decoder
      .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
      .unwrap_or(1) as usize;

    let bits = decoder
      .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
      .unwrap_or_else(|| vec![1]);
    let format = decoder
      .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
      .and_then(|formats| formats.first().copied())
      .unwrap_or(1);
    let first_bits = bits.first().copied().unwrap_or(1);
    if bits.iter().any(|&b| b != first_bits) {
      return Err(RasterError::UnsupportedPixelFormat);
    }
    let sample_type = SampleType::from_tags(first_bits, format)?;

    let planar = decoder
      .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
      .unwrap_or(1)
      == PLANAR_SEPARATE;
    let compression = decoder
      .find_tag_unsigned::<u16>(Tag::Compression)?
      .unwrap_or(COMPRESSION_NONE);
    let predictor = decoder
      .find_tag_unsigned::<u16>(Tag::Predictor)?
      .unwrap_or(PREDICTOR_NONE);

    let tiled = decoder.find_tag(Tag::TileOffsets)?.is_some();
    let (chunk_width, chunk_height, offsets, byte_counts) = if tiled {
      (
        decoder.get_tag_unsigned::<u32>(Tag::TileWidth)? as usize,
        decoder.get_tag_unsigned::<u32>(Tag::TileLength)? as usize,
        decoder.get_tag_u64_vec(Tag::TileOffsets)?,
        decoder.get_tag_u64_vec(Tag::TileByteCounts)?,
      )
    } else {
      let rows = decoder
        .find_tag_unsigned::<u32>(Tag::RowsPerStrip)?
        .map(|rows| rows as usize)
        .unwrap_or(height)
        .clamp(1, height.max(1));
      (
        width,
        rows,
        decoder.get_tag_u64_vec(Tag::StripOffsets)?,
        decoder.get_tag_u64_vec(Tag::StripByteCounts)?,
      )
    };

    Ok(Self {
      width,
      height,
      samples,
      sample_type,
      planar,
      tiled,
      chunk_width,
      chunk_height,
      offsets,
      byte_counts,
      compression,
      predictor,
    })
  }

  fn chunks_across(&self) -> usize {
    self.width.div_ceil(self.chunk_width.max(1))
  }

  fn chunks_down(&self) -> usize {
    self.height.div_ceil(self.chunk_height.max(1))
  }

  fn samples_per_chunk_pixel(&self) -> usize {
    if self.planar { 1 } else { self.samples }
  }
}

/// 解码当前页的全部样本，返回存储类型与逐波段数组
pub(super) fn read_bands<R: Read + Seek>(
  decoder: &mut Decoder<R>,
  file: &mut File,
  big_endian: bool,
) -> Result<(SampleType, Vec<Array2<f32>>), RasterError> {
  let layout = ChunkLayout::from_decoder(decoder)?;
  trace!("按数据块读取: {:?}", layout);

  let float_samples = layout.sample_type.format() == super::SAMPLE_FORMAT_IEEEFP;
  let differencing_ok = layout.predictor == PREDICTOR_HORIZONTAL && !float_samples;
  if layout.predictor != PREDICTOR_NONE && !differencing_ok {
    return Err(RasterError::UnsupportedPredictor(layout.predictor));
  }

  let across = layout.chunks_across();
  let down = layout.chunks_down();
  let planes = if layout.planar { layout.samples } else { 1 };
  let needed = across * down * planes;
  if layout.offsets.len() < needed || layout.byte_counts.len() < needed {
    return Err(RasterError::SampleCount {
      len: layout.offsets.len().min(layout.byte_counts.len()),
      width: layout.width,
      height: layout.height,
    });
  }

  let mut bands = Array3::<f32>::zeros((layout.samples, layout.height, layout.width));
  let spp = layout.samples_per_chunk_pixel();
  let sample_bytes = layout.sample_type.bytes();

  for plane in 0..planes {
    for chunk_row in 0..down {
      for chunk_col in 0..across {
        let index = plane * across * down + chunk_row * across + chunk_col;
        let row0 = chunk_row * layout.chunk_height;
        let col0 = chunk_col * layout.chunk_width;
        // 末尾条带可以较短，瓦块总是完整尺寸
        let stored_rows = if layout.tiled {
          layout.chunk_height
        } else {
          layout.chunk_height.min(layout.height - row0)
        };
        let row_bytes = layout.chunk_width * spp * sample_bytes;
        let expected = stored_rows * row_bytes;

        let mut data = read_chunk(file, &layout, index)?;
        if data.len() < expected {
          return Err(RasterError::ChunkLength {
            index,
            expected,
            actual: data.len(),
          });
        }
        data.truncate(expected);
        if layout.predictor == PREDICTOR_HORIZONTAL {
          undo_horizontal_differencing(&mut data, row_bytes, spp, sample_bytes, big_endian);
        }

        let rows = stored_rows.min(layout.height - row0);
        let cols = layout.chunk_width.min(layout.width - col0);
        for r in 0..rows {
          for c in 0..cols {
            for s in 0..spp {
              let start = r * row_bytes + (c * spp + s) * sample_bytes;
              let raw = read_uint(&data[start..start + sample_bytes], big_endian);
              let band = if layout.planar { plane } else { s };
              bands[[band, row0 + r, col0 + c]] = layout.sample_type.value_from_bits(raw);
            }
          }
        }
      }
    }
  }

  let bands = bands.axis_iter(Axis(0)).map(|band| band.to_owned()).collect();
  Ok((layout.sample_type, bands))
}

fn read_chunk(file: &mut File, layout: &ChunkLayout, index: usize) -> Result<Vec<u8>, RasterError> {
  let length = usize::try_from(layout.byte_counts[index]).map_err(|_| RasterError::FileTooLarge)?;
  let mut compressed = vec![0u8; length];
  file.seek(SeekFrom::Start(layout.offsets[index]))?;
  file.read_exact(&mut compressed)?;

  match layout.compression {
    COMPRESSION_NONE => Ok(compressed),
    COMPRESSION_DEFLATE | COMPRESSION_ADOBE_DEFLATE => {
      let mut decoded = Vec::new();
      ZlibDecoder::new(&compressed[..]).read_to_end(&mut decoded)?;
      Ok(decoded)
    }
    COMPRESSION_LZW => {
      let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
      Ok(decoder.decode(&compressed)?)
    }
    other => Err(RasterError::UnsupportedCompression(other)),
  }
}

/// 按样本位宽还原水平差分，加法在该位宽上回绕
fn undo_horizontal_differencing(
  data: &mut [u8],
  row_bytes: usize,
  spp: usize,
  sample_bytes: usize,
  big_endian: bool,
) {
  let row_samples = row_bytes / sample_bytes;
  for row in data.chunks_exact_mut(row_bytes) {
    for i in spp..row_samples {
      let previous = (i - spp) * sample_bytes;
      let current = i * sample_bytes;
      let sum = read_uint(&row[previous..previous + sample_bytes], big_endian)
        .wrapping_add(read_uint(&row[current..current + sample_bytes], big_endian));
      write_uint(&mut row[current..current + sample_bytes], sum, big_endian);
    }
  }
}

fn read_uint(bytes: &[u8], big_endian: bool) -> u64 {
  let fold = |acc: u64, &b: &u8| (acc << 8) | u64::from(b);
  if big_endian {
    bytes.iter().fold(0, fold)
  } else {
    bytes.iter().rev().fold(0, fold)
  }
}

fn write_uint(bytes: &mut [u8], value: u64, big_endian: bool) {
  let len = bytes.len();
  for i in 0..len {
    let byte = (value >> (8 * i)) as u8;
    if big_endian {
      bytes[len - 1 - i] = byte;
    } else {
      bytes[i] = byte;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sample_bytes_follow_file_byte_order() {
    assert_eq!(read_uint(&[0x34, 0x12], false), 0x1234);
    assert_eq!(read_uint(&[0x12, 0x34], true), 0x1234);

    let mut bytes = [0u8; 4];
    write_uint(&mut bytes, 0xdead_beef, true);
    assert_eq!(bytes, [0xde, 0xad, 0xbe, 0xef]);
    write_uint(&mut bytes, 0xdead_beef, false);
    assert_eq!(bytes, [0xef, 0xbe, 0xad, 0xde]);
  }

  #[test]
  fn horizontal_differencing_wraps_per_sample() {
    // 两个像素、每像素两个 u8 样本：差分后 [250, 1, 10, 2] 还原为 [250, 1, 4, 3]
    let mut row = vec![250u8, 1, 10, 2];
    undo_horizontal_differencing(&mut row, 4, 2, 1, false);
    assert_eq!(row, vec![250, 1, 4, 3]);

    // u16 小端：[1000, 65535] 差分还原为 [1000, 999]
    let mut row: Vec<u8> = [1000u16, 65535].iter().flat_map(|v| v.to_le_bytes()).collect();
    undo_horizontal_differencing(&mut row, 4, 1, 2, false);
    assert_eq!(read_uint(&row[2..4], false), 999);
  }
}
