// 该文件是 Tianyan （天眼） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{ImageReader, RgbImage};
use thiserror::Error;

use crate::tensor::TensorError;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum InvalidImageError {
  #[error("图像尺寸无效: {width}x{height}")]
  ZeroDimension { width: u32, height: u32 },
  #[error("图像数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  BufferLength { expected: usize, actual: usize },
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

impl From<TensorError> for InvalidImageError {
  fn from(err: TensorError) -> Self {
    match err {
      TensorError::ShapeMismatch {
        expected, actual, ..
      } => InvalidImageError::BufferLength { expected, actual },
    }
  }
}

/// 已解码的 RGB 图像，像素为交错（HWC）排列，alpha 通道被丢弃
#[derive(Debug, Clone)]
pub struct RgbFrame {
  image: RgbImage,
}

impl RgbFrame {
  /// 从编码后的字节（PNG、JPEG）解码
  pub fn decode(bytes: &[u8]) -> Result<Self, InvalidImageError> {
    let image = image::load_from_memory(bytes)?;
    Self::try_from(image.to_rgb8())
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, InvalidImageError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Self::try_from(image.to_rgb8())
  }

  /// 从交错排列的 RGB 原始数据构造
  pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, InvalidImageError> {
    if width == 0 || height == 0 {
      return Err(InvalidImageError::ZeroDimension { width, height });
    }

    let expected = RGB_CHANNELS * width as usize * height as usize;
    let actual = data.len();
    let image = RgbImage::from_raw(width, height, data)
      .ok_or(InvalidImageError::BufferLength { expected, actual })?;

    Ok(Self { image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

impl TryFrom<RgbImage> for RgbFrame {
  type Error = InvalidImageError;

  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(InvalidImageError::ZeroDimension { width, height });
    }
    Ok(Self { image })
  }
}
