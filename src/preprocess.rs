// 该文件是 Tianyan （天眼） 项目的一部分。
// src/preprocess.rs - Letterbox 预处理
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

//! 将任意尺寸的图像缩放到固定的正方形输入。
//!
//! 约定：缩放后的图像放在画布左上角，只在右侧和下方填充灰色（114），
//! 因此 `pad_x` 与 `pad_y` 恒为 0。坐标还原（见 [`crate::remap`]）依赖同一约定。
//! 重采样使用双线性插值（`FilterType::Triangle`）。

use image::imageops::{self, FilterType};
use tracing::debug;

use crate::{
  detection::BoundingBox,
  frame::{InvalidImageError, RGB_CHANNELS, RgbFrame},
  tensor::TensorBuffer,
};

pub const DEFAULT_TARGET_SIZE: u32 = 640;
/// 填充颜色（0-255 空间），三个通道相同
pub const PAD_VALUE: u8 = 114;

/// 预处理时记录的几何变换，供坐标还原使用
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub src_width: u32,
  pub src_height: u32,
  pub resized_width: u32,
  pub resized_height: u32,
  pub dst_size: u32,
}

impl LetterboxTransform {
  pub fn new(src_width: u32, src_height: u32, dst_size: u32) -> Result<Self, InvalidImageError> {
    if src_width == 0 || src_height == 0 || dst_size == 0 {
      return Err(InvalidImageError::ZeroDimension {
        width: src_width,
        height: src_height,
      });
    }

    let scale = dst_size as f32 / src_width.max(src_height) as f32;
    let resized_width = ((src_width as f32 * scale).round() as u32).clamp(1, dst_size);
    let resized_height = ((src_height as f32 * scale).round() as u32).clamp(1, dst_size);

    Ok(Self {
      scale,
      pad_x: 0.0,
      pad_y: 0.0,
      src_width,
      src_height,
      resized_width,
      resized_height,
      dst_size,
    })
  }

  /// 原图坐标 -> 模型输入坐标（左上角格式）
  pub fn project(&self, bbox: &BoundingBox) -> BoundingBox {
    BoundingBox::new(
      bbox.x * self.scale + self.pad_x,
      bbox.y * self.scale + self.pad_y,
      bbox.width * self.scale,
      bbox.height * self.scale,
    )
  }
}

/// 对已解码图像做 letterbox，并打包为 `[1, 3, S, S]` 的归一化平面张量
pub fn preprocess(
  frame: &RgbFrame,
  target_size: u32,
) -> Result<(TensorBuffer, LetterboxTransform), InvalidImageError> {
  let transform = LetterboxTransform::new(frame.width(), frame.height(), target_size)?;

  let source = frame.as_image();
  let resized;
  let image = if (transform.resized_width, transform.resized_height) == source.dimensions() {
    source
  } else {
    resized = imageops::resize(
      source,
      transform.resized_width,
      transform.resized_height,
      FilterType::Triangle,
    );
    &resized
  };

  let size = target_size as usize;
  let plane = size * size;
  let mut data = vec![PAD_VALUE as f32 / 255.0; RGB_CHANNELS * plane];

  // HWC -> CHW，同时归一化到 [0, 1]
  for (x, y, pixel) in image.enumerate_pixels() {
    let offset = y as usize * size + x as usize;
    for c in 0..RGB_CHANNELS {
      data[c * plane + offset] = pixel[c] as f32 / 255.0;
    }
  }

  debug!(
    "预处理完成: {}x{} -> {}x{} (缩放 {:.4}, 画布 {})",
    frame.width(),
    frame.height(),
    transform.resized_width,
    transform.resized_height,
    transform.scale,
    target_size
  );

  let tensor = TensorBuffer::from_f32([1, RGB_CHANNELS, size, size], data)?;

  Ok((tensor, transform))
}

/// 解码图像字节后做预处理
pub fn preprocess_bytes(
  bytes: &[u8],
  target_size: u32,
) -> Result<(TensorBuffer, LetterboxTransform), InvalidImageError> {
  let frame = RgbFrame::decode(bytes)?;
  preprocess(&frame, target_size)
}
