// 该文件是 Tianyan （天眼） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use serde::Serialize;

/// 轴对齐边界框，左上角坐标加宽高
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由中心点格式 `(cx, cy, w, h)` 构造
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  /// 裁剪到 `[0, width] x [0, height]` 范围内
  pub fn clamp_to(&self, width: f32, height: f32) -> Self {
    let x_min = self.x.clamp(0.0, width);
    let y_min = self.y.clamp(0.0, height);
    let x_max = self.right().clamp(0.0, width);
    let y_max = self.bottom().clamp(0.0, height);
    Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
  }
}

/// 单个检测目标，坐标位于原始图像像素空间，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_index: usize,
  pub label: String,
  /// 引擎给出的原始类别分数，任何阶段都不裁剪；
  /// 对输出 sigmoid 概率的模型即位于 `[0, 1]`
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
