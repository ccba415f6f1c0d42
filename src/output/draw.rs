// 该文件是 Tianyan （天眼） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

//! 只绘制按类别着色的空心框，不渲染类别文字（需要额外的字体文件）。
//! 类别与置信度可通过 `json://` 输出获取。

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
  detection::{DetectResult, Detection},
  frame::RgbFrame,
};

const BOX_THICKNESS: u32 = 2;
// 按类别索引循环取色
const PALETTE: [[u8; 3]; 6] = [
  [0, 0, 255],
  [255, 56, 56],
  [72, 249, 10],
  [255, 157, 151],
  [0, 194, 255],
  [255, 178, 29],
];

pub struct Draw {
  thickness: u32,
  palette: Vec<[u8; 3]>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      palette: PALETTE.to_vec(),
    }
  }
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  fn color(&self, class_index: usize) -> Rgb<u8> {
    Rgb(self.palette[class_index % self.palette.len()])
  }

  /// 在图像上绘制一个检测框，坐标先裁剪到图像范围内
  fn draw_bbox(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let bbox = detection.bbox.clamp_to(w, h);

    let x_min = bbox.x.floor() as i32;
    let y_min = bbox.y.floor() as i32;
    let x_max = (bbox.right().ceil() as i32).min(w as i32 - 1);
    let y_max = (bbox.bottom().ceil() as i32).min(h as i32 - 1);

    let color = self.color(detection.class_index);
    for t in 0..self.thickness as i32 {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  pub fn draw_detection(&self, frame: &RgbFrame, result: &DetectResult) -> RgbImage {
    let mut image = frame.as_image().clone();
    for detection in result {
      self.draw_bbox(&mut image, detection);
    }
    image
  }
}
