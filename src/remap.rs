// 该文件是 Tianyan （天眼） 项目的一部分。
// src/remap.rs - 坐标还原
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

use crate::{
  decode::Candidate,
  detection::{BoundingBox, Detection},
  labels::LabelTable,
  preprocess::LetterboxTransform,
};

/// 将模型输入空间的中心点格式框还原到原图像素空间
///
/// 结果不做边界裁剪，需要时由调用方调用 [`BoundingBox::clamp_to`]。
pub fn remap(
  center_x: f32,
  center_y: f32,
  width: f32,
  height: f32,
  transform: &LetterboxTransform,
) -> BoundingBox {
  let scale = transform.scale;
  BoundingBox::new(
    (center_x - width / 2.0 - transform.pad_x) / scale,
    (center_y - height / 2.0 - transform.pad_y) / scale,
    width / scale,
    height / scale,
  )
}

pub fn remap_and_build(
  candidates: &[Candidate],
  transform: &LetterboxTransform,
  labels: &LabelTable,
) -> Vec<Detection> {
  candidates
    .iter()
    .map(|candidate| {
      let raw = &candidate.raw;
      Detection {
        class_index: candidate.class_index,
        label: labels.label(candidate.class_index).into_owned(),
        confidence: candidate.score,
        bbox: remap(raw.center_x, raw.center_y, raw.width, raw.height, transform),
      }
    })
    .collect()
}
