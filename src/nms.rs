// 该文件是 Tianyan （天眼） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::detection::{BoundingBox, Detection};

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 计算两个边界框的 IoU，并集为 0 时返回 0
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别的贪心非极大值抑制
///
/// 先按置信度降序稳定排序（同分保持原顺序），每次取出最高者，
/// 再移除同类别且 IoU 不小于 `iou_threshold` 的其余框。
/// 不同类别之间从不相互抑制。输出顺序即保留顺序。
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  let total = detections.len();
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());

  // 排序后每个框只需与已保留的框比较
  for candidate in detections {
    let suppressed = kept.iter().any(|best| {
      best.class_index == candidate.class_index && iou(&best.bbox, &candidate.bbox) >= iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }

  debug!("NMS (阈值 {}) 保留 {}/{} 个目标", iou_threshold, kept.len(), total);
  kept
}
