// 该文件是 Tianyan （天眼） 项目的一部分。
// src/decode.rs - 检测头输出解码与置信度过滤
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

use thiserror::Error;
use tracing::{debug, error};

use crate::tensor::{DType, TensorBuffer};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// 输出张量前四行依次为 cx, cy, w, h
const BOX_CHANNELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedOutputError {
  #[error("输出张量维度错误: 期望 3 维 [1, 4+C, N], 实际形状 {0:?}")]
  Rank(Vec<usize>),
  #[error("输出张量批大小错误: 期望 1, 实际形状 {0:?}")]
  Batch(Vec<usize>),
  #[error("输出张量通道数错误: 期望 {expected} (4 + {num_classes} 类), 实际形状 {shape:?}")]
  Channels {
    expected: usize,
    num_classes: usize,
    shape: Vec<usize>,
  },
  #[error("输出张量类型错误: 期望 f32, 实际 {0}")]
  DType(DType),
  #[error("缺少输出张量: {0}")]
  MissingOutput(String),
  #[error("类别数量必须大于 0")]
  NoClasses,
}

/// 模型输入像素空间中的一个候选框，中心点格式
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
  pub class_scores: Box<[f32]>,
}

impl RawCandidate {
  /// 最高分及其类别索引，同分时取较小的索引
  pub fn best_class(&self) -> (usize, f32) {
    let mut best = (0, f32::NEG_INFINITY);
    for (index, &score) in self.class_scores.iter().enumerate() {
      if score > best.1 {
        best = (index, score);
      }
    }
    best
  }
}

/// 通过置信度过滤的候选框
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub raw: RawCandidate,
  pub class_index: usize,
  pub score: f32,
}

/// 解码形状为 `[1, 4 + num_classes, N]` 的输出张量
pub fn decode(
  output: &TensorBuffer,
  num_classes: usize,
) -> Result<Vec<RawCandidate>, MalformedOutputError> {
  if num_classes == 0 {
    return Err(MalformedOutputError::NoClasses);
  }

  let shape = output.shape();
  if shape.len() != 3 {
    error!("输出张量维度错误: {:?}", shape);
    return Err(MalformedOutputError::Rank(shape.to_vec()));
  }
  if shape[0] != 1 {
    return Err(MalformedOutputError::Batch(shape.to_vec()));
  }
  let expected = BOX_CHANNELS + num_classes;
  if shape[1] != expected {
    error!("输出张量通道数错误: 期望 {}, 实际 {}", expected, shape[1]);
    return Err(MalformedOutputError::Channels {
      expected,
      num_classes,
      shape: shape.to_vec(),
    });
  }
  let data = output
    .as_f32()
    .ok_or(MalformedOutputError::DType(output.dtype()))?;

  let count = shape[2];
  let row = |channel: usize| &data[channel * count..(channel + 1) * count];
  let (cx, cy, w, h) = (row(0), row(1), row(2), row(3));

  let candidates = (0..count)
    .map(|i| RawCandidate {
      center_x: cx[i],
      center_y: cy[i],
      width: w[i],
      height: h[i],
      class_scores: (0..num_classes)
        .map(|c| data[(BOX_CHANNELS + c) * count + i])
        .collect(),
    })
    .collect::<Vec<_>>();

  debug!("解码得到 {} 个候选框", candidates.len());
  Ok(candidates)
}

/// 仅保留最高类别分数严格大于阈值的候选框
pub fn filter(candidates: Vec<RawCandidate>, confidence_threshold: f32) -> Vec<Candidate> {
  let kept = candidates
    .into_iter()
    .filter_map(|raw| {
      let (class_index, score) = raw.best_class();
      (score > confidence_threshold).then_some(Candidate {
        raw,
        class_index,
        score,
      })
    })
    .collect::<Vec<_>>();

  debug!(
    "置信度过滤 (阈值 {}) 后剩余 {} 个候选框",
    confidence_threshold,
    kept.len()
  );
  kept
}

pub fn decode_and_filter(
  output: &TensorBuffer,
  num_classes: usize,
  confidence_threshold: f32,
) -> Result<Vec<Candidate>, MalformedOutputError> {
  Ok(filter(decode(output, num_classes)?, confidence_threshold))
}
