// 该文件是 Tianyan （天眼） 项目的一部分。
// src/labels.rs - 类别标签表
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

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

/// COCO 数据集类别名称（80 类，按官方顺序）
pub const COCO_LABELS: [&str; 80] = [
  "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
  "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
  "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
  "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
  "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
  "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
  "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
  "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
  "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
  "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签文件解析错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("标签表为空")]
  Empty,
}

#[derive(Deserialize)]
struct LabelFile {
  labels: Vec<String>,
}

/// 类别索引到名称的不可变映射
///
/// 越界索引不会失败，而是返回合成的 `class_<index>` 标签。
#[derive(Debug, Clone, Default)]
pub enum LabelTable {
  #[default]
  Coco,
  Custom(Arc<[String]>),
}

impl LabelTable {
  pub fn coco() -> Self {
    LabelTable::Coco
  }

  pub fn custom<I, S>(labels: I) -> Result<Self, LabelError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(LabelTable::Custom(labels.into()))
  }

  /// 解析形如 `labels = ["cat", "dog"]` 的 TOML 文本
  pub fn from_toml_str(text: &str) -> Result<Self, LabelError> {
    let file: LabelFile = toml::from_str(text)?;
    Self::custom(file.labels)
  }

  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_toml_str(&text)
  }

  pub fn len(&self) -> usize {
    match self {
      LabelTable::Coco => COCO_LABELS.len(),
      LabelTable::Custom(labels) => labels.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    match self {
      LabelTable::Coco => COCO_LABELS.get(index).copied(),
      LabelTable::Custom(labels) => labels.get(index).map(String::as_str),
    }
  }

  pub fn label(&self, index: usize) -> Cow<'_, str> {
    match self.get(index) {
      Some(label) => Cow::Borrowed(label),
      None => Cow::Owned(format!("class_{}", index)),
    }
  }
}
