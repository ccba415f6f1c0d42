// 该文件是 Tianyan （天眼） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  decode::DEFAULT_CONFIDENCE_THRESHOLD,
  labels::{LabelError, LabelTable},
  nms::DEFAULT_IOU_THRESHOLD,
  preprocess::DEFAULT_TARGET_SIZE,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
  #[error("标签表错误: {0}")]
  Labels(#[from] LabelError),
}

impl ConfigError {
  fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    ConfigError::Invalid {
      field,
      reason: reason.into(),
    }
  }
}

/// 检测流水线参数，TOML 中缺省的字段取默认值
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  /// 模型正方形输入边长
  pub target_size: u32,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub num_classes: usize,
  pub input_name: String,
  pub output_name: String,
  /// 自定义标签表文件，缺省使用 COCO
  pub label_file: Option<PathBuf>,
  pub workers: usize,
  pub queue_capacity: usize,
  pub timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      target_size: DEFAULT_TARGET_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      num_classes: 80,
      input_name: "images".to_string(),
      output_name: "output0".to_string(),
      label_file: None,
      workers: 1,
      queue_capacity: 4,
      timeout_ms: None,
    }
  }
}

impl PipelineConfig {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_toml_str(&text)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.target_size == 0 {
      return Err(ConfigError::invalid("target_size", "必须大于 0"));
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::invalid(
        "confidence_threshold",
        format!("{} 不在 [0, 1] 范围内", self.confidence_threshold),
      ));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(ConfigError::invalid(
        "iou_threshold",
        format!("{} 不在 [0, 1] 范围内", self.iou_threshold),
      ));
    }
    if self.num_classes == 0 {
      return Err(ConfigError::invalid("num_classes", "必须大于 0"));
    }
    if self.workers == 0 {
      return Err(ConfigError::invalid("workers", "必须大于 0"));
    }
    if self.queue_capacity == 0 {
      return Err(ConfigError::invalid("queue_capacity", "必须大于 0"));
    }
    Ok(())
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }

  /// 模型地址中的 `?size=S` 描述了模型的固定输入边长，存在时以它为准
  pub fn apply_model_url(&mut self, url: &Url) -> Result<(), ConfigError> {
    let Some(size) = model_input_size(url)? else {
      return Ok(());
    };
    if size != self.target_size {
      warn!(
        "模型地址指定输入边长 {}, 覆盖配置中的 {}",
        size, self.target_size
      );
      self.target_size = size;
    }
    self.validate()
  }

  pub fn labels(&self) -> Result<LabelTable, ConfigError> {
    match &self.label_file {
      Some(path) => Ok(LabelTable::from_toml_file(path)?),
      None => Ok(LabelTable::coco()),
    }
  }
}

/// 解析模型地址中的 `size` 查询参数
pub fn model_input_size(url: &Url) -> Result<Option<u32>, ConfigError> {
  match url.query_pairs().find(|(key, _)| key == "size") {
    Some((_, value)) => value
      .parse()
      .map(Some)
      .map_err(|_| ConfigError::invalid("size", format!("'{}' 不是有效的输入边长", value))),
    None => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn defaults_match_detection_conventions() {
    let config = PipelineConfig::default();
    assert_eq!(config.target_size, 640);
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.iou_threshold, 0.45);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_toml_keeps_defaults() {
    let config = PipelineConfig::from_toml_str(
      r#"
        confidence_threshold = 0.25
        timeout_ms = 1500
      "#,
    )
    .unwrap();
    assert_eq!(config.confidence_threshold, 0.25);
    assert_eq!(config.iou_threshold, 0.45);
    assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
  }

  #[test]
  fn rejects_out_of_range_thresholds() {
    let err = PipelineConfig::from_toml_str("iou_threshold = 1.5").unwrap_err();
    assert!(matches!(
      err,
      ConfigError::Invalid {
        field: "iou_threshold",
        ..
      }
    ));
  }

  #[test]
  fn rejects_unknown_fields() {
    assert!(matches!(
      PipelineConfig::from_toml_str("nms = 0.4"),
      Err(ConfigError::Parse(_))
    ));
  }

  #[test]
  fn loads_custom_label_file() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("labels.toml");
    std::fs::File::create(&labels)
      .unwrap()
      .write_all(br#"labels = ["uniform", "apron"]"#)
      .unwrap();

    let config = PipelineConfig {
      num_classes: 2,
      label_file: Some(labels),
      ..Default::default()
    };
    let table = config.labels().unwrap();
    assert_eq!(table.label(1), "apron");
  }

  #[test]
  fn model_url_size_sets_target_size() {
    let url = Url::parse("tract:///models/yolo.onnx?size=320").unwrap();
    let mut config = PipelineConfig::default();
    config.apply_model_url(&url).unwrap();
    assert_eq!(config.target_size, 320);

    let plain = Url::parse("tract:///models/yolo.onnx").unwrap();
    let mut config = PipelineConfig::default();
    config.apply_model_url(&plain).unwrap();
    assert_eq!(config.target_size, 640);
  }

  #[test]
  fn model_url_with_bad_size_is_rejected() {
    for query in ["size=abc", "size=0"] {
      let url = Url::parse(&format!("tract:///models/yolo.onnx?{}", query)).unwrap();
      let err = PipelineConfig::default().apply_model_url(&url).unwrap_err();
      assert!(matches!(err, ConfigError::Invalid { .. }), "{}", query);
    }
  }
}
