// 该文件是 Tianyan （天眼） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use tianyan::{
  PipelineConfig,
  config::{ConfigError, model_input_size},
};
use url::Url;

/// Tianyan 目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 tract:///models/yolo.onnx?size=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 单张图片: image:///path/to/photo.jpg
  /// - 图片目录: folder:///path/to/dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 标注图片: image:///path/to/out.png
  /// - 检测记录: json:///path/to/out.jsonl
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 流水线配置文件 (TOML)
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 模型输入边长
  #[arg(long, value_name = "PIXELS")]
  pub target_size: Option<u32>,

  /// 最大处理帧数，缺省表示无限制
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,

  /// 单次推理超时（毫秒）
  #[arg(long, value_name = "MILLIS")]
  pub timeout_ms: Option<u64>,
}

impl Args {
  /// 读取配置文件并应用命令行覆盖项，模型输入边长以模型地址为准
  pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_toml_file(path)?,
      None => PipelineConfig::default(),
    };
    if let Some(confidence) = self.confidence {
      config.confidence_threshold = confidence;
    }
    if let Some(nms_threshold) = self.nms_threshold {
      config.iou_threshold = nms_threshold;
    }
    if let Some(target_size) = self.target_size {
      if let Some(size) = model_input_size(&self.model)?
        && size != target_size
      {
        return Err(ConfigError::Invalid {
          field: "target_size",
          reason: format!("--target-size {} 与模型地址中的 size={} 不一致", target_size, size),
        });
      }
      config.target_size = target_size;
    }
    if let Some(timeout_ms) = self.timeout_ms {
      config.timeout_ms = Some(timeout_ms);
    }
    config.apply_model_url(&self.model)?;
    Ok(config)
  }
}
