// 该文件是 Tianyan （天眼） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tianyan::{
  DetectionPipeline, Detector, FromUrl,
  input::InputWrapper,
  model::{CancellationToken, InferencePool, ModelRegistry, TractLoader},
  output::OutputWrapper,
  task::{ContinuousTask, Task, install_interrupt_handler},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  let config = args.pipeline_config().context("读取流水线配置失败")?;

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!(
    "置信度阈值: {}, NMS 阈值: {}, 输入边长: {}",
    config.confidence_threshold, config.iou_threshold, config.target_size
  );

  // 预处理与引擎共用同一输入边长
  let loader = TractLoader::from_url(&args.model)?.with_input_size(config.target_size);
  let name = TractLoader::model_name(&args.model)?;
  let registry = ModelRegistry::new(loader);
  let handle = registry
    .get_or_load(&name)
    .with_context(|| format!("无法加载模型 {}", name))?;
  info!("模型加载完成: {}", handle.name());

  let pool = Arc::new(InferencePool::new(config.workers, config.queue_capacity));
  let pipeline = DetectionPipeline::from_config(config)?;

  let token = CancellationToken::new();
  install_interrupt_handler(token.clone())?;
  let detector = Detector::new(pipeline, handle)
    .with_pool(pool)
    .with_token(token.clone());

  let input = InputWrapper::from_url(&args.input)
    .with_context(|| format!("无法打开输入 {}", args.input))?;
  let output = OutputWrapper::from_url(&args.output)
    .with_context(|| format!("无法创建输出 {}", args.output))?;

  ContinuousTask::default()
    .with_frame_number(args.max_frames)
    .with_token(token)
    .run_task(input, detector, output)?;

  Ok(())
}
