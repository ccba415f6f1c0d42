// 该文件是 Tianyan （天眼） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理同一张图像以测量耗时
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use tianyan::{
  DetectionPipeline, Detector, FromUrl, PipelineConfig,
  input::InputWrapper,
  model::{ModelRegistry, TractLoader},
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value = "100")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut config = PipelineConfig::default();
  config.apply_model_url(&args.model)?;
  // 预处理与引擎共用同一输入边长
  let loader = TractLoader::from_url(&args.model)?.with_input_size(config.target_size);
  let registry = ModelRegistry::new(loader);
  let name = TractLoader::model_name(&args.model)?;
  let handle = registry
    .get_or_load(&name)
    .with_context(|| format!("无法加载模型 {}", name))?;

  let pipeline = DetectionPipeline::from_config(config)?;
  let detector = Detector::new(pipeline, handle);
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(input, detector, output)?;

  Ok(())
}
