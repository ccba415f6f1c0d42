// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理引擎
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

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, model_input_size},
  model::{EngineFailure, InferenceEngine},
  preprocess::DEFAULT_TARGET_SIZE,
  tensor::{TensorBuffer, TensorData, TensorError, TensorMap},
};

pub const DEFAULT_INPUT_NAME: &str = "images";
pub const DEFAULT_OUTPUT_NAME: &str = "output0";

#[derive(Error, Debug)]
pub enum TractEngineError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("缺少输入张量: {0}")]
  MissingInput(String),
  #[error("不支持的输入类型, 仅支持 f32")]
  UnsupportedInput,
  #[error("输出张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("模型地址无效: {0}")]
  InvalidUrl(#[from] ConfigError),
  #[error("tract 错误: {0}")]
  Tract(#[from] TractError),
}

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// 已优化、可运行的 ONNX 模型
pub struct TractEngine {
  plan: Plan,
  input_name: String,
  output_names: Vec<String>,
}

impl TractEngine {
  /// 加载 ONNX 模型，输入固定为 `[1, 3, size, size]` 的 f32 张量
  pub fn load(path: impl AsRef<Path>, input_size: u32) -> Result<Self, TractEngineError> {
    let path = path.as_ref();
    info!("加载 ONNX 模型文件: {}", path.display());
    let size = input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(path)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )?
      .into_optimized()?
      .into_runnable()?;

    let output_names = (0..plan.model().outputs.len())
      .map(|i| match i {
        0 => DEFAULT_OUTPUT_NAME.to_string(),
        i => format!("output{}", i),
      })
      .collect::<Vec<_>>();
    debug!("模型输出: {:?}", output_names);

    Ok(Self {
      plan,
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_names,
    })
  }

  fn run(&self, inputs: &TensorMap) -> Result<TensorMap, TractEngineError> {
    let input = inputs
      .get(&self.input_name)
      .ok_or_else(|| TractEngineError::MissingInput(self.input_name.clone()))?;
    let data = match input.data() {
      TensorData::F32(data) => data,
      _ => return Err(TractEngineError::UnsupportedInput),
    };
    let tensor = Tensor::from_shape(input.shape(), &data[..])?;

    let outputs = self.plan.run(tvec!(tensor.into()))?;

    let mut map = TensorMap::new();
    for (name, value) in self.output_names.iter().zip(outputs.iter()) {
      let view = value.to_array_view::<f32>()?;
      let buffer = TensorBuffer::from_f32(view.shape().to_vec(), view.iter().copied().collect())?;
      map.insert(name.clone(), buffer);
    }
    Ok(map)
  }
}

impl InferenceEngine for TractEngine {
  fn infer(&self, inputs: &TensorMap) -> Result<TensorMap, EngineFailure> {
    self.run(inputs).map_err(|e| Box::new(e) as EngineFailure)
  }
}

/// 按文件路径加载模型，`tract:///path/to/model.onnx`
#[derive(Debug, Clone)]
pub struct TractLoader {
  input_size: u32,
}

impl Default for TractLoader {
  fn default() -> Self {
    Self {
      input_size: DEFAULT_TARGET_SIZE,
    }
  }
}

impl TractLoader {
  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  /// 模型 URL 对应的注册表名称（文件路径）
  pub fn model_name(url: &Url) -> Result<String, TractEngineError> {
    if url.scheme() != Self::SCHEME {
      return Err(TractEngineError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }
    Ok(url.path().to_string())
  }
}

impl FromUrlWithScheme for TractLoader {
  const SCHEME: &'static str = "tract";
}

impl FromUrl for TractLoader {
  type Error = TractEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::model_name(url)?;
    let input_size = model_input_size(url)?.unwrap_or(DEFAULT_TARGET_SIZE);
    Ok(Self { input_size })
  }
}

impl crate::model::ModelLoader for TractLoader {
  fn load(&self, name: &str) -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
    let engine = TractEngine::load(name, self.input_size)?;
    Ok(Arc::new(engine))
  }
}
