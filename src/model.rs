// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model.rs - 推理引擎边界
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

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error};

use crate::tensor::{TensorMap, describe_shapes};

/// 引擎返回的原始错误
pub type EngineFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 执行前向推理的引擎，加载完成后只读且可跨线程共享
pub trait InferenceEngine: Send + Sync {
  fn infer(&self, inputs: &TensorMap) -> Result<TensorMap, EngineFailure>;
}

impl<F> InferenceEngine for F
where
  F: Fn(&TensorMap) -> Result<TensorMap, EngineFailure> + Send + Sync,
{
  fn infer(&self, inputs: &TensorMap) -> Result<TensorMap, EngineFailure> {
    self(inputs)
  }
}

/// 通用的模型抽象：输入一帧，输出结果
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum InferError {
  #[error("模型未加载: {model}")]
  ModelNotLoaded { model: String },
  #[error("模型 {model} 推理失败 (输入 {input_shapes}): {message}")]
  EngineExecution {
    model: String,
    message: String,
    input_shapes: String,
  },
  #[error("推理已取消")]
  Cancelled,
  #[error("推理超时: {0:?}")]
  TimedOut(Duration),
  #[error("推理线程池已关闭")]
  PoolClosed,
}

/// 模型句柄，由模型注册表发放
///
/// 句柄只是对已加载引擎的共享引用，克隆代价很低。
#[derive(Clone)]
pub struct ModelHandle {
  name: Arc<str>,
  engine: Option<Arc<dyn InferenceEngine>>,
}

impl ModelHandle {
  pub fn ready(name: impl Into<Arc<str>>, engine: Arc<dyn InferenceEngine>) -> Self {
    Self {
      name: name.into(),
      engine: Some(engine),
    }
  }

  pub fn unloaded(name: impl Into<Arc<str>>) -> Self {
    Self {
      name: name.into(),
      engine: None,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_ready(&self) -> bool {
    self.engine.is_some()
  }
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("name", &self.name)
      .field("ready", &self.is_ready())
      .finish()
  }
}

/// 同步调用引擎，阻塞当前线程直到前向推理结束
///
/// 不修改输入；失败时错误信息中附带输入张量的形状。
pub fn infer(handle: &ModelHandle, inputs: &TensorMap) -> Result<TensorMap, InferError> {
  let engine = handle
    .engine
    .as_ref()
    .ok_or_else(|| InferError::ModelNotLoaded {
      model: handle.name().to_string(),
    })?;

  debug!("执行模型推理: {} ({})", handle.name(), describe_shapes(inputs));
  let now = Instant::now();
  let outputs = engine.infer(inputs).map_err(|e| {
    error!("模型 {} 推理失败: {}", handle.name(), e);
    InferError::EngineExecution {
      model: handle.name().to_string(),
      message: e.to_string(),
      input_shapes: describe_shapes(inputs),
    }
  })?;
  debug!(
    "推理完成，耗时: {:.2?}, 输出 {}",
    now.elapsed(),
    describe_shapes(&outputs)
  );

  Ok(outputs)
}

pub mod dispatch;
pub mod registry;
#[cfg(feature = "model_tract")]
pub mod tract;

pub use self::dispatch::{CancellationToken, InferencePool, PendingInference};
pub use self::registry::{ModelLoader, ModelRegistry, RegistryError};
#[cfg(feature = "model_tract")]
pub use self::tract::{TractEngine, TractEngineError, TractLoader};
