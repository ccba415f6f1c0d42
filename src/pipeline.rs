// 该文件是 Tianyan （天眼） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

//! 图像字节 -> letterbox -> 推理 -> 解码 -> 置信度过滤 -> 坐标还原 -> NMS。
//!
//! 流水线本身无状态，可在多个线程中同时调用；唯一共享的是模型句柄。
//! 所有错误都原样返回给调用方，不会被替换为空结果。

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::{
  config::{ConfigError, PipelineConfig},
  decode::{MalformedOutputError, decode_and_filter},
  detection::{DetectResult, Detection},
  frame::{InvalidImageError, RgbFrame},
  labels::LabelTable,
  model::{CancellationToken, InferError, InferencePool, Model, ModelHandle, infer},
  nms::nms,
  preprocess::{LetterboxTransform, preprocess},
  remap::remap_and_build,
  tensor::TensorMap,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像无效: {0}")]
  InvalidImage(#[from] InvalidImageError),
  #[error("推理错误: {0}")]
  Infer(#[from] InferError),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(#[from] MalformedOutputError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct DetectionPipeline {
  config: PipelineConfig,
  labels: LabelTable,
}

impl DetectionPipeline {
  pub fn new(config: PipelineConfig, labels: LabelTable) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self { config, labels })
  }

  /// 按配置加载标签表后构造
  pub fn from_config(config: PipelineConfig) -> Result<Self, ConfigError> {
    let labels = config.labels()?;
    Self::new(config, labels)
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  /// 预处理并组装引擎输入
  pub fn prepare(&self, frame: &RgbFrame) -> Result<(TensorMap, LetterboxTransform), PipelineError> {
    let (tensor, transform) = preprocess(frame, self.config.target_size)?;
    let mut inputs = TensorMap::new();
    inputs.insert(self.config.input_name.clone(), tensor);
    Ok((inputs, transform))
  }

  /// 引擎输出 -> 原图坐标下经过 NMS 的检测结果
  pub fn postprocess(
    &self,
    outputs: &TensorMap,
    transform: &LetterboxTransform,
  ) -> Result<Vec<Detection>, PipelineError> {
    let output = outputs
      .get(&self.config.output_name)
      .ok_or_else(|| MalformedOutputError::MissingOutput(self.config.output_name.clone()))?;

    let candidates = decode_and_filter(
      output,
      self.config.num_classes,
      self.config.confidence_threshold,
    )?;
    let detections = remap_and_build(&candidates, transform, &self.labels);
    let detections = nms(detections, self.config.iou_threshold);

    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }

  /// 在当前线程上同步执行整条流水线
  pub fn detect(&self, handle: &ModelHandle, frame: &RgbFrame) -> Result<Vec<Detection>, PipelineError> {
    let (inputs, transform) = self.prepare(frame)?;
    let outputs = infer(handle, &inputs)?;
    self.postprocess(&outputs, &transform)
  }

  pub fn detect_bytes(&self, handle: &ModelHandle, bytes: &[u8]) -> Result<Vec<Detection>, PipelineError> {
    let frame = RgbFrame::decode(bytes)?;
    self.detect(handle, &frame)
  }

  /// 前向推理交给线程池执行，可取消，超时取自配置
  pub fn detect_with_pool(
    &self,
    pool: &InferencePool,
    handle: &ModelHandle,
    frame: &RgbFrame,
    token: CancellationToken,
  ) -> Result<Vec<Detection>, PipelineError> {
    let (inputs, transform) = self.prepare(frame)?;
    let outputs = pool.run(handle.clone(), inputs, token, self.config.timeout())?;
    self.postprocess(&outputs, &transform)
  }
}

/// 绑定了模型句柄（以及可选线程池）的检测器
pub struct Detector {
  pipeline: DetectionPipeline,
  handle: ModelHandle,
  pool: Option<Arc<InferencePool>>,
  token: CancellationToken,
}

impl Detector {
  pub fn new(pipeline: DetectionPipeline, handle: ModelHandle) -> Self {
    Self {
      pipeline,
      handle,
      pool: None,
      token: CancellationToken::new(),
    }
  }

  pub fn with_pool(mut self, pool: Arc<InferencePool>) -> Self {
    self.pool = Some(pool);
    self
  }

  pub fn with_token(mut self, token: CancellationToken) -> Self {
    self.token = token;
    self
  }

  pub fn pipeline(&self) -> &DetectionPipeline {
    &self.pipeline
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }
}

impl Model for Detector {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let detections = match &self.pool {
      Some(pool) => self
        .pipeline
        .detect_with_pool(pool, &self.handle, input, self.token.clone())?,
      None => {
        if self.token.is_cancelled() {
          return Err(InferError::Cancelled.into());
        }
        self.pipeline.detect(&self.handle, input)?
      }
    };
    Ok(detections.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::EngineFailure;
  use crate::tensor::TensorBuffer;

  fn engine_returning(output: TensorBuffer) -> ModelHandle {
    let engine = move |_: &TensorMap| -> Result<TensorMap, EngineFailure> {
      let mut map = TensorMap::new();
      map.insert("output0".into(), output.clone());
      Ok(map)
    };
    ModelHandle::ready("fake", Arc::new(engine))
  }

  fn pipeline(num_classes: usize) -> DetectionPipeline {
    let config = PipelineConfig {
      num_classes,
      ..Default::default()
    };
    DetectionPipeline::new(config, LabelTable::coco()).unwrap()
  }

  #[test]
  fn missing_output_is_malformed() {
    let engine = |_: &TensorMap| -> Result<TensorMap, EngineFailure> { Ok(TensorMap::new()) };
    let handle = ModelHandle::ready("fake", Arc::new(engine));
    let frame = RgbFrame::from_rgb(4, 4, vec![0; 48]).unwrap();
    let err = pipeline(80).detect(&handle, &frame).unwrap_err();
    assert!(matches!(
      err,
      PipelineError::MalformedOutput(MalformedOutputError::MissingOutput(name)) if name == "output0"
    ));
  }

  #[test]
  fn empty_filter_result_is_not_an_error() {
    let output = TensorBuffer::from_f32([1, 5, 2], vec![10.0, 20.0, 10.0, 20.0, 4.0, 4.0, 4.0, 4.0, 0.1, 0.2])
      .unwrap();
    let frame = RgbFrame::from_rgb(4, 4, vec![0; 48]).unwrap();
    let dets = pipeline(1).detect(&engine_returning(output), &frame).unwrap();
    assert!(dets.is_empty());
  }

  #[test]
  fn invalid_config_is_rejected() {
    let config = PipelineConfig {
      target_size: 0,
      ..Default::default()
    };
    assert!(DetectionPipeline::new(config, LabelTable::coco()).is_err());
  }

  #[test]
  fn cancelled_detector_does_not_run() {
    let token = CancellationToken::new();
    token.cancel();
    let output = TensorBuffer::from_f32([1, 5, 0], Vec::new()).unwrap();
    let detector = Detector::new(pipeline(1), engine_returning(output)).with_token(token);
    let frame = RgbFrame::from_rgb(2, 2, vec![0; 12]).unwrap();
    assert!(matches!(
      detector.infer(&frame),
      Err(PipelineError::Infer(InferError::Cancelled))
    ));
  }
}
