// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/registry.rs - 模型注册表
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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info};

use crate::model::{EngineFailure, InferenceEngine, ModelHandle};

/// 按名称加载模型
pub trait ModelLoader: Send + Sync {
  fn load(&self, name: &str) -> Result<Arc<dyn InferenceEngine>, EngineFailure>;
}

impl<F> ModelLoader for F
where
  F: Fn(&str) -> Result<Arc<dyn InferenceEngine>, EngineFailure> + Send + Sync,
{
  fn load(&self, name: &str) -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
    self(name)
  }
}

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("模型 {model} 加载失败: {source}")]
  LoadFailed {
    model: String,
    #[source]
    source: EngineFailure,
  },
}

type Slot = Arc<Mutex<Option<Arc<dyn InferenceEngine>>>>;

/// 模型名称到已加载引擎的映射
///
/// 同一名称的并发首次请求只会触发一次加载：每个名称对应一个独立的槽位锁，
/// 后到的调用者等待槽位并直接复用结果。加载失败时槽位保持为空，下次调用会重试。
pub struct ModelRegistry<L> {
  loader: L,
  slots: Mutex<HashMap<String, Slot>>,
}

impl<L: ModelLoader> ModelRegistry<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      slots: Mutex::new(HashMap::new()),
    }
  }

  fn slot(&self, name: &str) -> Slot {
    self
      .slots
      .lock()
      .entry(name.to_string())
      .or_default()
      .clone()
  }

  /// 获取已加载的模型，不存在时加载
  pub fn get_or_load(&self, name: &str) -> Result<ModelHandle, RegistryError> {
    let slot = self.slot(name);
    // 只持有该名称的槽位锁，不阻塞其他模型
    let mut guard = slot.lock();
    if let Some(engine) = guard.as_ref() {
      return Ok(ModelHandle::ready(name, engine.clone()));
    }

    info!("加载模型: {}", name);
    let now = Instant::now();
    let engine = self.loader.load(name).map_err(|source| {
      error!("模型 {} 加载失败: {}", name, source);
      RegistryError::LoadFailed {
        model: name.to_string(),
        source,
      }
    })?;
    info!("模型 {} 加载完成，耗时: {:.2?}", name, now.elapsed());

    *guard = Some(engine.clone());
    Ok(ModelHandle::ready(name, engine))
  }

  /// 返回当前句柄，不触发加载；未加载时句柄处于未就绪状态
  pub fn handle(&self, name: &str) -> ModelHandle {
    let slot = self.slots.lock().get(name).cloned();
    let engine = match slot {
      Some(slot) => slot.lock().clone(),
      None => None,
    };
    match engine {
      Some(engine) => ModelHandle::ready(name, engine),
      None => ModelHandle::unloaded(name),
    }
  }

  /// 卸载模型；已发放的句柄仍可继续使用
  ///
  /// 槽位本身保留在表中，正在进行的加载结束后才清空，
  /// 因此卸载期间到来的请求仍在同一槽位上排队。
  pub fn unload(&self, name: &str) -> bool {
    let Some(slot) = self.slots.lock().get(name).cloned() else {
      return false;
    };
    let engine = slot.lock().take();
    engine.is_some()
  }

  pub fn is_loaded(&self, name: &str) -> bool {
    self.handle(name).is_ready()
  }

  pub fn loaded_models(&self) -> Vec<String> {
    let slots = self
      .slots
      .lock()
      .iter()
      .map(|(name, slot)| (name.clone(), slot.clone()))
      .collect::<Vec<_>>();
    let mut names = slots
      .into_iter()
      .filter(|(_, slot)| slot.lock().is_some())
      .map(|(name, _)| name)
      .collect::<Vec<_>>();
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::infer;
  use crate::tensor::TensorMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn echo() -> Arc<dyn InferenceEngine> {
    Arc::new(|inputs: &TensorMap| -> Result<TensorMap, EngineFailure> { Ok(inputs.clone()) })
  }

  #[test]
  fn loads_once_and_reuses() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let registry = ModelRegistry::new(move |_: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(echo())
    });

    assert!(!registry.is_loaded("yolo"));
    registry.get_or_load("yolo").unwrap();
    registry.get_or_load("yolo").unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(registry.loaded_models(), vec!["yolo".to_string()]);
  }

  #[test]
  fn failed_load_is_retried() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let registry = ModelRegistry::new(move |name: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
      if counter.fetch_add(1, Ordering::SeqCst) == 0 {
        Err(format!("{} not found", name).into())
      } else {
        Ok(echo())
      }
    });

    let err = registry.get_or_load("yolo").unwrap_err();
    assert!(err.to_string().contains("yolo not found"));
    assert!(!registry.is_loaded("yolo"));
    assert!(registry.get_or_load("yolo").unwrap().is_ready());
    assert_eq!(loads.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn unload_keeps_issued_handles_usable() {
    let registry = ModelRegistry::new(|_: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> { Ok(echo()) });
    let handle = registry.get_or_load("yolo").unwrap();

    assert!(registry.unload("yolo"));
    assert!(!registry.unload("yolo"));
    assert!(!registry.handle("yolo").is_ready());
    assert!(infer(&handle, &TensorMap::new()).is_ok());
  }

  #[test]
  fn unload_during_load_does_not_start_a_second_load() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current, max) = (in_flight.clone(), peak.clone());
    let registry = ModelRegistry::new(move |_: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
      let now = current.fetch_add(1, Ordering::SeqCst) + 1;
      max.fetch_max(now, Ordering::SeqCst);
      std::thread::sleep(Duration::from_millis(80));
      current.fetch_sub(1, Ordering::SeqCst);
      Ok(echo())
    });

    std::thread::scope(|scope| {
      let first = scope.spawn(|| registry.get_or_load("yolo").unwrap());
      std::thread::sleep(Duration::from_millis(20));
      let unload = scope.spawn(|| registry.unload("yolo"));
      std::thread::sleep(Duration::from_millis(20));
      let second = scope.spawn(|| registry.get_or_load("yolo").unwrap());

      assert!(first.join().unwrap().is_ready());
      unload.join().unwrap();
      assert!(second.join().unwrap().is_ready());
    });

    assert_eq!(peak.load(Ordering::SeqCst), 1);
  }
}
