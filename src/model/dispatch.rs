// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/dispatch.rs - 推理线程池
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

//! 将阻塞的前向推理放到固定数量的工作线程上执行。
//!
//! 任务队列有界，队列满时 [`InferencePool::submit`] 会阻塞提交者。
//! 每个任务附带一个 [`CancellationToken`]：开始推理前会检查一次，
//! 等待结果期间也会轮询；已经进入引擎的推理无法中断，其结果会被丢弃。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::model::{InferError, ModelHandle, infer};
use crate::tensor::{TensorMap, describe_shapes};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 可在线程间共享的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

type InferResult = Result<TensorMap, InferError>;

struct Job {
  handle: ModelHandle,
  inputs: TensorMap,
  token: CancellationToken,
  reply: Sender<InferResult>,
}

pub struct InferencePool {
  sender: Option<Sender<Job>>,
  workers: Vec<JoinHandle<()>>,
}

impl InferencePool {
  pub fn new(workers: usize, queue_capacity: usize) -> Self {
    let (sender, receiver) = bounded::<Job>(queue_capacity.max(1));
    let workers = (0..workers.max(1))
      .map(|index| {
        let receiver = receiver.clone();
        thread::Builder::new()
          .name(format!("tianyan-infer-{}", index))
          .spawn(move || worker_loop(index, receiver))
      })
      .filter_map(|spawned| match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
          warn!("无法创建推理线程: {}", e);
          None
        }
      })
      .collect::<Vec<_>>();

    info!("推理线程池已启动: {} 个线程, 队列容量 {}", workers.len(), queue_capacity.max(1));
    Self {
      sender: Some(sender),
      workers,
    }
  }

  pub fn workers(&self) -> usize {
    self.workers.len()
  }

  /// 提交一次推理，队列满时阻塞
  pub fn submit(
    &self,
    handle: ModelHandle,
    inputs: TensorMap,
    token: CancellationToken,
  ) -> Result<PendingInference, InferError> {
    if token.is_cancelled() {
      return Err(InferError::Cancelled);
    }
    let sender = self.sender.as_ref().ok_or(InferError::PoolClosed)?;
    if self.workers.is_empty() {
      return Err(InferError::PoolClosed);
    }

    let (reply, receiver) = bounded(1);
    sender
      .send(Job {
        handle,
        inputs,
        token: token.clone(),
        reply,
      })
      .map_err(|_| InferError::PoolClosed)?;

    Ok(PendingInference { receiver, token })
  }

  /// 提交并等待结果
  pub fn run(
    &self,
    handle: ModelHandle,
    inputs: TensorMap,
    token: CancellationToken,
    timeout: Option<Duration>,
  ) -> InferResult {
    let pending = self.submit(handle, inputs, token)?;
    match timeout {
      Some(timeout) => pending.wait_timeout(timeout),
      None => pending.wait(),
    }
  }
}

impl Drop for InferencePool {
  fn drop(&mut self) {
    // 关闭队列后，工作线程处理完剩余任务即退出
    drop(self.sender.take());
    for worker in self.workers.drain(..) {
      if worker.join().is_err() {
        warn!("推理线程异常退出");
      }
    }
    debug!("推理线程池已关闭");
  }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
  for job in receiver.iter() {
    let result = if job.token.is_cancelled() {
      debug!("线程 {}: 任务在开始前被取消", index);
      Err(InferError::Cancelled)
    } else {
      run_guarded(index, &job)
    };
    // 等待方可能已放弃
    let _ = job.reply.send(result);
  }
}

/// 引擎 panic 时转为 [`InferError::EngineExecution`]，工作线程继续服务
fn run_guarded(index: usize, job: &Job) -> InferResult {
  let result = panic::catch_unwind(AssertUnwindSafe(|| infer(&job.handle, &job.inputs)));
  result.unwrap_or_else(|payload| {
    let message = payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "引擎崩溃".to_string());
    error!("线程 {}: 模型 {} 推理时崩溃: {}", index, job.handle.name(), message);
    Err(InferError::EngineExecution {
      model: job.handle.name().to_string(),
      message,
      input_shapes: describe_shapes(&job.inputs),
    })
  })
}

/// 已提交但尚未取回的推理结果
pub struct PendingInference {
  receiver: Receiver<InferResult>,
  token: CancellationToken,
}

impl PendingInference {
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  /// 等待结果，直到完成或被取消
  pub fn wait(self) -> InferResult {
    self.wait_until(None)
  }

  /// 等待结果，超时后返回 [`InferError::TimedOut`]
  pub fn wait_timeout(self, timeout: Duration) -> InferResult {
    self.wait_until(Some((Instant::now() + timeout, timeout)))
  }

  fn wait_until(self, deadline: Option<(Instant, Duration)>) -> InferResult {
    loop {
      if self.token.is_cancelled() {
        return Err(InferError::Cancelled);
      }

      let poll = match deadline {
        Some((at, timeout)) => {
          let now = Instant::now();
          if now >= at {
            warn!("推理等待超时: {:?}", timeout);
            return Err(InferError::TimedOut(timeout));
          }
          (at - now).min(CANCEL_POLL_INTERVAL)
        }
        None => CANCEL_POLL_INTERVAL,
      };

      match self.receiver.recv_timeout(poll) {
        Ok(result) => return result,
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => return Err(InferError::PoolClosed),
      }
    }
  }
}
