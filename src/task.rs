// 该文件是 Tianyan （天眼） 项目的一部分。
// src/task.rs - 任务调度：输入 -> 检测 -> 输出
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

use std::{thread, time::Duration, time::Instant};
use tracing::{info, warn};

use crate::{
  model::{CancellationToken, Model},
  output::Render,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 收到 Ctrl-C 时取消令牌；令牌同时被检测器共享，排队中的推理也会被取消
pub fn install_interrupt_handler(token: CancellationToken) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    token.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理，用于测量稳定后的平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
  warmup: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat: 1000,
      warmup: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }

  /// 前若干次推理不计入平均耗时
  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    let measured = &times[self.warmup.min(times.len().saturating_sub(1))..];
    warn!(
      "平均推理时间: {:.2?} ({} 次)",
      measured.iter().sum::<Duration>() / measured.len() as u32,
      measured.len()
    );

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  token: CancellationToken,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_token(mut self, token: CancellationToken) -> Self {
    self.token = token;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      if self.token.is_cancelled() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      frame_index += 1;
      info!("处理第 {} 帧图像", frame_index);
      let result = match model.infer(&frame) {
        Ok(result) => result,
        Err(_) if self.token.is_cancelled() => {
          warn!("推理被取消，退出任务循环");
          break;
        }
        Err(e) => return Err(e.into()),
      };
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}
