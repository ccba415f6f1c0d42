// 该文件是 Tianyan （天眼） 项目的一部分。
// src/output/json_record.rs - 以 JSON Lines 格式记录检测结果
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

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::{DetectResult, Detection},
  frame::RgbFrame,
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  frame: u64,
  width: u32,
  height: u32,
  detections: &'a [Detection],
}

struct RecordState {
  writer: BufWriter<File>,
  frame: u64,
}

/// 每帧追加一行 JSON，`json:///tmp/detections.jsonl`
pub struct JsonRecordOutput {
  state: Mutex<RecordState>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    Self::create(uri.path())
  }
}

impl JsonRecordOutput {
  /// 截断并创建记录文件
  pub fn create(path: impl AsRef<Path>) -> Result<Self, JsonRecordError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(true)
      .open(path)?;

    Ok(Self {
      state: Mutex::new(RecordState {
        writer: BufWriter::new(file),
        frame: 0,
      }),
    })
  }
}

impl Render<RgbFrame, DetectResult> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut state = self.state.lock();
    let record = FrameRecord {
      frame: state.frame,
      width: frame.width(),
      height: frame.height(),
      detections: &result.items,
    };
    serde_json::to_writer(&mut state.writer, &record)?;
    state.writer.write_all(b"\n")?;
    state.writer.flush()?;

    debug!("记录第 {} 帧, {} 个目标", state.frame, result.len());
    state.frame += 1;
    Ok(())
  }
}
