// 该文件是 Tianyan （天眼） 项目的一部分。
// src/tensor.rs - 张量缓冲区
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

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// 按名称索引的张量集合，推理引擎的输入与输出都使用它
pub type TensorMap = BTreeMap<String, TensorBuffer>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
  F32,
  U8,
}

impl fmt::Display for DType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DType::F32 => write!(f, "f32"),
      DType::U8 => write!(f, "u8"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  F32(Box<[f32]>),
  U8(Box<[u8]>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::F32(data) => data.len(),
      TensorData::U8(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dtype(&self) -> DType {
    match self {
      TensorData::F32(_) => DType::F32,
      TensorData::U8(_) => DType::U8,
    }
  }
}

/// 带形状的扁平数值缓冲区
///
/// 构造时保证 `data.len() == shape.iter().product()`，之后不可变。
/// 图像张量固定为 `[1, 3, H, W]` 的平面（NCHW）布局。
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
  shape: Box<[usize]>,
  data: TensorData,
}

impl TensorBuffer {
  pub fn new(shape: impl Into<Vec<usize>>, data: TensorData) -> Result<Self, TensorError> {
    let shape = shape.into();
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into_boxed_slice(),
      data,
    })
  }

  pub fn from_f32(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::F32(data.into_boxed_slice()))
  }

  pub fn from_u8(shape: impl Into<Vec<usize>>, data: Vec<u8>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::U8(data.into_boxed_slice()))
  }

  pub fn dtype(&self) -> DType {
    self.data.dtype()
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::F32(data) => Some(data),
      _ => None,
    }
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match &self.data {
      TensorData::U8(data) => Some(data),
      _ => None,
    }
  }
}

/// 格式化张量集合的形状，用于错误信息，例如 `images=[1, 3, 640, 640]`
pub fn describe_shapes(tensors: &TensorMap) -> String {
  tensors
    .iter()
    .map(|(name, tensor)| format!("{}={:?}:{}", name, tensor.shape(), tensor.dtype()))
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_data_that_does_not_fill_shape() {
    let err = TensorBuffer::from_f32([1, 3, 2, 2], vec![0.0; 11]).unwrap_err();
    assert_eq!(
      err,
      TensorError::ShapeMismatch {
        shape: vec![1, 3, 2, 2],
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn typed_views() {
    let t = TensorBuffer::from_u8([2, 2], vec![1, 2, 3, 4]).unwrap();
    assert_eq!(t.dtype(), DType::U8);
    assert_eq!(t.rank(), 2);
    assert!(t.as_f32().is_none());
    assert_eq!(t.as_u8(), Some(&[1u8, 2, 3, 4][..]));
  }

  #[test]
  fn describes_shapes_in_name_order() {
    let mut map = TensorMap::new();
    map.insert("b".into(), TensorBuffer::from_u8([1], vec![0]).unwrap());
    map.insert("a".into(), TensorBuffer::from_f32([1, 2], vec![0.0, 1.0]).unwrap());
    assert_eq!(describe_shapes(&map), "a=[1, 2]:f32, b=[1]:u8");
  }
}
