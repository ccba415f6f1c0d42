// 该文件是 Tianyan （天眼） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{FolderInput, ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ReadFolder(FolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "read_image_file")]
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      #[cfg(feature = "read_image_file")]
      FolderInput::SCHEME => Ok(InputWrapper::ReadFolder(FolderInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match *self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(ref mut input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadFolder(ref mut input) => input.next(),
    }
  }
}
