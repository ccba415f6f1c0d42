// 该文件是 Tianyan （天眼） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InvalidImageError, RgbFrame},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch: expected '{expected}', found '{found}'")]
  SchemaMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] InvalidImageError),
}

fn check_scheme(url: &Url, expected: &'static str) -> Result<(), ImageFileInputError> {
  if url.scheme() != expected {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      expected,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemaMismatch {
      expected,
      found: url.scheme().to_string(),
    });
  }
  Ok(())
}

/// 单张图像，`image:///path/to/photo.jpg`
pub struct ImageFileInput {
  image: Option<RgbFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let image = RgbFrame::open(url.path())?;
    info!("读取图像: {} ({}x{})", url.path(), image.width(), image.height());

    Ok(ImageFileInput { image: Some(image) })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录中的全部图像，按文件名排序，`folder:///path/to/dir`
///
/// 无法解码的文件会记录警告并跳过。
pub struct FolderInput {
  files: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    let mut files = std::fs::read_dir(url.path())?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
      })
      .collect::<Vec<_>>();
    files.sort();
    info!("目录 {} 中找到 {} 张图像", url.path(), files.len());

    Ok(FolderInput {
      files: files.into_iter(),
    })
  }
}

impl Iterator for FolderInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match RgbFrame::open(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
