// 该文件是 Qianli （千里眼） 项目的一部分。
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

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_directory;
mod read_image_file;

pub use self::read_image_directory::ImageDirectoryInput;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ReadImageDirectory(ImageDirectoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageDirectoryInput::SCHEME => Ok(InputWrapper::ReadImageDirectory(
        ImageDirectoryInput::from_url(url)?,
      )),
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::ReadImageDirectory(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;
  use url::Url;

  #[test]
  fn dispatches_by_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.png");
    RgbImage::new(3, 3).save(&path).unwrap();

    let mut url = Url::parse("image:///").unwrap();
    url.set_path(&path.to_string_lossy());
    let input = InputWrapper::from_url(&url).unwrap();
    assert!(matches!(input, InputWrapper::ReadImageFile(_)));
    assert_eq!(input.count(), 1);

    let mut url = Url::parse("folder:///").unwrap();
    url.set_path(&dir.path().to_string_lossy());
    let input = InputWrapper::from_url(&url).unwrap();
    assert!(matches!(input, InputWrapper::ReadImageDirectory(_)));
    assert_eq!(input.count(), 1);

    let url = Url::parse("v4l2:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}
