// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/read_image_directory.rs - 图像目录输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::read_image_file::{ImageFileInputError, read_frame},
  url_path,
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 按文件名顺序读取目录中的图像，无法解码的文件记录日志后跳过
pub struct ImageDirectoryInput {
  paths: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFileInputError::SchemeMismatch);
    }
    Self::open(url_path(url))
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

impl ImageDirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let directory = directory.as_ref();
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        paths.push(path);
      }
    }
    paths.sort();
    info!("目录 {} 中共有 {} 张图像", directory.display(), paths.len());
    Ok(ImageDirectoryInput {
      paths: paths.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.paths.pop_front() {
      match read_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => error!("无法读取图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn reads_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
    RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();
    std::fs::write(dir.path().join("c.jpg"), "broken").unwrap();

    let mut input = ImageDirectoryInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);
    let names: Vec<String> = input.by_ref().map(|f| f.name().to_string()).collect();
    assert_eq!(names, vec!["a.png", "b.png"]);
    assert_eq!(input.remaining(), 0);
  }

  #[test]
  fn opens_escaped_folder_url() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("街景 2024");
    std::fs::create_dir(&dir).unwrap();
    RgbImage::new(2, 2).save(dir.join("一 号.png")).unwrap();

    let mut url = Url::parse("folder:///").unwrap();
    url.set_path(&dir.to_string_lossy());
    let names: Vec<String> = ImageDirectoryInput::from_url(&url)
      .unwrap()
      .map(|f| f.name().to_string())
      .collect();
    assert_eq!(names, vec!["一 号.png"]);
  }

  #[test]
  fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ImageDirectoryInput::open(dir.path().join("missing")).is_err());
  }
}
