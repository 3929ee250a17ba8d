// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, Record},
  },
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 绘制可视化图像，或保存原图并附带文本记录
pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        let image = draw.draw_detection(frame.image(), result);
        image.save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.image().save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: &str) -> Self {
    match kind {
      "record-name" => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      "record-id" => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      _ => DrawWrapper::Draw(Box::default()),
    }
  }
}

/// 按帧名称把结果写入目录
///
/// 查询参数 `record=id|name` 切换为记录模式，`always` 时没有检测结果的帧也会保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = {
      let mut kind = "draw";
      for (k, v) in uri.query_pairs() {
        if k == "record" {
          if v == "id" {
            kind = "record-id";
          } else {
            kind = "record-name";
          }
          break;
        }
      }
      kind
    };

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: url_path(uri),
      draw: DrawWrapper::with(kind),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  /// 替换绘制器，记录模式下无效
  pub fn with_draw(mut self, draw: Draw) -> Self {
    if let DrawWrapper::Draw(_) = self.draw {
      self.draw = DrawWrapper::Draw(Box::new(draw));
    }
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_path(&self, frame: &Frame) -> Result<PathBuf, DirectoryRecordOutputError> {
    if !self.directory.exists() {
      std::fs::create_dir_all(&self.directory)?;
    }
    let name: String = frame
      .name()
      .chars()
      .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
      .collect();
    let path = self.directory.join(format!("{}.png", name));
    if path.exists() {
      warn!("覆盖已存在的文件: {}", path.display());
    }
    Ok(path)
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("帧 {} 没有检测结果，跳过保存", frame.name());
      return Ok(());
    }
    let path = self.frame_path(frame)?;
    self.draw.save_result(&path, frame, result)?;
    info!("保存结果到: {}", path.display());
    Ok(())
  }
}
