// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{borrow::Cow, path::Path};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  colormap::{ColorMap, generate_color_map},
  model::{DetectResult, DetectionResult},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色

const SYSTEM_FONT_PATHS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法解析字体文件: {0}")]
  InvalidFont(String),
}

/// 检测结果绘制器
///
/// 没有字体时仍然绘制边框和标签底色，只跳过文字。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: u32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  box_thickness: i32,
  text_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      box_thickness: BOX_THICKNESS,
      text_color: TEXT_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn with_font_path(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| DrawError::InvalidFont(path.display().to_string()))?;
    info!("加载字体: {}", path.display());
    Ok(Self::default().with_font(font))
  }

  /// 尝试加载常见位置的系统字体，找不到时不绘制文字
  pub fn with_system_font() -> Self {
    for path in SYSTEM_FONT_PATHS {
      if let Ok(draw) = Self::with_font_path(path) {
        return draw;
      }
    }
    debug!("未找到系统字体，将跳过文字绘制");
    Self::default()
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在输入图像的副本上绘制检测结果，输入图像保持不变
  pub fn visualize(
    &self,
    image: &RgbImage,
    results: &[DetectionResult],
    labels: &[String],
    colormap: &ColorMap,
  ) -> RgbImage {
    let mut canvas = image.clone();
    for item in results {
      let color = colormap.color(item.class_id());
      let caption = caption(labels, item);
      self.draw_bbox_with_label(&mut canvas, item, &caption, color);
    }
    canvas
  }

  /// 按标签数量生成颜色表后绘制
  pub fn draw_detection(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let Ok(colormap) = generate_color_map(result.labels.len().max(1)) else {
      return image.clone();
    };
    self.visualize(image, &result.items, &result.labels, &colormap)
  }

  fn caption_size(&self, caption: &str) -> (i32, i32) {
    match &self.font {
      Some(font) => {
        let (w, h) = text_size(PxScale::from(self.font_size), font, caption);
        (w as i32, h as i32 + 2 * self.label_text_vertical_padding)
      }
      None => (
        (caption.chars().count() as f32 * self.label_char_width) as i32,
        self.label_text_height as i32,
      ),
    }
  }

  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    item: &DetectionResult,
    caption: &str,
    color: Rgb<u8>,
  ) {
    let (img_w, img_h) = (image.width() as i32, image.height() as i32);

    if item.right() < 0 || item.left() >= img_w || item.bottom() < 0 || item.top() >= img_h {
      debug!("检测框 {:?} 位于图像之外，跳过绘制", item.rect());
      return;
    }

    // 超出图像的边裁剪到图像外一个像素处
    let left = item.left().max(-1);
    let right = item.right().min(img_w);
    let top = item.top().max(-1);
    let bottom = item.bottom().min(img_h);

    // 向内加粗边框
    let (box_w, box_h) = (right - left + 1, bottom - top + 1);
    for t in 0..self.box_thickness {
      let (w, h) = (box_w - 2 * t, box_h - 2 * t);
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(left + t, top + t).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 标签优先放在边框上方，空间不足时放进边框内，并向左平移以留在图像内
    let (text_w, text_h) = self.caption_size(caption);
    let label_x = left.min(img_w - text_w).max(0);
    let label_y = if top >= text_h { top - text_h } else { top };
    let label_y = label_y.min(img_h - text_h).max(0);

    let label_w = text_w.min(img_w - label_x);
    let label_h = text_h.min(img_h - label_y);
    if label_w <= 0 || label_h <= 0 {
      return;
    }

    let background = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, background, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(self.text_color),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        caption,
      );
    }
  }
}

/// 使用默认绘制器可视化检测结果
pub fn visualize(
  image: &RgbImage,
  results: &[DetectionResult],
  labels: &[String],
  colormap: &ColorMap,
) -> RgbImage {
  Draw::default().visualize(image, results, labels, colormap)
}

/// 类别名称，标签列表中没有时退化为类别编号
pub fn class_label(labels: &[String], class_id: usize) -> Cow<'_, str> {
  match labels.get(class_id) {
    Some(name) => Cow::Borrowed(name.as_str()),
    None => Cow::Owned(class_id.to_string()),
  }
}

/// 标签文本: 类别名称与四位小数的置信度
pub fn caption(labels: &[String], item: &DetectionResult) -> String {
  format!(
    "{} {:.4}",
    class_label(labels, item.class_id()),
    item.confidence()
  )
}

/// 以文本形式记录检测结果
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn format_line(&self, labels: &[String], item: &DetectionResult) -> String {
    let name = if self.label_with_name {
      class_label(labels, item.class_id()).into_owned()
    } else {
      item.class_id().to_string()
    };
    format!(
      "{}, {:.4}, {}, {}, {}, {}",
      name,
      item.confidence(),
      item.left(),
      item.top(),
      item.right(),
      item.bottom()
    )
  }

  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), std::io::Error> {
    let records: Vec<String> = result
      .items
      .iter()
      .map(|item| self.format_line(&result.labels, item))
      .collect();
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;
    Ok(())
  }
}
