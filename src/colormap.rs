// 该文件是 Qianli （千里眼） 项目的一部分。
// src/colormap.rs - 类别颜色表
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

use image::Rgb;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ColorMapError {
  #[error("参数无效: {0}")]
  InvalidArgument(String),
}

/// 类别编号到 RGB 颜色的映射，至少包含一种颜色
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorMap {
  colors: Box<[Rgb<u8>]>,
}

impl ColorMap {
  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }

  /// 获取类别颜色，超出颜色表范围的编号按长度取模
  pub fn color(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }

  pub fn colors(&self) -> &[Rgb<u8>] {
    &self.colors
  }
}

/// 生成 `num_classes` 种颜色
///
/// 将类别编号的比特按 r/g/b 轮流分配，从每个通道的最高位向下填充。
/// 同样的类别数总是得到同样的颜色表。
pub fn generate_color_map(num_classes: usize) -> Result<ColorMap, ColorMapError> {
  if num_classes == 0 {
    return Err(ColorMapError::InvalidArgument(
      "类别数量必须大于 0".to_string(),
    ));
  }

  let colors = (0..num_classes).map(class_color).collect();
  Ok(ColorMap { colors })
}

fn class_color(class_id: usize) -> Rgb<u8> {
  let mut rgb = [0u8; 3];
  let mut lab = class_id;
  let mut j = 0;
  while lab != 0 && j < 8 {
    for (c, channel) in rgb.iter_mut().enumerate() {
      *channel |= (((lab >> c) & 1) as u8) << (7 - j);
    }
    j += 1;
    lab >>= 3;
  }
  Rgb(rgb)
}
