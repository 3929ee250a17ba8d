// 该文件是 Qianli （千里眼） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use std::borrow::Cow;

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const RGB_CHANNELS: usize = 3;

// 仅这些结构在配置了 max_size 时保持宽高比缩放
const KEEP_RATIO_ARCHS: [&str; 2] = ["RCNN", "RetinaNet"];

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("参数无效: {0}")]
  InvalidArgument(String),
  #[error("输入图像为空")]
  EmptyImage,
}

/// `infer_cfg.yml` 中 `Preprocess` 列表的一项，按 `type` 字段区分
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PreprocessOp {
  Resize {
    target_size: u32,
    #[serde(default)]
    max_size: u32,
    #[serde(default = "default_interp")]
    interp: i32,
    #[serde(default)]
    image_shape: Vec<u32>,
  },
  Normalize {
    mean: Vec<f32>,
    std: Vec<f32>,
    #[serde(default = "default_true")]
    is_scale: bool,
  },
  PadStride {
    #[serde(default)]
    stride: u32,
  },
  Permute {
    #[serde(default)]
    to_bgr: bool,
    #[serde(default = "default_true")]
    channel_first: bool,
  },
}

fn default_interp() -> i32 {
  1
}

fn default_true() -> bool {
  true
}

/// 张量内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Chw,
  Hwc,
}

/// 预处理过程中记录的尺寸信息，后处理依赖它把坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMeta {
  /// 原图高度
  pub ori_height: u32,
  /// 原图宽度
  pub ori_width: u32,
  /// 缩放后（填充前）的高度
  pub im_height: u32,
  /// 缩放后（填充前）的宽度
  pub im_width: u32,
  pub scale_x: f32,
  pub scale_y: f32,
}

impl ImageMeta {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      ori_height: height,
      ori_width: width,
      im_height: height,
      im_width: width,
      scale_x: 1.0,
      scale_y: 1.0,
    }
  }
}

/// 送入推理引擎的输入张量
#[derive(Debug, Clone)]
pub struct ImageTensor {
  data: Vec<f32>,
  channels: usize,
  height: usize,
  width: usize,
  layout: TensorLayout,
  meta: ImageMeta,
}

impl ImageTensor {
  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_data(self) -> Vec<f32> {
    self.data
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  /// 按布局顺序给出的形状
  pub fn shape(&self) -> [usize; 3] {
    match self.layout {
      TensorLayout::Chw => [self.channels, self.height, self.width],
      TensorLayout::Hwc => [self.height, self.width, self.channels],
    }
  }

  pub fn meta(&self) -> ImageMeta {
    self.meta
  }
}

#[derive(Debug, Clone, PartialEq)]
struct Resize {
  target_size: u32,
  max_size: u32,
  filter: FilterType,
  keep_ratio: bool,
  pad_to_max: bool,
}

impl Resize {
  fn scale(&self, width: u32, height: u32) -> (f32, f32) {
    if self.keep_ratio {
      let size_min = width.min(height) as f32;
      let size_max = width.max(height) as f32;
      let mut ratio = self.target_size as f32 / size_min;
      if (ratio * size_max).round() > self.max_size as f32 {
        ratio = self.max_size as f32 / size_max;
      }
      (ratio, ratio)
    } else {
      (
        self.target_size as f32 / width as f32,
        self.target_size as f32 / height as f32,
      )
    }
  }

  fn run(&self, image: &RgbImage, meta: &mut ImageMeta) -> RgbImage {
    let (width, height) = image.dimensions();
    let (scale_x, scale_y) = self.scale(width, height);
    let new_width = ((width as f32 * scale_x).round() as u32).max(1);
    let new_height = ((height as f32 * scale_y).round() as u32).max(1);

    let mut resized = imageops::resize(image, new_width, new_height, self.filter);
    meta.im_width = new_width;
    meta.im_height = new_height;
    meta.scale_x = scale_x;
    meta.scale_y = scale_y;

    // 右侧和下侧补零到 max_size
    if self.pad_to_max && (new_width < self.max_size || new_height < self.max_size) {
      let mut padded = RgbImage::new(
        self.max_size.max(new_width),
        self.max_size.max(new_height),
      );
      imageops::replace(&mut padded, &resized, 0, 0);
      resized = padded;
    }

    debug!(
      "缩放: {}x{} -> {}x{}, 比例 ({:.4}, {:.4})",
      width,
      height,
      resized.width(),
      resized.height(),
      scale_x,
      scale_y
    );
    resized
  }
}

#[derive(Debug, Clone, PartialEq)]
struct Normalize {
  mean: [f32; RGB_CHANNELS],
  std: [f32; RGB_CHANNELS],
  is_scale: bool,
}

impl Normalize {
  fn run(&self, data: &mut [f32]) {
    for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
      for (c, value) in pixel.iter_mut().enumerate() {
        let v = if self.is_scale { *value / 255.0 } else { *value };
        *value = (v - self.mean[c]) / self.std[c];
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Permute {
  to_bgr: bool,
  channel_first: bool,
}

/// 预处理器
///
/// 无论配置中的顺序如何，操作总是按 Resize、Normalize、PadStride、Permute 的顺序执行。
/// 同类操作出现多次时以最后一次为准。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preprocessor {
  resize: Option<Resize>,
  normalize: Option<Normalize>,
  pad_stride: Option<u32>,
  permute: Option<Permute>,
}

impl Preprocessor {
  pub fn new(ops: &[PreprocessOp], arch: &str) -> Result<Self, PreprocessError> {
    let mut preprocessor = Preprocessor::default();

    for op in ops {
      match op {
        PreprocessOp::Resize {
          target_size,
          max_size,
          interp,
          image_shape,
        } => {
          if *target_size == 0 {
            return Err(PreprocessError::InvalidArgument(
              "Resize.target_size 必须大于 0".to_string(),
            ));
          }
          preprocessor.resize = Some(Resize {
            target_size: *target_size,
            max_size: *max_size,
            filter: filter_type(*interp),
            keep_ratio: *max_size != 0 && KEEP_RATIO_ARCHS.contains(&arch),
            pad_to_max: *max_size != 0 && !image_shape.is_empty(),
          });
        }
        PreprocessOp::Normalize {
          mean,
          std,
          is_scale,
        } => {
          let mean = channel_array("Normalize.mean", mean)?;
          let std = channel_array("Normalize.std", std)?;
          if std.iter().any(|s| *s == 0.0) {
            return Err(PreprocessError::InvalidArgument(
              "Normalize.std 不能为 0".to_string(),
            ));
          }
          preprocessor.normalize = Some(Normalize {
            mean,
            std,
            is_scale: *is_scale,
          });
        }
        PreprocessOp::PadStride { stride } => {
          preprocessor.pad_stride = Some(*stride);
        }
        PreprocessOp::Permute {
          to_bgr,
          channel_first,
        } => {
          preprocessor.permute = Some(Permute {
            to_bgr: *to_bgr,
            channel_first: *channel_first,
          });
        }
      }
    }

    Ok(preprocessor)
  }

  pub fn run(&self, image: &RgbImage) -> Result<ImageTensor, PreprocessError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyImage);
    }

    let mut meta = ImageMeta::new(width, height);
    let image = match &self.resize {
      Some(resize) => Cow::Owned(resize.run(image, &mut meta)),
      None => Cow::Borrowed(image),
    };

    let mut width = image.width() as usize;
    let mut height = image.height() as usize;
    let mut data: Vec<f32> = image.as_raw().iter().map(|&v| v as f32).collect();

    if let Some(normalize) = &self.normalize {
      normalize.run(&mut data);
    }

    if let Some(stride) = self.pad_stride
      && stride > 0
    {
      (data, width, height) = pad_stride(data, width, height, stride as usize);
    }

    let mut layout = TensorLayout::Hwc;
    if let Some(permute) = self.permute {
      if permute.to_bgr {
        for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
          pixel.swap(0, 2);
        }
      }
      if permute.channel_first {
        data = hwc_to_chw(&data, width, height);
        layout = TensorLayout::Chw;
      }
    }

    debug!(
      "预处理完成: {}x{} -> {}x{} ({:?})",
      meta.ori_width, meta.ori_height, width, height, layout
    );

    Ok(ImageTensor {
      data,
      channels: RGB_CHANNELS,
      height,
      width,
      layout,
      meta,
    })
  }
}

// 与 OpenCV 插值编号保持一致
fn filter_type(interp: i32) -> FilterType {
  match interp {
    0 => FilterType::Nearest,
    2 => FilterType::CatmullRom,
    4 => FilterType::Lanczos3,
    _ => FilterType::Triangle,
  }
}

fn channel_array(name: &str, values: &[f32]) -> Result<[f32; RGB_CHANNELS], PreprocessError> {
  <[f32; RGB_CHANNELS]>::try_from(values).map_err(|_| {
    PreprocessError::InvalidArgument(format!(
      "{} 需要 {} 个值，实际 {} 个",
      name,
      RGB_CHANNELS,
      values.len()
    ))
  })
}

fn pad_stride(
  data: Vec<f32>,
  width: usize,
  height: usize,
  stride: usize,
) -> (Vec<f32>, usize, usize) {
  let padded_width = width.div_ceil(stride) * stride;
  let padded_height = height.div_ceil(stride) * stride;
  if padded_width == width && padded_height == height {
    return (data, width, height);
  }

  let row = width * RGB_CHANNELS;
  let padded_row = padded_width * RGB_CHANNELS;
  let mut padded = vec![0.0f32; padded_row * padded_height];
  for (y, src) in data.chunks_exact(row).enumerate() {
    padded[y * padded_row..y * padded_row + row].copy_from_slice(src);
  }
  (padded, padded_width, padded_height)
}

fn hwc_to_chw(data: &[f32], width: usize, height: usize) -> Vec<f32> {
  let plane = width * height;
  let mut chw = vec![0.0f32; plane * RGB_CHANNELS];
  for (idx, pixel) in data.chunks_exact(RGB_CHANNELS).enumerate() {
    for (c, value) in pixel.iter().enumerate() {
      chw[c * plane + idx] = *value;
    }
  }
  chw
}
