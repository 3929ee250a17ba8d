// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess.rs - 检测结果后处理
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

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{model::DetectionResult, preprocess::ImageMeta};

/// 每行原始输出的长度: class_id, score, x1, y1, x2, y2
pub const RAW_ROW_STRIDE: usize = 6;

// 推理引擎在没有任何检测结果时输出单个 -1
const EMPTY_OUTPUT_SENTINEL: f32 = -1.0;

#[derive(Error, Debug, PartialEq)]
pub enum PostprocessError {
  #[error("参数无效: {0}")]
  InvalidArgument(String),
  #[error("类别编号 {class_id} 超出标签列表范围 (共 {num_labels} 个标签)")]
  InvalidClassId { class_id: i64, num_labels: usize },
  #[error("原始输出长度 {0} 不是 6 的整数倍")]
  MalformedOutput(usize),
  #[error("第 {row} 行原始输出包含非有限数值")]
  NonFiniteValue { row: usize },
}

/// 推理引擎输出的一行检测结果，坐标位于模型坐标空间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
  pub class_id: f32,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x1, y1, x2, y2]
}

impl RawDetection {
  /// 将扁平的引擎输出切分为行
  pub fn parse_rows(raw: &[f32]) -> Result<Vec<RawDetection>, PostprocessError> {
    if raw.len() == 1 && raw[0] == EMPTY_OUTPUT_SENTINEL {
      return Ok(Vec::new());
    }
    if raw.len() % RAW_ROW_STRIDE != 0 {
      return Err(PostprocessError::MalformedOutput(raw.len()));
    }

    Ok(
      raw
        .chunks_exact(RAW_ROW_STRIDE)
        .map(|row| RawDetection {
          class_id: row[0],
          confidence: row[1],
          bbox: [row[2], row[3], row[4], row[5]],
        })
        .collect(),
    )
  }
}

/// 推理引擎输出坐标所在的空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
  /// 相对原图宽高的比例，[0, 1]
  Normalized,
  /// 缩放后模型输入上的像素坐标
  Resized,
  /// 原图像素坐标
  #[default]
  Original,
}

impl CoordinateSpace {
  /// SSD 与 Face 结构输出归一化坐标，其余结构输出原图坐标
  pub fn for_arch(arch: &str) -> Self {
    match arch {
      "SSD" | "Face" => CoordinateSpace::Normalized,
      _ => CoordinateSpace::Original,
    }
  }

  fn to_original(self, x: f32, y: f32, meta: &ImageMeta) -> (f32, f32) {
    match self {
      CoordinateSpace::Normalized => (x * meta.ori_width as f32, y * meta.ori_height as f32),
      CoordinateSpace::Resized => (x / meta.scale_x, y / meta.scale_y),
      CoordinateSpace::Original => (x, y),
    }
  }
}

/// 后处理器
///
/// 只按置信度阈值过滤，不做 NMS。NMS 如有需要由推理引擎完成。
#[derive(Debug, Clone, PartialEq)]
pub struct Postprocessor {
  threshold: f32,
  num_labels: usize,
  space: CoordinateSpace,
}

impl Postprocessor {
  pub fn new(
    threshold: f32,
    num_labels: usize,
    space: CoordinateSpace,
  ) -> Result<Self, PostprocessError> {
    Ok(Self {
      threshold: validate_threshold(threshold)?,
      num_labels,
      space,
    })
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn num_labels(&self) -> usize {
    self.num_labels
  }

  pub fn coordinate_space(&self) -> CoordinateSpace {
    self.space
  }

  pub fn with_threshold(mut self, threshold: f32) -> Result<Self, PostprocessError> {
    self.threshold = validate_threshold(threshold)?;
    Ok(self)
  }

  /// 处理扁平的引擎输出
  pub fn process(
    &self,
    raw: &[f32],
    meta: &ImageMeta,
  ) -> Result<Vec<DetectionResult>, PostprocessError> {
    let rows = RawDetection::parse_rows(raw)?;
    self.process_rows(&rows, meta)
  }

  pub fn process_rows(
    &self,
    rows: &[RawDetection],
    meta: &ImageMeta,
  ) -> Result<Vec<DetectionResult>, PostprocessError> {
    let max_x = (meta.ori_width.max(1) - 1) as f32;
    let max_y = (meta.ori_height.max(1) - 1) as f32;

    let mut results = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
      // NaN 置信度同样被过滤
      if !(row.confidence >= self.threshold) {
        continue;
      }

      if !row.class_id.is_finite() {
        return Err(PostprocessError::NonFiniteValue { row: idx });
      }
      let class_id = row.class_id.round();
      if class_id < 0.0 {
        continue;
      }
      if class_id as usize >= self.num_labels {
        return Err(PostprocessError::InvalidClassId {
          class_id: class_id as i64,
          num_labels: self.num_labels,
        });
      }

      if row.bbox.iter().any(|v| !v.is_finite()) {
        return Err(PostprocessError::NonFiniteValue { row: idx });
      }
      let [x1, y1, x2, y2] = row.bbox;
      let (x1, y1) = self.space.to_original(x1, y1, meta);
      let (x2, y2) = self.space.to_original(x2, y2, meta);

      let x1 = x1.clamp(0.0, max_x).round() as i32;
      let x2 = x2.clamp(0.0, max_x).round() as i32;
      let y1 = y1.clamp(0.0, max_y).round() as i32;
      let y2 = y2.clamp(0.0, max_y).round() as i32;

      results.push(DetectionResult::new(
        [x1.min(x2), x1.max(x2), y1.min(y2), y1.max(y2)],
        class_id as usize,
        row.confidence,
      ));
    }

    debug!(
      "后处理: {} 行原始输出, {} 个结果 (阈值 {:.2})",
      rows.len(),
      results.len(),
      self.threshold
    );
    Ok(results)
  }
}

fn validate_threshold(threshold: f32) -> Result<f32, PostprocessError> {
  if (0.0..=1.0).contains(&threshold) {
    Ok(threshold)
  } else {
    Err(PostprocessError::InvalidArgument(format!(
      "置信度阈值必须位于 [0, 1]，实际为 {}",
      threshold
    )))
  }
}
