// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型
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

use std::{path::Path, sync::Arc};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::{DetectorConfig, RunConfig},
  frame::Frame,
  postprocess::{PostprocessError, Postprocessor},
  preprocess::{ImageMeta, ImageTensor, PreprocessError, Preprocessor},
};

mod replay;
pub use self::replay::{ReplayPredictor, ReplayPredictorError};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 外部推理引擎的句柄
///
/// 输入张量按值传入，调用结束后即被释放。返回扁平的原始检测行，
/// 每行为 `[class_id, score, x1, y1, x2, y2]`。
pub trait Predictor {
  type Error: std::error::Error + Send + Sync + 'static;

  fn predict(&mut self, tensor: ImageTensor) -> Result<Vec<f32>, Self::Error>;
}

/// 从模型目录加载推理引擎
pub trait PredictorLoader: Predictor + Sized {
  type LoadError;

  fn load(
    model_dir: &Path,
    run: &RunConfig,
    min_subgraph_size: u32,
  ) -> Result<Self, Self::LoadError>;
}

/// 一个检测到的目标，坐标为原图像素坐标
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
  rect: [i32; 4], // [left, right, top, bottom]
  class_id: usize,
  confidence: f32,
}

impl DetectionResult {
  pub fn new(rect: [i32; 4], class_id: usize, confidence: f32) -> Self {
    let [x1, x2, y1, y2] = rect;
    Self {
      rect: [x1.min(x2), x1.max(x2), y1.min(y2), y1.max(y2)],
      class_id,
      confidence,
    }
  }

  pub fn rect(&self) -> [i32; 4] {
    self.rect
  }

  pub fn left(&self) -> i32 {
    self.rect[0]
  }

  pub fn right(&self) -> i32 {
    self.rect[1]
  }

  pub fn top(&self) -> i32 {
    self.rect[2]
  }

  pub fn bottom(&self) -> i32 {
    self.rect[3]
  }

  /// 包含两端像素的宽度
  pub fn width(&self) -> u32 {
    self.right().abs_diff(self.left()).saturating_add(1)
  }

  pub fn height(&self) -> u32 {
    self.bottom().abs_diff(self.top()).saturating_add(1)
  }

  pub fn class_id(&self) -> usize {
    self.class_id
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }
}

/// 一帧的检测结果及其标签列表
#[derive(Debug, Clone)]
pub struct DetectResult {
  pub items: Box<[DetectionResult]>,
  pub labels: Arc<[String]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("后处理错误: {0}")]
  Postprocess(#[from] PostprocessError),
  #[error("推理引擎错误: {0}")]
  Predictor(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 目标检测器：预处理 -> 推理引擎 -> 后处理
///
/// 推理引擎由调用方加载后传入，检测器独占它直到被释放。
pub struct ObjectDetector<P> {
  preprocessor: Preprocessor,
  postprocessor: Postprocessor,
  predictor: P,
  labels: Arc<[String]>,
}

impl<P: Predictor> ObjectDetector<P> {
  pub fn new(config: &DetectorConfig, predictor: P) -> Result<Self, DetectError> {
    let preprocessor = Preprocessor::new(&config.preprocess, &config.arch)?;
    let postprocessor = Postprocessor::new(
      config.draw_threshold,
      config.label_list.len(),
      config.coordinate_space(),
    )?;
    info!(
      "创建检测器: 结构 {}, 阈值 {:.2}, 坐标空间 {:?}",
      config.arch,
      config.draw_threshold,
      postprocessor.coordinate_space()
    );

    Ok(Self::from_parts(
      preprocessor,
      postprocessor,
      predictor,
      config.label_list.clone(),
    ))
  }

  pub fn from_parts(
    preprocessor: Preprocessor,
    postprocessor: Postprocessor,
    predictor: P,
    labels: Vec<String>,
  ) -> Self {
    Self {
      preprocessor,
      postprocessor,
      predictor,
      labels: labels.into(),
    }
  }

  /// 替换默认的置信度阈值
  pub fn with_threshold(mut self, threshold: f32) -> Result<Self, DetectError> {
    self.postprocessor = self.postprocessor.with_threshold(threshold)?;
    Ok(self)
  }

  pub fn threshold(&self) -> f32 {
    self.postprocessor.threshold()
  }

  pub fn label_list(&self) -> &[String] {
    &self.labels
  }

  pub fn predictor(&self) -> &P {
    &self.predictor
  }

  pub fn into_predictor(self) -> P {
    self.predictor
  }

  pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionResult>, DetectError> {
    let (raw, meta) = self.predict_raw(image)?;
    Ok(self.postprocessor.process(&raw, &meta)?)
  }

  /// 使用临时阈值检测，不改变检测器的默认阈值
  pub fn detect_with_threshold(
    &mut self,
    image: &RgbImage,
    threshold: f32,
  ) -> Result<Vec<DetectionResult>, DetectError> {
    let postprocessor = self.postprocessor.clone().with_threshold(threshold)?;
    let (raw, meta) = self.predict_raw(image)?;
    Ok(postprocessor.process(&raw, &meta)?)
  }

  fn predict_raw(&mut self, image: &RgbImage) -> Result<(Vec<f32>, ImageMeta), DetectError> {
    let tensor = self.preprocessor.run(image)?;
    let meta = tensor.meta();
    debug!("输入张量形状: {:?}", tensor.shape());

    let raw = self
      .predictor
      .predict(tensor)
      .map_err(|e| DetectError::Predictor(Box::new(e)))?;
    debug!("推理引擎输出 {} 个数值", raw.len());

    Ok((raw, meta))
  }
}

impl<P: Predictor> Model for ObjectDetector<P> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = DetectError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let items = self.detect(input.image())?;
    for item in &items {
      debug!(
        "  - {}: {:.2}% at [{}, {}, {}, {}]",
        self
          .labels
          .get(item.class_id())
          .map(String::as_str)
          .unwrap_or("unknown"),
        item.confidence() * 100.0,
        item.left(),
        item.top(),
        item.right(),
        item.bottom()
      );
    }
    info!("{}: 检测到 {} 个对象", input.name(), items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
      labels: self.labels.clone(),
    })
  }
}
