// 该文件是 Qianli （千里眼） 项目的一部分。
// src/config.rs - 模型部署配置
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
  fmt,
  path::{Path, PathBuf},
};

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{postprocess::CoordinateSpace, preprocess::PreprocessOp};

const SUPPORTED_MODE: &str = "fluid";
const BACKGROUND_LABEL: &str = "background";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件解析错误: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("不支持的模型模式: {0}，仅支持 fluid")]
  UnsupportedMode(String),
  #[error("配置值无效: {0}")]
  InvalidValue(String),
}

/// 模型目录下 `infer_cfg.yml` 的内容
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
  pub mode: String,
  pub arch: String,
  pub min_subgraph_size: u32,
  pub draw_threshold: f32,
  #[serde(default)]
  pub with_background: bool,
  #[serde(rename = "Preprocess")]
  pub preprocess: Vec<PreprocessOp>,
  pub label_list: Vec<String>,
  /// 覆盖由 `arch` 推断出的输出坐标空间
  #[serde(default)]
  pub coordinate_space: Option<CoordinateSpace>,
}

impl DetectorConfig {
  pub const FILE_NAME: &'static str = "infer_cfg.yml";

  /// 从模型目录加载配置
  pub fn load(model_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = model_dir.as_ref().join(Self::FILE_NAME);
    info!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
      path: path.clone(),
      source,
    })?;
    Self::from_yaml_str(&content)
  }

  pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
    let mut config: DetectorConfig = serde_yaml::from_str(content)?;

    if config.mode != SUPPORTED_MODE {
      return Err(ConfigError::UnsupportedMode(config.mode));
    }
    if !(0.0..=1.0).contains(&config.draw_threshold) {
      return Err(ConfigError::InvalidValue(format!(
        "draw_threshold 必须位于 [0, 1]，实际为 {}",
        config.draw_threshold
      )));
    }
    if config.label_list.is_empty() {
      return Err(ConfigError::InvalidValue("label_list 不能为空".to_string()));
    }

    // 带背景类的模型输出的类别编号从背景类开始计
    if config.with_background && config.label_list.first().map(String::as_str) != Some(BACKGROUND_LABEL)
    {
      config.label_list.insert(0, BACKGROUND_LABEL.to_string());
    }

    debug!(
      "模型结构: {}, 标签数量: {}, 预处理操作: {}",
      config.arch,
      config.label_list.len(),
      config.preprocess.len()
    );
    Ok(config)
  }

  pub fn coordinate_space(&self) -> CoordinateSpace {
    self
      .coordinate_space
      .unwrap_or_else(|| CoordinateSpace::for_arch(&self.arch))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Device {
  #[default]
  #[value(name = "CPU", alias = "cpu")]
  Cpu,
  #[value(name = "GPU", alias = "gpu")]
  Gpu,
  #[value(name = "XPU", alias = "xpu")]
  Xpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "CPU"),
      Device::Gpu => write!(f, "GPU"),
      Device::Xpu => write!(f, "XPU"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunMode {
  #[default]
  #[value(name = "fluid")]
  Fluid,
  #[value(name = "trt_fp32")]
  TrtFp32,
  #[value(name = "trt_fp16")]
  TrtFp16,
  #[value(name = "trt_int8")]
  TrtInt8,
}

impl fmt::Display for RunMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunMode::Fluid => write!(f, "fluid"),
      RunMode::TrtFp32 => write!(f, "trt_fp32"),
      RunMode::TrtFp16 => write!(f, "trt_fp16"),
      RunMode::TrtInt8 => write!(f, "trt_int8"),
    }
  }
}

/// 推理引擎的运行参数，由外部模型加载步骤使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
  pub device: Device,
  pub run_mode: RunMode,
  pub gpu_id: u32,
  pub trt_calib_mode: bool,
  pub batch_size: usize,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      device: Device::Cpu,
      run_mode: RunMode::Fluid,
      gpu_id: 0,
      trt_calib_mode: false,
      batch_size: 1,
    }
  }
}

impl RunConfig {
  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn run_mode(mut self, run_mode: RunMode) -> Self {
    self.run_mode = run_mode;
    self
  }

  pub fn gpu_id(mut self, gpu_id: u32) -> Self {
    self.gpu_id = gpu_id;
    self
  }

  pub fn trt_calib_mode(mut self, trt_calib_mode: bool) -> Self {
    self.trt_calib_mode = trt_calib_mode;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const YOLO_CFG: &str = r#"
mode: fluid
draw_threshold: 0.5
metric: COCO
arch: YOLO
min_subgraph_size: 3
with_background: false
Preprocess:
- interp: 2
  max_size: 0
  target_size: 608
  type: Resize
  use_cv2: true
- is_channel_first: false
  is_scale: true
  mean: [0.485, 0.456, 0.406]
  std: [0.229, 0.224, 0.225]
  type: Normalize
- channel_first: true
  to_bgr: false
  type: Permute
label_list:
- person
- bicycle
- car
"#;

  #[test]
  fn parses_deploy_config() {
    let config = DetectorConfig::from_yaml_str(YOLO_CFG).unwrap();
    assert_eq!(config.arch, "YOLO");
    assert_eq!(config.min_subgraph_size, 3);
    assert_eq!(config.draw_threshold, 0.5);
    assert_eq!(config.label_list, vec!["person", "bicycle", "car"]);
    assert_eq!(config.preprocess.len(), 3);
    assert_eq!(
      config.preprocess[0],
      PreprocessOp::Resize {
        target_size: 608,
        max_size: 0,
        interp: 2,
        image_shape: vec![],
      }
    );
    assert_eq!(
      config.preprocess[2],
      PreprocessOp::Permute {
        to_bgr: false,
        channel_first: true,
      }
    );
    assert_eq!(config.coordinate_space(), CoordinateSpace::Original);
  }

  #[test]
  fn background_label_is_prepended() {
    let content = YOLO_CFG.replace("with_background: false", "with_background: true");
    let config = DetectorConfig::from_yaml_str(&content).unwrap();
    assert_eq!(config.label_list[0], "background");
    assert_eq!(config.label_list[1], "person");
    assert_eq!(config.label_list.len(), 4);
  }

  #[test]
  fn coordinate_space_follows_arch_unless_overridden() {
    let ssd = YOLO_CFG.replace("arch: YOLO", "arch: SSD");
    let config = DetectorConfig::from_yaml_str(&ssd).unwrap();
    assert_eq!(config.coordinate_space(), CoordinateSpace::Normalized);

    let overridden = format!("{}coordinate_space: resized\n", YOLO_CFG);
    let config = DetectorConfig::from_yaml_str(&overridden).unwrap();
    assert_eq!(config.coordinate_space(), CoordinateSpace::Resized);
  }

  #[test]
  fn rejects_unsupported_mode() {
    let content = YOLO_CFG.replace("mode: fluid", "mode: static");
    assert!(matches!(
      DetectorConfig::from_yaml_str(&content),
      Err(ConfigError::UnsupportedMode(mode)) if mode == "static"
    ));
  }

  #[test]
  fn rejects_invalid_threshold() {
    let content = YOLO_CFG.replace("draw_threshold: 0.5", "draw_threshold: 1.5");
    assert!(matches!(
      DetectorConfig::from_yaml_str(&content),
      Err(ConfigError::InvalidValue(_))
    ));
  }

  #[test]
  fn rejects_missing_fields() {
    let content = YOLO_CFG.replace("arch: YOLO\n", "");
    assert!(matches!(
      DetectorConfig::from_yaml_str(&content),
      Err(ConfigError::Yaml(_))
    ));
  }

  #[test]
  fn loads_from_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(DetectorConfig::FILE_NAME), YOLO_CFG).unwrap();
    let config = DetectorConfig::load(dir.path()).unwrap();
    assert_eq!(config.label_list.len(), 3);

    let missing = tempfile::tempdir().unwrap();
    assert!(matches!(
      DetectorConfig::load(missing.path()),
      Err(ConfigError::Io { .. })
    ));
  }

  #[test]
  fn run_config_defaults() {
    let run = RunConfig::default();
    assert_eq!(run.device, Device::Cpu);
    assert_eq!(run.run_mode, RunMode::Fluid);
    assert_eq!(run.gpu_id, 0);
    assert!(!run.trt_calib_mode);
    assert_eq!(run.batch_size, 1);

    let run = run.device(Device::Gpu).run_mode(RunMode::TrtFp16).gpu_id(1);
    assert_eq!(run.device.to_string(), "GPU");
    assert_eq!(run.run_mode.to_string(), "trt_fp16");
    assert_eq!(run.gpu_id, 1);
  }
}
