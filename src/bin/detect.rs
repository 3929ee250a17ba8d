// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/detect.rs - 目标检测命令行工具
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use qianli::{
  FromUrl,
  config::{Device, DetectorConfig, RunConfig, RunMode},
  input::InputWrapper,
  model::{ObjectDetector, PredictorLoader, ReplayPredictor},
  output::{OutputWrapper, draw::Draw},
  task::{ContinuousTask, Task},
};

/// Qianli 目标检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录，包含 infer_cfg.yml
  #[arg(long, value_name = "DIR")]
  pub model_dir: PathBuf,
  /// 输入来源，例如 image:///path/a.jpg 或 folder:///path/dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 image:///path/out.png 或 folder:///path/out?record=name
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 推理引擎输出的回放文件，默认为模型目录下的 raw_output.jsonl
  #[arg(long, value_name = "FILE")]
  pub raw_output: Option<PathBuf>,
  /// 置信度阈值 (0.0 - 1.0)，默认使用配置文件中的 draw_threshold
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,

  #[arg(long, value_enum, default_value_t = Device::Cpu)]
  pub device: Device,
  #[arg(long, value_enum, default_value_t = RunMode::Fluid)]
  pub run_mode: RunMode,
  #[arg(long, default_value_t = 0)]
  pub gpu_id: u32,
  #[arg(long)]
  pub trt_calib_mode: bool,

  /// 标签字体文件，未指定时尝试系统字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型目录: {}", args.model_dir.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = DetectorConfig::load(&args.model_dir)?;
  let run = RunConfig::default()
    .device(args.device)
    .run_mode(args.run_mode)
    .gpu_id(args.gpu_id)
    .trt_calib_mode(args.trt_calib_mode);

  let predictor = match &args.raw_output {
    Some(path) => ReplayPredictor::open(path)?,
    None => ReplayPredictor::load(&args.model_dir, &run, config.min_subgraph_size)?,
  };

  let mut detector = ObjectDetector::new(&config, predictor)?;
  if let Some(threshold) = args.threshold {
    detector = detector.with_threshold(threshold)?;
  }

  let draw = match &args.font {
    Some(path) => Draw::with_font_path(path)?,
    None => Draw::with_system_font(),
  };

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_draw(draw);

  ContinuousTask::default()
    .with_frame_number(args.max_frames)
    .run_task(input, detector, output)?;

  Ok(())
}
