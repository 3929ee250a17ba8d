// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/replay.rs - 回放已记录的推理引擎输出
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::RunConfig,
  model::{Predictor, PredictorLoader},
  postprocess::RAW_ROW_STRIDE,
  preprocess::ImageTensor,
};

#[derive(Error, Debug)]
pub enum ReplayPredictorError {
  #[error("无法读取回放文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("回放文件第 {line} 行解析错误: {source}")]
  Json {
    line: usize,
    source: serde_json::Error,
  },
  #[error("回放输出已用尽")]
  Exhausted,
}

// 每行既可以是扁平数组，也可以是按行分组的数组
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordedOutput {
  Rows(Vec<[f32; RAW_ROW_STRIDE]>),
  Flat(Vec<f32>),
}

impl From<RecordedOutput> for Vec<f32> {
  fn from(output: RecordedOutput) -> Self {
    match output {
      RecordedOutput::Rows(rows) => rows.into_iter().flatten().collect(),
      RecordedOutput::Flat(flat) => flat,
    }
  }
}

/// 按顺序回放 JSON Lines 文件中记录的引擎输出，每帧消耗一行
#[derive(Debug, Clone, Default)]
pub struct ReplayPredictor {
  outputs: VecDeque<Vec<f32>>,
}

impl ReplayPredictor {
  pub const DEFAULT_FILE_NAME: &'static str = "raw_output.jsonl";

  pub fn open(path: impl AsRef<Path>) -> Result<Self, ReplayPredictorError> {
    let path = path.as_ref();
    info!("加载回放文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| ReplayPredictorError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_jsonl(&content)
  }

  pub fn from_jsonl(content: &str) -> Result<Self, ReplayPredictorError> {
    let mut outputs = VecDeque::new();
    for (idx, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let output: RecordedOutput = serde_json::from_str(line)
        .map_err(|source| ReplayPredictorError::Json {
          line: idx + 1,
          source,
        })?;
      outputs.push_back(output.into());
    }
    debug!("回放输出共 {} 帧", outputs.len());
    Ok(Self { outputs })
  }

  pub fn from_outputs(outputs: impl IntoIterator<Item = Vec<f32>>) -> Self {
    Self {
      outputs: outputs.into_iter().collect(),
    }
  }

  pub fn remaining(&self) -> usize {
    self.outputs.len()
  }
}

impl Predictor for ReplayPredictor {
  type Error = ReplayPredictorError;

  fn predict(&mut self, tensor: ImageTensor) -> Result<Vec<f32>, Self::Error> {
    debug!("回放输入张量: {:?}", tensor.shape());
    self
      .outputs
      .pop_front()
      .ok_or(ReplayPredictorError::Exhausted)
  }
}

impl PredictorLoader for ReplayPredictor {
  type LoadError = ReplayPredictorError;

  fn load(
    model_dir: &Path,
    run: &RunConfig,
    min_subgraph_size: u32,
  ) -> Result<Self, Self::LoadError> {
    info!(
      "回放引擎: 设备 {}, 运行模式 {}, GPU {}, 最小子图 {}",
      run.device, run.run_mode, run.gpu_id, min_subgraph_size
    );
    Self::open(model_dir.join(Self::DEFAULT_FILE_NAME))
  }
}
