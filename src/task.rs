// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 输入、推理与输出的任务循环
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

use std::time::Instant;
use tracing::info;

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一帧
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 依次处理所有输入帧，可限制最大帧数
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    if self.frame_number == Some(0) {
      info!("帧数限制为 0，跳过任务");
      return Ok(());
    }

    let mut frame_index = 0;
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 帧图像", frame_index);
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("失败的帧: {0}")]
  struct MockError(u32);

  struct Doubler {
    fail_on: Option<u32>,
  }

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = MockError;

    fn infer(&mut self, input: &u32) -> Result<u32, MockError> {
      if self.fail_on == Some(*input) {
        return Err(MockError(*input));
      }
      Ok(input * 2)
    }
  }

  #[derive(Default)]
  struct Collect {
    seen: RefCell<Vec<(u32, u32)>>,
  }

  impl Render<u32, u32> for &Collect {
    type Error = MockError;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), MockError> {
      self.seen.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_handles_first_frame() {
    let output = Collect::default();
    OneShotTask
      .run_task(vec![1, 2, 3].into_iter(), Doubler { fail_on: None }, &output)
      .unwrap();
    assert_eq!(*output.seen.borrow(), vec![(1, 2)]);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let output = Collect::default();
    let result = OneShotTask.run_task(
      Vec::<u32>::new().into_iter(),
      Doubler { fail_on: None },
      &output,
    );
    assert!(result.is_err());
  }

  #[test]
  fn continuous_honours_frame_limit() {
    let output = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(1..10u32, Doubler { fail_on: None }, &output)
      .unwrap();
    assert_eq!(*output.seen.borrow(), vec![(1, 2), (2, 4)]);

    let output = Collect::default();
    ContinuousTask::default()
      .run_task(1..4u32, Doubler { fail_on: None }, &output)
      .unwrap();
    assert_eq!(output.seen.borrow().len(), 3);

    let output = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(0))
      .run_task(1..4u32, Doubler { fail_on: None }, &output)
      .unwrap();
    assert!(output.seen.borrow().is_empty());
  }

  #[test]
  fn continuous_stops_on_model_error() {
    let output = Collect::default();
    let err = ContinuousTask::default()
      .run_task(1..5u32, Doubler { fail_on: Some(3) }, &output)
      .unwrap_err();
    assert_eq!(err.to_string(), "失败的帧: 3");
    assert_eq!(output.seen.borrow().len(), 2);
  }
}
