// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/pipeline.rs - 输入、检测与输出的端到端测试
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

use std::path::Path;

use image::{Rgb, RgbImage};
use qianli::{
  FromUrl,
  colormap::generate_color_map,
  config::{DetectorConfig, RunConfig},
  input::InputWrapper,
  model::{ObjectDetector, PredictorLoader, ReplayPredictor},
  output::{OutputWrapper, draw::visualize},
  task::{ContinuousTask, OneShotTask, Task},
};
use url::Url;

const SSD_CFG: &str = r#"
mode: fluid
draw_threshold: 0.5
arch: SSD
min_subgraph_size: 3
with_background: false
Preprocess:
- type: Resize
  target_size: 32
  interp: 1
- type: Normalize
  is_scale: true
  mean: [0.5, 0.5, 0.5]
  std: [0.5, 0.5, 0.5]
- type: Permute
  to_bgr: false
  channel_first: true
label_list:
- cat
- dog
- bird
"#;

fn url(scheme: &str, path: &Path, query: Option<&str>) -> Url {
  let mut url = Url::parse(&format!("{}:///", scheme)).unwrap();
  url.set_path(&path.to_string_lossy());
  url.set_query(query);
  url
}

fn model_dir(raw_output: &str) -> tempfile::TempDir {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(dir.path().join(DetectorConfig::FILE_NAME), SSD_CFG).unwrap();
  std::fs::write(dir.path().join(ReplayPredictor::DEFAULT_FILE_NAME), raw_output).unwrap();
  dir
}

fn detector(model: &Path) -> ObjectDetector<ReplayPredictor> {
  let config = DetectorConfig::load(model).unwrap();
  let predictor =
    ReplayPredictor::load(model, &RunConfig::default(), config.min_subgraph_size).unwrap();
  ObjectDetector::new(&config, predictor).unwrap()
}

#[test]
fn directory_to_records() {
  let model = model_dir(
    "[[2, 0.9, 0.1, 0.1, 0.5, 0.5], [1, 0.4, 0.0, 0.0, 1.0, 1.0]]\n\
     [[0, 0.3, 0.2, 0.2, 0.4, 0.4]]\n\
     [[1, 0.75, 0.0, 0.0, 1.0, 1.0]]\n",
  );
  let images = tempfile::tempdir().unwrap();
  RgbImage::new(100, 100).save(images.path().join("a.png")).unwrap();
  RgbImage::new(100, 100).save(images.path().join("b.png")).unwrap();
  RgbImage::new(50, 40).save(images.path().join("c.png")).unwrap();
  let records = tempfile::tempdir().unwrap();

  let input = InputWrapper::from_url(&url("folder", images.path(), None)).unwrap();
  let output =
    OutputWrapper::from_url(&url("folder", records.path(), Some("record=name"))).unwrap();

  ContinuousTask::default()
    .run_task(input, detector(model.path()), output)
    .unwrap();

  let a = std::fs::read_to_string(records.path().join("a.png.txt")).unwrap();
  assert_eq!(a, "bird, 0.9000, 10, 10, 50, 50");
  // b 没有超过阈值的检测结果
  assert!(!records.path().join("b.png.png").exists());
  let c = std::fs::read_to_string(records.path().join("c.png.txt")).unwrap();
  assert_eq!(c, "dog, 0.7500, 0, 0, 49, 39");
  let raw = image::open(records.path().join("c.png.png")).unwrap().to_rgb8();
  assert_eq!(raw, RgbImage::new(50, 40));
}

#[test]
fn single_image_is_annotated() {
  let model = model_dir("[2, 0.9, 0.1, 0.1, 0.5, 0.5]\n");
  let images = tempfile::tempdir().unwrap();
  let source = images.path().join("street.png");
  RgbImage::new(100, 100).save(&source).unwrap();
  let target = images.path().join("out").join("street.png");

  let input = InputWrapper::from_url(&url("image", &source, None)).unwrap();
  let output = OutputWrapper::from_url(&url("image", &target, None)).unwrap();
  OneShotTask
    .run_task(input, detector(model.path()), output)
    .unwrap();

  let annotated = image::open(&target).unwrap().to_rgb8();
  let expected = {
    let colormap = generate_color_map(3).unwrap();
    let results = detector(model.path())
      .detect(&RgbImage::new(100, 100))
      .unwrap();
    visualize(
      &RgbImage::new(100, 100),
      &results,
      &["cat".to_string(), "dog".to_string(), "bird".to_string()],
      &colormap,
    )
  };
  assert_eq!(annotated, expected);
  assert_eq!(*annotated.get_pixel(30, 50), Rgb([0, 128, 0]));
}

#[test]
fn exhausted_replay_aborts_task() {
  let model = model_dir("[]\n");
  let images = tempfile::tempdir().unwrap();
  RgbImage::new(8, 8).save(images.path().join("a.png")).unwrap();
  RgbImage::new(8, 8).save(images.path().join("b.png")).unwrap();
  let out = tempfile::tempdir().unwrap();

  let input = InputWrapper::from_url(&url("folder", images.path(), None)).unwrap();
  let output = OutputWrapper::from_url(&url("folder", out.path(), Some("always"))).unwrap();
  let result = ContinuousTask::default().run_task(input, detector(model.path()), output);

  assert!(result.is_err());
  assert!(out.path().join("a.png.png").exists());
  assert!(!out.path().join("b.png.png").exists());
}
