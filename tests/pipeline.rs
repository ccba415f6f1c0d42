// 该文件是 Tianyan （天眼） 项目的一部分。
// tests/pipeline.rs - 检测流水线集成测试
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

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};

use tianyan::{
  DetectionPipeline, Detector, FromUrl, LabelTable, PipelineConfig, PipelineError, RgbFrame,
  input::InputWrapper,
  model::{
    CancellationToken, EngineFailure, InferError, InferenceEngine, InferencePool, Model, ModelHandle,
    ModelRegistry,
  },
  output::JsonRecordOutput,
  preprocess::{PAD_VALUE, preprocess_bytes},
  task::{ContinuousTask, Task},
  tensor::{TensorBuffer, TensorMap},
};

const NUM_CLASSES: usize = 80;

/// 按 `[1, 4 + C, N]` 布局组装模型输出，每个候选框为 `(cx, cy, w, h, 类别, 分数)`，
/// 其余类别分数为 0.1
fn yolo_output(boxes: &[(f32, f32, f32, f32, usize, f32)]) -> TensorBuffer {
  let n = boxes.len();
  let mut data = vec![0.1f32; (4 + NUM_CLASSES) * n];
  for (i, &(cx, cy, w, h, class, score)) in boxes.iter().enumerate() {
    data[i] = cx;
    data[n + i] = cy;
    data[2 * n + i] = w;
    data[3 * n + i] = h;
    data[(4 + class) * n + i] = score;
  }
  TensorBuffer::from_f32([1, 4 + NUM_CLASSES, n], data).unwrap()
}

/// 检查输入形状后返回固定输出的假引擎
fn fake_engine(output: TensorBuffer) -> Arc<dyn InferenceEngine> {
  Arc::new(move |inputs: &TensorMap| -> Result<TensorMap, EngineFailure> {
    let images = inputs.get("images").ok_or("missing images")?;
    if images.shape() != [1, 3, 640, 640] {
      return Err(format!("unexpected shape {:?}", images.shape()).into());
    }
    let mut outputs = TensorMap::new();
    outputs.insert("output0".to_string(), output.clone());
    Ok(outputs)
  })
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_pixel(width, height, Rgb([30, 60, 90]));
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Png).unwrap();
  bytes.into_inner()
}

fn coco_pipeline() -> DetectionPipeline {
  DetectionPipeline::new(PipelineConfig::default(), LabelTable::coco()).unwrap()
}

#[test]
fn detects_person_in_original_coordinates() {
  let handle = ModelHandle::ready(
    "fake",
    fake_engine(yolo_output(&[(320.0, 320.0, 100.0, 200.0, 0, 0.9)])),
  );
  let detections = coco_pipeline()
    .detect_bytes(&handle, &png_bytes(1280, 960))
    .unwrap();

  assert_eq!(detections.len(), 1);
  let person = &detections[0];
  assert_eq!(person.class_index, 0);
  assert_eq!(person.label, "person");
  assert!((person.confidence - 0.9).abs() < 1e-6);
  assert!((person.bbox.x - 540.0).abs() < 1e-3);
  assert!((person.bbox.y - 440.0).abs() < 1e-3);
  assert!((person.bbox.width - 200.0).abs() < 1e-3);
  assert!((person.bbox.height - 400.0).abs() < 1e-3);
}

#[test]
fn letterbox_pads_bottom_and_right_only() {
  let (tensor, transform) = preprocess_bytes(&png_bytes(1280, 960), 640).unwrap();
  assert_eq!(tensor.shape(), [1, 3, 640, 640]);
  assert_eq!(transform.scale, 0.5);
  assert_eq!((transform.resized_width, transform.resized_height), (640, 480));
  assert_eq!((transform.pad_x, transform.pad_y), (0.0, 0.0));

  let data = tensor.as_f32().unwrap();
  let plane = 640 * 640;
  // 左上角为图像内容，底部为填充
  assert!((data[0] - 30.0 / 255.0).abs() < 1e-6);
  assert!((data[plane + 100 * 640 + 100] - 60.0 / 255.0).abs() < 1e-6);
  let pad = PAD_VALUE as f32 / 255.0;
  for c in 0..3 {
    assert_eq!(data[c * plane + 600 * 640 + 10], pad);
    assert_eq!(data[c * plane + 639 * 640 + 639], pad);
  }
}

#[test]
fn suppression_is_per_class() {
  let handle = ModelHandle::ready(
    "fake",
    fake_engine(yolo_output(&[
      (100.0, 100.0, 50.0, 50.0, 2, 0.8),
      (102.0, 100.0, 50.0, 50.0, 2, 0.7),
      (101.0, 100.0, 50.0, 50.0, 7, 0.6),
      (400.0, 400.0, 20.0, 20.0, 2, 0.4),
    ])),
  );
  let frame = RgbFrame::from_rgb(640, 640, vec![0; 640 * 640 * 3]).unwrap();
  let detections = coco_pipeline().detect(&handle, &frame).unwrap();

  let summary: Vec<_> = detections
    .iter()
    .map(|d| (d.label.as_str(), d.confidence))
    .collect();
  assert_eq!(summary, vec![("car", 0.8), ("truck", 0.6)]);
}

#[test]
fn empty_detections_are_not_an_error() {
  let handle = ModelHandle::ready("fake", fake_engine(yolo_output(&[])));
  let detections = coco_pipeline()
    .detect_bytes(&handle, &png_bytes(32, 16))
    .unwrap();
  assert!(detections.is_empty());
}

#[test]
fn undecodable_bytes_are_invalid_image() {
  let handle = ModelHandle::ready("fake", fake_engine(yolo_output(&[])));
  let err = coco_pipeline()
    .detect_bytes(&handle, b"definitely not an image")
    .unwrap_err();
  assert!(matches!(err, PipelineError::InvalidImage(_)));
}

#[test]
fn wrong_channel_count_is_malformed_output() {
  let output = TensorBuffer::from_f32([1, 10, 1], vec![0.0; 10]).unwrap();
  let handle = ModelHandle::ready("fake", fake_engine(output));
  let err = coco_pipeline()
    .detect_bytes(&handle, &png_bytes(8, 8))
    .unwrap_err();
  assert!(matches!(err, PipelineError::MalformedOutput(_)));
}

#[test]
fn registry_loads_each_model_once_under_contention() {
  let loads = Arc::new(AtomicUsize::new(0));
  let counter = loads.clone();
  let registry = ModelRegistry::new(move |_: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
    counter.fetch_add(1, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    Ok(fake_engine(yolo_output(&[])))
  });

  let handles: Vec<ModelHandle> = thread::scope(|scope| {
    let workers: Vec<_> = (0..8)
      .map(|_| scope.spawn(|| registry.get_or_load("yolo").unwrap()))
      .collect();
    workers.into_iter().map(|w| w.join().unwrap()).collect()
  });

  assert_eq!(loads.load(Ordering::SeqCst), 1);
  assert!(handles.iter().all(|h| h.is_ready() && h.name() == "yolo"));
  assert_eq!(registry.loaded_models(), vec!["yolo".to_string()]);
}

#[test]
fn failed_load_is_retried() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let counter = attempts.clone();
  let registry = ModelRegistry::new(move |_: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
      return Err("corrupt model file".into());
    }
    Ok(fake_engine(yolo_output(&[])))
  });

  assert!(registry.get_or_load("yolo").is_err());
  assert!(!registry.is_loaded("yolo"));
  assert!(registry.get_or_load("yolo").is_ok());
  assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn missing_model_reports_not_loaded() {
  let registry = ModelRegistry::new(|_: &str| -> Result<Arc<dyn InferenceEngine>, EngineFailure> {
    Err("unreachable".into())
  });
  let frame = RgbFrame::from_rgb(4, 4, vec![0; 48]).unwrap();
  let err = coco_pipeline()
    .detect(&registry.handle("yolo"), &frame)
    .unwrap_err();
  assert!(matches!(
    err,
    PipelineError::Infer(InferError::ModelNotLoaded { model }) if model == "yolo"
  ));
}

#[test]
fn pool_detection_matches_direct_detection() {
  let handle = ModelHandle::ready(
    "fake",
    fake_engine(yolo_output(&[(320.0, 320.0, 100.0, 200.0, 0, 0.9)])),
  );
  let pool = Arc::new(InferencePool::new(2, 4));
  let frame = RgbFrame::decode(&png_bytes(1280, 960)).unwrap();

  let direct = coco_pipeline().detect(&handle, &frame).unwrap();
  let detector = Detector::new(coco_pipeline(), handle).with_pool(pool);
  let pooled = detector.infer(&frame).unwrap();
  assert_eq!(pooled.items.as_ref(), direct.as_slice());
}

#[test]
fn cancelled_pool_request_is_reported() {
  let handle = ModelHandle::ready("fake", fake_engine(yolo_output(&[])));
  let pool = InferencePool::new(1, 1);
  let token = CancellationToken::new();
  token.cancel();

  let frame = RgbFrame::from_rgb(4, 4, vec![0; 48]).unwrap();
  let err = coco_pipeline()
    .detect_with_pool(&pool, &handle, &frame, token)
    .unwrap_err();
  assert!(matches!(err, PipelineError::Infer(InferError::Cancelled)));
}

#[test]
fn slow_engine_times_out() {
  let slow = Arc::new(|_: &TensorMap| -> Result<TensorMap, EngineFailure> {
    thread::sleep(Duration::from_millis(300));
    Ok(TensorMap::new())
  });
  let handle = ModelHandle::ready("slow", slow);
  let config = PipelineConfig {
    timeout_ms: Some(20),
    ..Default::default()
  };
  let pipeline = DetectionPipeline::new(config, LabelTable::coco()).unwrap();
  let pool = InferencePool::new(1, 1);

  let frame = RgbFrame::from_rgb(4, 4, vec![0; 48]).unwrap();
  let err = pipeline
    .detect_with_pool(&pool, &handle, &frame, CancellationToken::new())
    .unwrap_err();
  assert!(matches!(err, PipelineError::Infer(InferError::TimedOut(_))));
}

#[test]
fn folder_to_json_records_every_decodable_frame() {
  let dir = tempfile::tempdir().unwrap();
  let images = dir.path().join("images");
  std::fs::create_dir(&images).unwrap();
  std::fs::write(images.join("a.png"), png_bytes(1280, 960)).unwrap();
  std::fs::write(images.join("b.png"), png_bytes(640, 640)).unwrap();
  std::fs::write(images.join("c.png"), b"truncated").unwrap();

  let handle = ModelHandle::ready(
    "fake",
    fake_engine(yolo_output(&[(320.0, 320.0, 100.0, 200.0, 0, 0.9)])),
  );
  let detector = Detector::new(coco_pipeline(), handle);
  let input = InputWrapper::from_url(&url::Url::parse(&format!("folder://{}", images.display())).unwrap())
    .unwrap();
  let record = dir.path().join("out.jsonl");
  let output = JsonRecordOutput::create(&record).unwrap();

  ContinuousTask::default()
    .run_task(input, detector, output)
    .unwrap();

  let lines: Vec<serde_json::Value> = std::fs::read_to_string(&record)
    .unwrap()
    .lines()
    .map(|line| serde_json::from_str(line).unwrap())
    .collect();
  assert_eq!(lines.len(), 2);
  assert_eq!(lines[0]["width"], 1280);
  assert_eq!(lines[0]["detections"][0]["box"]["x"], 540.0);
  assert_eq!(lines[1]["width"], 640);
  assert_eq!(lines[1]["detections"][0]["box"]["x"], 270.0);
}
