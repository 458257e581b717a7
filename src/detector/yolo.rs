// 该文件是 Anjian （安检） 项目的一部分。
// src/detector/yolo.rs - YOLO 输出解码与非极大值抑制
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

use tracing::debug;

use crate::{
  DetectError,
  detector::{BoundingBox, Detection, DetectionSet},
  letterbox::LetterboxTransform,
  model::{ModelConfig, NmsMode, RAW_BOX_COLUMNS, RawDetectionTensor},
};

/// 解码网络原始输出
///
/// 每行 `[cx, cy, w, h, objectness, class_scores..]`。objectness 低于置信度阈值的行
/// 直接丢弃；其余行取分数最高的类别（并列时取第一个），坐标经 letterbox 逆变换
/// 回到原始帧，最后做 NMS。
pub fn decode(
  raw: &RawDetectionTensor,
  transform: &LetterboxTransform,
  config: &ModelConfig,
) -> Result<DetectionSet, DetectError> {
  let num_classes = config.class_names().len();
  if raw.rows() > 0 && raw.cols() < RAW_BOX_COLUMNS + num_classes {
    return Err(DetectError::inference(format!(
      "输出每行 {} 列, 不足以容纳 {} 个类别",
      raw.cols(),
      num_classes
    )));
  }

  let confidence_threshold = config.confidence_threshold();
  let mut candidates = Vec::new();

  for row in raw.iter_rows() {
    let objectness = row[4];
    // NaN 也在这里被丢弃
    if !(objectness >= confidence_threshold) {
      continue;
    }

    let mut class_id = 0usize;
    let mut best = f32::NEG_INFINITY;
    for (id, &score) in row[RAW_BOX_COLUMNS..RAW_BOX_COLUMNS + num_classes]
      .iter()
      .enumerate()
    {
      if score > best {
        best = score;
        class_id = id;
      }
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let (x_min, y_min) = transform.to_source(cx - w / 2.0, cy - h / 2.0);
    let (width, height) = transform.to_source_size(w, h);

    candidates.push(Detection {
      class_id,
      confidence: objectness,
      bbox: BoundingBox::new(x_min, y_min, width, height),
    });
  }

  debug!(
    "解码 {} 行输出, {} 个候选框通过置信度阈值",
    raw.rows(),
    candidates.len()
  );

  Ok(non_max_suppression(candidates, config))
}

/// 贪心非极大值抑制
///
/// 只有置信度不低于 `score_threshold` 的候选框参与；按置信度降序稳定排序后，
/// 依次保留最高者并丢弃与其 IoU 超过 `nms_threshold` 的其余框。
pub fn non_max_suppression(mut candidates: Vec<Detection>, config: &ModelConfig) -> DetectionSet {
  let score_threshold = config.score_threshold();
  let nms_threshold = config.nms_threshold();
  let per_class = config.nms_mode() == NmsMode::PerClass;
  let limit = config.max_detections().unwrap_or(usize::MAX);

  candidates.retain(|det| det.confidence >= score_threshold);
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::new();
  for candidate in candidates {
    if kept.len() >= limit {
      break;
    }

    let suppressed = kept.iter().any(|best| {
      (!per_class || best.class_id == candidate.class_id)
        && iou(&best.bbox, &candidate.bbox) > nms_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }

  DetectionSet::new(kept)
}

/// 计算两个边界框的 IoU
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x_min.max(b.x_min);
  let y1 = a.y_min.max(b.y_min);
  let x2 = a.x_max().min(b.x_max());
  let y2 = a.y_max().min(b.y_max());

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(classes: &[&str]) -> ModelConfig {
    ModelConfig::builder()
      .model_path("model.onnx")
      .class_names(classes.iter().copied())
      .score_threshold(0.5)
      .nms_threshold(0.5)
      .confidence_threshold(0.5)
      .build()
      .unwrap()
  }

  fn det(class_id: usize, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
    Detection {
      class_id,
      confidence,
      bbox: BoundingBox::new(x, y, w, h),
    }
  }

  fn identity() -> LetterboxTransform {
    LetterboxTransform::compute((640, 640), (640, 640)).unwrap()
  }

  #[test]
  fn overlapping_pair_keeps_the_stronger_box() {
    // 100x100 与 100x90 完全包含，IoU = 0.9
    let candidates = vec![
      det(0, 0.6, 0.0, 0.0, 100.0, 90.0),
      det(0, 0.8, 0.0, 0.0, 100.0, 100.0),
    ];
    assert!((iou(&candidates[0].bbox, &candidates[1].bbox) - 0.9).abs() < 1e-6);

    let set = non_max_suppression(candidates, &config(&["knife"]));
    assert_eq!(set.len(), 1);
    assert_eq!(set.as_slice()[0].confidence, 0.8);
  }

  #[test]
  fn nms_is_idempotent() {
    let config = config(&["knife", "gun"]);
    let candidates = vec![
      det(0, 0.9, 0.0, 0.0, 50.0, 50.0),
      det(1, 0.85, 5.0, 5.0, 50.0, 50.0),
      det(0, 0.7, 200.0, 200.0, 40.0, 40.0),
      det(1, 0.65, 210.0, 205.0, 40.0, 40.0),
      det(0, 0.55, 400.0, 10.0, 10.0, 10.0),
    ];

    let once = non_max_suppression(candidates, &config);
    let twice = non_max_suppression(once.as_slice().to_vec(), &config);
    assert_eq!(once, twice);
  }

  #[test]
  fn output_is_sorted_by_confidence() {
    let candidates = vec![
      det(0, 0.6, 0.0, 0.0, 10.0, 10.0),
      det(0, 0.9, 100.0, 0.0, 10.0, 10.0),
      det(0, 0.75, 200.0, 0.0, 10.0, 10.0),
    ];
    let set = non_max_suppression(candidates, &config(&["knife"]));
    let scores: Vec<f32> = set.iter().map(|d| d.confidence).collect();
    assert_eq!(scores, vec![0.9, 0.75, 0.6]);
  }

  #[test]
  fn equal_scores_keep_input_order() {
    let candidates = vec![
      det(0, 0.7, 0.0, 0.0, 10.0, 10.0),
      det(1, 0.7, 100.0, 0.0, 10.0, 10.0),
    ];
    let set = non_max_suppression(candidates, &config(&["a", "b"]));
    assert_eq!(set.as_slice()[0].class_id, 0);
    assert_eq!(set.as_slice()[1].class_id, 1);
  }

  #[test]
  fn boxes_below_score_threshold_are_not_eligible() {
    let candidates = vec![det(0, 0.4, 0.0, 0.0, 10.0, 10.0)];
    assert!(non_max_suppression(candidates, &config(&["knife"])).is_empty());
  }

  #[test]
  fn class_agnostic_mode_suppresses_across_classes() {
    let candidates = vec![
      det(0, 0.9, 0.0, 0.0, 100.0, 100.0),
      det(1, 0.8, 0.0, 0.0, 100.0, 95.0),
    ];
    let set = non_max_suppression(candidates, &config(&["knife", "gun"]));
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn per_class_mode_only_suppresses_same_class() {
    let config = ModelConfig::builder()
      .model_path("model.onnx")
      .class_names(["knife", "gun"])
      .score_threshold(0.5)
      .nms_threshold(0.5)
      .confidence_threshold(0.5)
      .nms_mode(NmsMode::PerClass)
      .build()
      .unwrap();
    let candidates = vec![
      det(0, 0.9, 0.0, 0.0, 100.0, 100.0),
      det(1, 0.8, 0.0, 0.0, 100.0, 95.0),
      det(0, 0.7, 0.0, 0.0, 100.0, 95.0),
    ];
    let set = non_max_suppression(candidates, &config);
    let classes: Vec<usize> = set.iter().map(|d| d.class_id).collect();
    assert_eq!(classes, vec![0, 1]);
  }

  #[test]
  fn max_detections_truncates_greedy_output() {
    let config = ModelConfig::builder()
      .model_path("model.onnx")
      .class_names(["knife"])
      .score_threshold(0.1)
      .max_detections(Some(2))
      .build()
      .unwrap();
    let candidates = (0..5)
      .map(|i| det(0, 0.5 + i as f32 * 0.1, i as f32 * 100.0, 0.0, 10.0, 10.0))
      .collect();
    let set = non_max_suppression(candidates, &config);
    assert_eq!(set.len(), 2);
    assert!(set.as_slice()[0].confidence > set.as_slice()[1].confidence);
  }

  #[test]
  fn disjoint_boxes_have_zero_iou() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
    assert_eq!(iou(&a, &b), 0.0);
    assert_eq!(iou(&BoundingBox::new(0.0, 0.0, 0.0, 0.0), &a), 0.0);
  }

  #[test]
  fn decode_maps_boxes_through_letterbox_inverse() {
    let config = config(&["knife", "gun"]);
    let transform = LetterboxTransform::compute((1280, 720), (640, 640)).unwrap();
    // 网络坐标中心 (320, 320)，宽高 100x50
    let raw = RawDetectionTensor::from_rows(&[[320.0, 320.0, 100.0, 50.0, 0.9, 0.1, 0.8]]).unwrap();

    let set = decode(&raw, &transform, &config).unwrap();
    assert_eq!(set.len(), 1);
    let det = &set.as_slice()[0];
    assert_eq!(det.class_id, 1);
    assert_eq!(det.confidence, 0.9);
    assert_eq!(det.bbox, BoundingBox::new(540.0, 310.0, 200.0, 100.0));
  }

  #[test]
  fn decode_discards_low_objectness_before_class_lookup() {
    let raw = RawDetectionTensor::from_rows(&[
      [10.0, 10.0, 5.0, 5.0, 0.2, 0.99],
      [10.0, 10.0, 5.0, 5.0, f32::NAN, 0.99],
    ])
    .unwrap();
    let set = decode(&raw, &identity(), &config(&["knife"])).unwrap();
    assert!(set.is_empty());
  }

  #[test]
  fn first_maximum_class_wins() {
    let raw = RawDetectionTensor::from_rows(&[[10.0, 10.0, 5.0, 5.0, 0.9, 0.4, 0.4, 0.1]]).unwrap();
    let set = decode(&raw, &identity(), &config(&["a", "b", "c"])).unwrap();
    assert_eq!(set.as_slice()[0].class_id, 0);
  }

  #[test]
  fn raising_confidence_threshold_never_adds_detections() {
    let rows: Vec<[f32; 6]> = (0..20)
      .map(|i| {
        let x = (i % 5) as f32 * 30.0;
        let y = (i / 5) as f32 * 30.0;
        [x + 20.0, y + 20.0, 40.0, 40.0, 0.5 + i as f32 * 0.025, 1.0]
      })
      .collect();
    let raw = RawDetectionTensor::from_rows(&rows).unwrap();

    let count = |threshold: f32| {
      let config = ModelConfig::builder()
        .model_path("model.onnx")
        .class_names(["knife"])
        .score_threshold(0.0)
        .nms_threshold(1.0)
        .confidence_threshold(threshold)
        .build()
        .unwrap();
      decode(&raw, &identity(), &config).unwrap().len()
    };

    let mut previous = usize::MAX;
    for step in 0..=10 {
      let current = count(step as f32 * 0.1);
      assert!(current <= previous);
      previous = current;
    }
    assert_eq!(count(0.0), 20);
  }

  #[test]
  fn all_rows_below_threshold_yield_empty_set() {
    let raw = RawDetectionTensor::from_rows(&[[1.0, 1.0, 1.0, 1.0, 0.1, 0.9]; 8]).unwrap();
    let set = decode(&raw, &identity(), &config(&["knife"])).unwrap();
    assert!(set.is_empty());
  }

  #[test]
  fn rows_too_short_for_class_list_are_malformed() {
    let raw = RawDetectionTensor::from_rows(&[[1.0, 1.0, 1.0, 1.0, 0.9, 0.9]]).unwrap();
    let err = decode(&raw, &identity(), &config(&["knife", "gun"])).unwrap_err();
    assert!(matches!(err, DetectError::InferenceError(_)));
  }
}
