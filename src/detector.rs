// 该文件是 Anjian （安检） 项目的一部分。
// src/detector.rs - 检测结果定义
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

use std::sync::Arc;

use serde_json::{Value, json};

pub mod yolo;

pub use self::yolo::{decode, iou, non_max_suppression};

/// 原始帧像素坐标下的边界框，左上角加宽高
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x_min: f32,
  pub y_min: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x_min: f32, y_min: f32, width: f32, height: f32) -> Self {
    Self {
      x_min,
      y_min,
      width,
      height,
    }
  }

  pub fn x_max(&self) -> f32 {
    self.x_min + self.width
  }

  pub fn y_max(&self) -> f32 {
    self.y_min + self.height
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }
}

/// 检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 类别索引
  pub class_id: usize,
  /// 置信度
  pub confidence: f32,
  /// 边界框
  pub bbox: BoundingBox,
}

/// NMS 之后的检测结果，保持贪心选择的顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  items: Vec<Detection>,
}

/// 持久化用的扁平记录
///
/// 图像数据由调用方提供（默认是标注后图像的 JPEG 编码），同一帧的记录共享同一份数据。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
  pub class_name: String,
  pub confidence: f32,
  pub x_min: f32,
  pub y_min: f32,
  pub x_max: f32,
  pub y_max: f32,
  pub image: Arc<[u8]>,
}

impl DetectionRecord {
  /// 序列化为 JSON，图像数据只记录长度
  pub fn to_json(&self) -> Value {
    json!({
      "class_name": self.class_name,
      "confidence": self.confidence,
      "x_min": self.x_min,
      "y_min": self.y_min,
      "x_max": self.x_max,
      "y_max": self.y_max,
      "image_bytes": self.image.len(),
    })
  }
}

impl DetectionSet {
  pub fn new(items: Vec<Detection>) -> Self {
    Self { items }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn as_slice(&self) -> &[Detection] {
    &self.items
  }

  /// 转换为持久化记录
  ///
  /// 超出类别表的索引记为 `class_<id>`。
  pub fn records(&self, class_names: &[String], image: &[u8]) -> Vec<DetectionRecord> {
    let image: Arc<[u8]> = Arc::from(image);
    self
      .items
      .iter()
      .map(|det| DetectionRecord {
        class_name: class_names
          .get(det.class_id)
          .cloned()
          .unwrap_or_else(|| format!("class_{}", det.class_id)),
        confidence: det.confidence,
        x_min: det.bbox.x_min,
        y_min: det.bbox.y_min,
        x_max: det.bbox.x_max(),
        y_max: det.bbox.y_max(),
        image: Arc::clone(&image),
      })
      .collect()
  }
}

impl IntoIterator for DetectionSet {
  type Item = Detection;
  type IntoIter = std::vec::IntoIter<Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.into_iter()
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectionSet {
  fn from(items: Vec<Detection>) -> Self {
    Self { items }
  }
}
