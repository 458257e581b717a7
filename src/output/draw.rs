// 该文件是 Anjian （安检） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::info;

use crate::{
  detector::{Detection, DetectionSet},
  frame::RgbFrame,
};

const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_BAND_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];
const BOX_THICKNESS: u32 = 2;

/// 按类别分配的颜色表
///
/// 色相在色环上均匀分布，同一类别表总是得到同一组颜色。
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
  colors: Vec<Rgb<u8>>,
}

impl Palette {
  pub fn new(num_classes: usize) -> Self {
    let n = num_classes.max(1);
    let colors = (0..n)
      .map(|i| {
        let hue = (i as f32 / n as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self { colors }
  }

  pub fn for_classes(class_names: &[String]) -> Self {
    Self::new(class_names.len())
  }

  pub fn color(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 内置标注字体
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// 标注器
///
/// 默认使用内置字体，也可以从 TTF/OTF 文件加载其他字体。
#[derive(Clone)]
pub struct Annotator {
  font: FontArc,
  font_scale: PxScale,
}

impl Annotator {
  /// 使用内置字体
  pub fn new() -> Result<Self, InvalidFont> {
    let font = FontArc::try_from_slice(DEFAULT_FONT)?;
    Ok(Self::with_font(font))
  }

  pub fn with_font(font: FontArc) -> Self {
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  /// 从 TTF/OTF 文件加载字体
  pub fn from_font_file(path: &Path) -> std::io::Result<Self> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    info!("加载标注字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  /// 在帧的副本上绘制检测结果，输入帧不变
  pub fn annotate(
    &self,
    frame: &RgbFrame,
    detections: &DetectionSet,
    class_names: &[String],
    palette: &Palette,
  ) -> RgbFrame {
    let mut image = frame.to_rgb_image();
    if !frame.is_empty() {
      for detection in detections {
        self.draw_detection(&mut image, detection, class_names, palette);
      }
    }
    RgbFrame::from(image)
  }

  fn draw_detection(
    &self,
    image: &mut RgbImage,
    detection: &Detection,
    class_names: &[String],
    palette: &Palette,
  ) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let bbox = &detection.bbox;

    // 裁剪到图像范围内
    let x_min = bbox.x_min.max(0.0).floor();
    let y_min = bbox.y_min.max(0.0).floor();
    let x_max = bbox.x_max().min(w).ceil();
    let y_max = bbox.y_max().min(h).ceil();
    if !(x_min < x_max && y_min < y_max) {
      return;
    }

    let (x, y) = (x_min as i32, y_min as i32);
    let width = (x_max - x_min) as u32;
    let height = (y_max - y_min) as u32;
    let color = palette.color(detection.class_id);

    for t in 0..BOX_THICKNESS {
      if width <= 2 * t || height <= 2 * t {
        break;
      }
      let rect = Rect::at(x + t as i32, y + t as i32).of_size(width - 2 * t, height - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = label_text(detection, class_names);

    // 标签放在框的上方，放不下时贴着图像顶部
    let band_y = (y - LABEL_BAND_HEIGHT as i32).max(0);
    let text_width = (label.chars().count() as f32 * LABEL_CHAR_WIDTH).ceil() as i32;
    let band_width = text_width.min(image.width() as i32 - x).max(0) as u32;
    let band_height = LABEL_BAND_HEIGHT.min(image.height());
    if band_width == 0 || band_height == 0 {
      return;
    }

    let band = Rect::at(x, band_y).of_size(band_width, band_height);
    draw_filled_rect_mut(image, band, color);

    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      x,
      band_y + LABEL_TEXT_VERTICAL_PADDING,
      self.font_scale,
      &self.font,
      &label,
    );
  }
}

/// 标签文字：`类别:置信度`，置信度保留两位小数
fn label_text(detection: &Detection, class_names: &[String]) -> String {
  match class_names.get(detection.class_id) {
    Some(name) => format!("{}:{:.2}", name, detection.confidence),
    None => format!("{}:{:.2}", detection.class_id, detection.confidence),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::BoundingBox;

  fn annotator() -> Annotator {
    Annotator::new().unwrap()
  }

  fn names() -> Vec<String> {
    vec!["knife".to_string(), "gun".to_string()]
  }

  fn one(class_id: usize, x: f32, y: f32, w: f32, h: f32) -> DetectionSet {
    DetectionSet::new(vec![Detection {
      class_id,
      confidence: 0.87,
      bbox: BoundingBox::new(x, y, w, h),
    }])
  }

  #[test]
  fn palette_is_deterministic_and_distinct() {
    let a = Palette::new(8);
    let b = Palette::for_classes(&(0..8).map(|i| i.to_string()).collect::<Vec<_>>());
    assert_eq!(a, b);
    assert_ne!(a.color(0), a.color(1));
    assert_eq!(a.color(3), a.color(11));
  }

  #[test]
  fn annotation_does_not_touch_the_input() {
    let frame = RgbFrame::filled(200, 200, [255, 255, 255]);
    let palette = Palette::new(2);
    let annotated = annotator().annotate(&frame, &one(1, 50.0, 60.0, 80.0, 70.0), &names(), &palette);

    assert_eq!(frame, RgbFrame::filled(200, 200, [255, 255, 255]));
    let color = palette.color(1).0;
    assert_eq!(annotated.pixel(50, 100), Some(color));
    assert_eq!(annotated.pixel(51, 100), Some(color));
    assert_eq!(annotated.pixel(52, 100), Some([255, 255, 255]));
    // 标签底色在框的上方，文字从底色顶部往下两个像素开始
    assert_eq!(annotated.pixel(55, 40), Some(color));
  }

  #[test]
  fn boxes_outside_the_frame_are_clipped() {
    let frame = RgbFrame::filled(100, 100, [0, 0, 0]);
    let palette = Palette::new(2);
    let annotated =
      annotator().annotate(&frame, &one(0, -50.0, -50.0, 300.0, 300.0), &names(), &palette);
    assert_eq!((annotated.width(), annotated.height()), (100, 100));
    assert_eq!(annotated.pixel(0, 50), Some(palette.color(0).0));
    assert_eq!(annotated.pixel(99, 50), Some(palette.color(0).0));
  }

  #[test]
  fn empty_detections_return_an_equal_copy() {
    let frame = RgbFrame::filled(16, 8, [1, 2, 3]);
    let annotated = annotator().annotate(&frame, &DetectionSet::default(), &names(), &Palette::new(2));
    assert_eq!(annotated, frame);
  }

  #[test]
  fn box_fully_outside_is_skipped() {
    let frame = RgbFrame::filled(32, 32, [9, 9, 9]);
    let annotated =
      annotator().annotate(&frame, &one(0, 100.0, 100.0, 10.0, 10.0), &names(), &Palette::new(2));
    assert_eq!(annotated, frame);
  }

  #[test]
  fn label_text_is_drawn_on_the_band() {
    let frame = RgbFrame::filled(200, 200, [255, 255, 255]);
    let palette = Palette::new(2);
    let annotated = annotator().annotate(&frame, &one(0, 50.0, 60.0, 80.0, 70.0), &names(), &palette);

    let color = palette.color(0).0;
    let mut text_pixels = 0;
    let mut dark_pixels = 0;
    for y in 42..60 {
      for x in 50..120 {
        let pixel = annotated.pixel(x, y).unwrap();
        if pixel != color {
          text_pixels += 1;
        }
        if pixel.iter().all(|&c| c < 64) {
          dark_pixels += 1;
        }
      }
    }
    assert!(text_pixels > 0);
    assert!(dark_pixels > 0);
  }

  #[test]
  fn label_shows_class_and_two_decimals() {
    let detection = Detection {
      class_id: 0,
      confidence: 0.8666,
      bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
    };
    assert_eq!(label_text(&detection, &names()), "knife:0.87");

    let unknown = Detection {
      class_id: 7,
      ..detection
    };
    assert_eq!(label_text(&unknown, &names()), "7:0.87");
  }

  #[test]
  fn custom_font_file_must_be_a_font() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(Annotator::from_font_file(&path).is_err());
  }
}
