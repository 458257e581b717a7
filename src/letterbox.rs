// 该文件是 Anjian （安检） 项目的一部分。
// src/letterbox.rs - 等比缩放加边框预处理
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

use image::{Rgb, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::{DetectError, frame::RgbFrame};

pub const DEFAULT_PAD_COLOR: [u8; 3] = [0, 0, 0];

/// 网络输入坐标与原始帧坐标之间的映射
///
/// `x_net = x_src * scale.0 + pad_x`，只在一次预处理到解码的往返中有效。
/// 缩放因子按实际缩放后的整数尺寸计算，两个方向只相差取整误差。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  pub scale: (f32, f32),
  pub pad_x: u32,
  pub pad_y: u32,
  pub source_size: (u32, u32),
  pub scaled_size: (u32, u32),
  pub target_size: (u32, u32),
}

impl LetterboxTransform {
  /// 计算将 `source` 放入 `target` 所需的缩放和边框
  ///
  /// 限制维度恰好填满目标尺寸，另一维度按整数运算向下取整，
  /// 剩余部分前后对半分配，多出的一个像素放在后面。
  pub fn compute(source: (u32, u32), target: (u32, u32)) -> Result<Self, DetectError> {
    let (w, h) = source;
    let (tw, th) = target;
    if w == 0 || h == 0 {
      return Err(DetectError::invalid_frame(format!(
        "输入帧面积为零: {}x{}",
        w, h
      )));
    }
    if tw == 0 || th == 0 {
      return Err(DetectError::invalid_frame(format!(
        "目标尺寸面积为零: {}x{}",
        tw, th
      )));
    }

    // tw / w <= th / h 时宽度是限制维度
    let width_limited = (tw as u64) * (h as u64) <= (th as u64) * (w as u64);
    let (scaled_w, scaled_h) = if width_limited {
      let scaled_h = ((h as u64 * tw as u64) / w as u64) as u32;
      (tw, scaled_h.clamp(1, th))
    } else {
      let scaled_w = ((w as u64 * th as u64) / h as u64) as u32;
      (scaled_w.clamp(1, tw), th)
    };

    Ok(Self {
      scale: (scaled_w as f32 / w as f32, scaled_h as f32 / h as f32),
      pad_x: (tw - scaled_w) / 2,
      pad_y: (th - scaled_h) / 2,
      source_size: source,
      scaled_size: (scaled_w, scaled_h),
      target_size: target,
    })
  }

  /// 网络输入坐标映射回原始帧坐标：先去掉边框，再除以缩放因子
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale.0,
      (y - self.pad_y as f32) / self.scale.1,
    )
  }

  /// 网络输入中的宽高映射回原始帧
  pub fn to_source_size(&self, w: f32, h: f32) -> (f32, f32) {
    (w / self.scale.0, h / self.scale.1)
  }

  pub fn to_network(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale.0 + self.pad_x as f32,
      y * self.scale.1 + self.pad_y as f32,
    )
  }
}

/// 将任意尺寸的帧等比缩放到 `target`，并用 `pad_color` 填充空白
pub fn letterbox(
  frame: &RgbFrame,
  target: (u32, u32),
  pad_color: [u8; 3],
) -> Result<(RgbFrame, LetterboxTransform), DetectError> {
  let transform = LetterboxTransform::compute((frame.width(), frame.height()), target)?;
  let (scaled_w, scaled_h) = transform.scaled_size;

  let source = frame.to_rgb_image();
  let scaled = if (scaled_w, scaled_h) == transform.source_size {
    source
  } else {
    image::imageops::resize(&source, scaled_w, scaled_h, FilterType::Triangle)
  };

  let mut canvas = RgbImage::from_pixel(target.0, target.1, Rgb(pad_color));
  image::imageops::replace(
    &mut canvas,
    &scaled,
    transform.pad_x as i64,
    transform.pad_y as i64,
  );

  debug!(
    "letterbox: {}x{} -> {}x{}, 缩放 ({:.4}, {:.4}), 边框 ({}, {})",
    frame.width(),
    frame.height(),
    scaled_w,
    scaled_h,
    transform.scale.0,
    transform.scale.1,
    transform.pad_x,
    transform.pad_y
  );

  Ok((RgbFrame::from(canvas), transform))
}
