// 该文件是 Anjian （安检） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};

use crate::DetectError;

pub const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// HWC 排列的 RGB 帧
///
/// 获取之后颜色顺序固定为 RGB。帧在各阶段之间按值移动，不共享。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, DetectError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(DetectError::invalid_frame(format!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        expected,
        data.len()
      )));
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 从 BGR 字节创建帧，转换为 RGB
  pub fn from_bgr(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self, DetectError> {
    for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
      pixel.swap(0, 2);
    }
    Self::new(width, height, data)
  }

  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
    let data = color.repeat(width as usize * height as usize);
    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// 面积为零
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width as usize;
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width + x as usize) * RGB_CHANNELS;
      Rgb([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    })
  }
}

impl AsNhwcFrame for RgbFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}
