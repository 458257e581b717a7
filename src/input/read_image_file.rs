// 该文件是 Anjian （安检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{DetectError, FromUrl, FromUrlWithScheme, frame::RgbFrame, input::FrameSource};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像输入，只产生一帧
pub struct ImageFileInput {
  frame: Option<RgbFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    Self::open(Path::new(&path))
  }
}

impl ImageFileInput {
  /// 读取并解码图像，颜色统一转换为 RGB
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    info!(
      "读取图像文件: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(Self {
      frame: Some(RgbFrame::from(image.to_rgb8())),
    })
  }
}

impl FrameSource for ImageFileInput {
  fn next_frame(&mut self) -> Result<Option<RgbFrame>, DetectError> {
    Ok(self.frame.take())
  }
}
