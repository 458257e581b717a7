// 该文件是 Anjian （安检） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::{DetectError, FromUrl, frame::RgbFrame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 帧来源
///
/// 摄像头、视频文件和单张图像都通过同一个调用取帧。
pub trait FrameSource {
  /// 取下一帧，`Ok(None)` 表示输入源已结束
  fn next_frame(&mut self) -> Result<Option<RgbFrame>, DetectError>;

  /// 输入源报告的帧率，未知时为 `None`
  fn fps(&self) -> Option<f64> {
    None
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn next_frame(&mut self) -> Result<Option<RgbFrame>, DetectError> {
    (**self).next_frame()
  }

  fn fps(&self) -> Option<f64> {
    (**self).fps()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  Camera,
  VideoFile,
  ImageFile,
}

/// 输入源描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
  /// 摄像头编号，对应 `/dev/video<N>`
  Camera(u32),
  VideoFile(PathBuf),
  ImageFile(PathBuf),
}

impl SourceDescriptor {
  pub fn kind(&self) -> SourceKind {
    match self {
      SourceDescriptor::Camera(_) => SourceKind::Camera,
      SourceDescriptor::VideoFile(_) => SourceKind::VideoFile,
      SourceDescriptor::ImageFile(_) => SourceKind::ImageFile,
    }
  }

  /// 文件类输入源的路径
  pub fn path(&self) -> Option<&Path> {
    match self {
      SourceDescriptor::Camera(_) => None,
      SourceDescriptor::VideoFile(path) | SourceDescriptor::ImageFile(path) => Some(path),
    }
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的摄像头编号: {0}")]
  InvalidCamera(String),
  #[error("缺少文件路径")]
  MissingPath,
}

impl FromUrl for SourceDescriptor {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let path = || {
      let path = urlencoding::decode(url.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| url.path().to_string());
      if path.is_empty() || path == "/" {
        Err(InputError::MissingPath)
      } else {
        Ok(PathBuf::from(path))
      }
    };

    match url.scheme() {
      "camera" => {
        let index = url
          .host_str()
          .filter(|h| !h.is_empty())
          .unwrap_or_else(|| url.path().trim_matches('/'));
        let index = if index.is_empty() { "0" } else { index };
        index
          .parse::<u32>()
          .map(SourceDescriptor::Camera)
          .map_err(|_| InputError::InvalidCamera(index.to_string()))
      }
      "video" => Ok(SourceDescriptor::VideoFile(path()?)),
      "image" => Ok(SourceDescriptor::ImageFile(path()?)),
      scheme => Err(InputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

/// 根据描述打开输入源
pub trait SourceOpener {
  type Source: FrameSource;

  fn open(&self, descriptor: &SourceDescriptor) -> Result<Self::Source, DetectError>;
}

/// 按描述选择具体实现的输入源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FrameSource for InputWrapper {
  fn next_frame(&mut self) -> Result<Option<RgbFrame>, DetectError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next_frame(),
      #[allow(unreachable_patterns)]
      _ => Ok(None),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.fps(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.fps(),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }
}

/// 默认的输入源打开方式：图像走 `image` 解码，视频与摄像头走 GStreamer
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
  type Source = InputWrapper;

  fn open(&self, descriptor: &SourceDescriptor) -> Result<InputWrapper, DetectError> {
    match descriptor {
      #[cfg(feature = "read_image_file")]
      SourceDescriptor::ImageFile(path) => ImageFileInput::open(path)
        .map(InputWrapper::ReadImageFile)
        .map_err(|e| DetectError::device(InputError::from(e))),
      #[cfg(feature = "gstreamer_input")]
      SourceDescriptor::VideoFile(_) | SourceDescriptor::Camera(_) => {
        GStreamerInputPipelineBuilder::for_descriptor(descriptor)
          .and_then(GStreamerInputPipelineBuilder::build)
          .map(InputWrapper::GStreamerInput)
          .map_err(|e| DetectError::device(InputError::from(e)))
      }
      #[allow(unreachable_patterns)]
      other => Err(DetectError::device(format!(
        "未启用支持 {:?} 的输入特性",
        other.kind()
      ))),
    }
  }
}
