// 该文件是 Anjian （安检） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频与摄像头输入
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

//! # GStreamer 输入
//!
//! 视频文件与摄像头都通过 GStreamer 管道解码，末端的 appsink 输出 RGB 帧。
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 并在 `Cargo.toml` 中启用 `gstreamer_input` 特性。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  DetectError,
  frame::RgbFrame,
  input::{FrameSource, SourceDescriptor},
};

/// 等待管道进入 Playing 的时间上限
const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// 描述不是视频文件或摄像头
  #[error("不支持的输入源: {0}")]
  UnsupportedSource(String),
  /// 视频文件不存在
  #[error("视频文件不存在: {0}")]
  FileNotFound(String),
  /// GStreamer 库错误
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer 布尔错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("无法转换元素为 appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  /// 管道错误
  #[error("管道错误: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    device: String,
    caps: Option<(u32, u32, u32)>,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource { device, caps } => match caps {
        Some((width, height, fps)) => format!(
          "v4l2src device={} ! video/x-raw,width={},height={},framerate={}/1",
          device, width, height, fps
        ),
        None => format!("v4l2src device={}", device),
      },
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl Default for GStreamerInputPipelineBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self {
      items: Vec::new(),
      live: false,
    }
  }

  /// 摄像头输入，实时源会丢弃来不及处理的帧
  pub fn camera(mut self, device: &str, caps: Option<(u32, u32, u32)>) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      device: device.to_string(),
      caps,
    });
    self.live = true;
    self
  }

  pub fn file(mut self, path: &Path) -> Self {
    self.items.push(GStreamerInputBuilderItem::FileSource(
      path.display().to_string(),
    ));
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  /// 根据输入源描述构建管道，输出统一为 RGB
  pub fn for_descriptor(descriptor: &SourceDescriptor) -> Result<Self, GStreamerInputError> {
    let builder = match descriptor {
      SourceDescriptor::Camera(index) => Self::new().camera(&format!("/dev/video{}", index), None),
      SourceDescriptor::VideoFile(path) => {
        if !path.is_file() {
          return Err(GStreamerInputError::FileNotFound(
            path.display().to_string(),
          ));
        }
        Self::new().file(path)
      }
      SourceDescriptor::ImageFile(path) => {
        return Err(GStreamerInputError::UnsupportedSource(
          path.display().to_string(),
        ));
      }
    };
    Ok(builder.target_format("RGB"))
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    if self.live {
      format!(
        "{} ! appsink max-buffers=2 drop=true name=sink",
        basic_pipeline
      )
    } else {
      format!("{} ! appsink sync=false name=sink", basic_pipeline)
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description();
    info!("GStreamer 管道描述: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    if let Err(e) = wait_for_playing(&pipeline) {
      if let Err(stop) = pipeline.set_state(gst::State::Null) {
        warn!("无法停止 GStreamer 管道: {}", stop);
      }
      return Err(e);
    }

    Ok(GStreamerInput {
      pipeline,
      appsink,
      fps: None,
    })
  }
}

/// 启动管道并等待状态切换完成
///
/// 文件无法解码或设备无法打开时，错误在这里而不是第一次取帧时暴露。
fn wait_for_playing(pipeline: &gst::Pipeline) -> Result<(), GStreamerInputError> {
  pipeline.set_state(gst::State::Playing)?;
  let (result, current, _) = pipeline.state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));

  if let Some(message) = bus_error(pipeline) {
    return Err(GStreamerInputError::PipelineError(message));
  }
  match result? {
    gst::StateChangeSuccess::Async => Err(GStreamerInputError::PipelineError(format!(
      "管道在 {} 秒内未进入 Playing 状态",
      STATE_CHANGE_TIMEOUT_SECS
    ))),
    _ => {
      debug!("GStreamer 管道状态: {:?}", current);
      Ok(())
    }
  }
}

fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(match err.debug() {
      Some(debug) => format!("{} ({})", err.error(), debug),
      None => err.error().to_string(),
    }),
    _ => None,
  }
}

/// GStreamer 视频输入
///
/// 释放时管道被置为 Null，设备随之关闭。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  fps: Option<f64>,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl FrameSource for GStreamerInput {
  fn next_frame(&mut self) -> Result<Option<RgbFrame>, DetectError> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => {
        info!("GStreamer 输入结束");
        return Ok(None);
      }
      Err(e) => return Err(DetectError::device(format!("无法获取帧: {}", e))),
    };

    let (frame, fps) = convert_sample(&sample).map_err(DetectError::device)?;
    if self.fps.is_none() && fps.is_some() {
      debug!("输入帧率: {:?}", fps);
      self.fps = fps;
    }
    Ok(Some(frame))
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<(RgbFrame, Option<f64>), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;
  let fps = video_info.fps();
  let fps = (fps.numer() > 0 && fps.denom() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let row_bytes = width as usize * 3;
  let expected_size = stride * (height as usize).saturating_sub(1) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 去掉每行末尾的对齐填充
  let mut pixels = Vec::with_capacity(row_bytes * height as usize);
  for row in 0..height as usize {
    pixels.extend_from_slice(&data[row * stride..row * stride + row_bytes]);
  }

  let frame = match video_info.format() {
    gst_video::VideoFormat::Rgb => RgbFrame::new(width, height, pixels),
    gst_video::VideoFormat::Bgr => RgbFrame::from_bgr(width, height, pixels),
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }
  .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?;

  Ok((frame, fps))
}
