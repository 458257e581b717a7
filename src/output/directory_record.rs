// 该文件是 Anjian （安检） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Local};
use image::codecs::jpeg::JpegEncoder;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, detector::DetectionSet, frame::RgbFrame, output::Render,
};

const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期分目录记录检测结果
///
/// 每帧写出 `<年>/<月>/<日>/<时-分-秒>-<序号>.jpg` 以及同名的 `.json` 记录文件，
/// 记录内容为 [`DetectionSet::records`] 生成的扁平记录。
/// 默认只记录有检测结果的帧，`always` 参数记录所有帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let directory = urlencoding::decode(uri.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| uri.path().to_string());

    Ok(Self::new(directory, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: AtomicU32::new(0),
      always,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.jpg",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  /// 保存一帧及其记录，返回图像路径
  pub fn record(
    &self,
    frame: &RgbFrame,
    result: &DetectionSet,
    class_names: &[String],
  ) -> Result<PathBuf, DirectoryRecordOutputError> {
    let path = self.frame_path()?;

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&frame.to_rgb_image())?;
    std::fs::write(&path, &jpeg)?;

    let records = result
      .records(class_names, &jpeg)
      .iter()
      .map(|r| r.to_json())
      .collect::<Vec<_>>();
    let image_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let document = json!({
      "image": image_name,
      "width": frame.width(),
      "height": frame.height(),
      "detections": records,
    });
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_vec_pretty(&document)?,
    )?;

    debug!("记录 {} 个检测结果到 {}", result.len(), path.display());
    Ok(path)
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &RgbFrame,
    result: &DetectionSet,
    class_names: &[String],
  ) -> Result<(), Self::Error> {
    if self.always || !result.is_empty() {
      self.record(frame, result, class_names)?;
    }
    Ok(())
  }
}
