// 该文件是 Anjian （安检） 项目的一部分。
// src/model/config.rs - 模型配置
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
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, letterbox::DEFAULT_PAD_COLOR};

const DEFAULT_SCORE_THRESHOLD: f32 = 0.6;
const DEFAULT_NMS_THRESHOLD: f32 = 0.55;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("阈值 {name} 必须位于 [0, 1] 之间, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("输入尺寸必须为正数: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("类别列表为空")]
  EmptyClassList,
  #[error("缺少模型文件路径")]
  MissingModelPath,
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("无效参数: {key}={value}")]
  InvalidParameter { key: String, value: String },
  #[error("无法读取类别文件 {path}: {message}")]
  ClassFile { path: String, message: String },
  #[error("检测模式与输入源不匹配: {0}")]
  ModeMismatch(String),
  #[error("无法加载标注字体: {0}")]
  Font(String),
}

/// 网络期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 非极大值抑制的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsMode {
  /// 不区分类别
  #[default]
  ClassAgnostic,
  /// 只在同一类别之间抑制
  PerClass,
}

/// 模型配置，构建后不可修改
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  model_path: PathBuf,
  class_names: Vec<String>,
  score_threshold: f32,
  nms_threshold: f32,
  confidence_threshold: f32,
  input_size: (u32, u32),
  channel_order: ChannelOrder,
  nms_mode: NmsMode,
  max_detections: Option<usize>,
  pad_color: [u8; 3],
}

impl ModelConfig {
  pub fn builder() -> ModelConfigBuilder {
    ModelConfigBuilder::default()
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn class_names(&self) -> &[String] {
    &self.class_names
  }

  pub fn class_name(&self, class_id: usize) -> Option<&str> {
    self.class_names.get(class_id).map(String::as_str)
  }

  pub fn score_threshold(&self) -> f32 {
    self.score_threshold
  }

  pub fn nms_threshold(&self) -> f32 {
    self.nms_threshold
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  /// (宽, 高)
  pub fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  pub fn channel_order(&self) -> ChannelOrder {
    self.channel_order
  }

  pub fn nms_mode(&self) -> NmsMode {
    self.nms_mode
  }

  pub fn max_detections(&self) -> Option<usize> {
    self.max_detections
  }

  pub fn pad_color(&self) -> [u8; 3] {
    self.pad_color
  }
}

#[derive(Debug, Clone)]
pub struct ModelConfigBuilder {
  model_path: Option<PathBuf>,
  class_names: Vec<String>,
  labels_path: Option<PathBuf>,
  score_threshold: f32,
  nms_threshold: f32,
  confidence_threshold: f32,
  input_size: (u32, u32),
  channel_order: ChannelOrder,
  nms_mode: NmsMode,
  max_detections: Option<usize>,
  pad_color: [u8; 3],
}

impl Default for ModelConfigBuilder {
  fn default() -> Self {
    Self {
      model_path: None,
      class_names: Vec::new(),
      labels_path: None,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      input_size: DEFAULT_INPUT_SIZE,
      channel_order: ChannelOrder::default(),
      nms_mode: NmsMode::default(),
      max_detections: None,
      pad_color: DEFAULT_PAD_COLOR,
    }
  }
}

impl ModelConfigBuilder {
  pub fn model_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.model_path = Some(path.into());
    self
  }

  pub fn class_names<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.class_names = names.into_iter().map(Into::into).collect();
    self
  }

  /// 类别文件只在未直接给出类别时读取
  pub fn labels_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn score_threshold(mut self, value: f32) -> Self {
    self.score_threshold = value;
    self
  }

  pub fn nms_threshold(mut self, value: f32) -> Self {
    self.nms_threshold = value;
    self
  }

  pub fn confidence_threshold(mut self, value: f32) -> Self {
    self.confidence_threshold = value;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = (width, height);
    self
  }

  pub fn channel_order(mut self, order: ChannelOrder) -> Self {
    self.channel_order = order;
    self
  }

  pub fn nms_mode(mut self, mode: NmsMode) -> Self {
    self.nms_mode = mode;
    self
  }

  pub fn max_detections(mut self, max: Option<usize>) -> Self {
    self.max_detections = max;
    self
  }

  pub fn pad_color(mut self, color: [u8; 3]) -> Self {
    self.pad_color = color;
    self
  }

  pub fn build(self) -> Result<ModelConfig, ConfigError> {
    let model_path = self.model_path.ok_or(ConfigError::MissingModelPath)?;

    for (name, value) in [
      ("score_threshold", self.score_threshold),
      ("nms_threshold", self.nms_threshold),
      ("confidence_threshold", self.confidence_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        error!("阈值 {} 超出范围: {}", name, value);
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }

    let (width, height) = self.input_size;
    if width == 0 || height == 0 {
      return Err(ConfigError::InvalidInputSize(width, height));
    }

    let class_names = match (self.class_names.is_empty(), self.labels_path) {
      (false, _) => self.class_names,
      (true, Some(path)) => load_class_names(&path)?,
      (true, None) => Vec::new(),
    };
    if class_names.is_empty() {
      return Err(ConfigError::EmptyClassList);
    }

    debug!(
      "模型配置: {}, {} 个类别, 输入 {}x{}",
      model_path.display(),
      class_names.len(),
      width,
      height
    );

    Ok(ModelConfig {
      model_path,
      class_names,
      score_threshold: self.score_threshold,
      nms_threshold: self.nms_threshold,
      confidence_threshold: self.confidence_threshold,
      input_size: self.input_size,
      channel_order: self.channel_order,
      nms_mode: self.nms_mode,
      max_detections: self.max_detections,
      pad_color: self.pad_color,
    })
  }

  fn apply_query(mut self, key: &str, value: &str) -> Result<Self, ConfigError> {
    let invalid = || ConfigError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    };
    let parse_f32 = |v: &str| v.parse::<f32>().map_err(|_| invalid());
    let parse_u32 = |v: &str| v.parse::<u32>().map_err(|_| invalid());

    match key {
      "labels" => self.labels_path = Some(PathBuf::from(value)),
      "classes" => {
        self.class_names = value
          .split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(String::from)
          .collect()
      }
      "score" => self.score_threshold = parse_f32(value)?,
      "nms" => self.nms_threshold = parse_f32(value)?,
      "confidence" => self.confidence_threshold = parse_f32(value)?,
      "width" => self.input_size.0 = parse_u32(value)?,
      "height" => self.input_size.1 = parse_u32(value)?,
      "size" => {
        self.input_size = match value.split_once('x') {
          Some((w, h)) => (parse_u32(w)?, parse_u32(h)?),
          None => {
            let side = parse_u32(value)?;
            (side, side)
          }
        }
      }
      "order" => {
        self.channel_order = match value {
          "rgb" | "RGB" => ChannelOrder::Rgb,
          "bgr" | "BGR" => ChannelOrder::Bgr,
          _ => return Err(invalid()),
        }
      }
      "nms_mode" => {
        self.nms_mode = match value {
          "agnostic" => NmsMode::ClassAgnostic,
          "per-class" | "per_class" => NmsMode::PerClass,
          _ => return Err(invalid()),
        }
      }
      "max_det" => self.max_detections = Some(parse_u32(value)? as usize),
      "pad" => {
        let parts = value
          .split(',')
          .map(|v| v.trim().parse::<u8>().map_err(|_| invalid()))
          .collect::<Result<Vec<u8>, _>>()?;
        self.pad_color = match parts.as_slice() {
          [r, g, b] => [*r, *g, *b],
          [v] => [*v, *v, *v],
          _ => return Err(invalid()),
        }
      }
      _ => debug!("忽略未知的模型参数: {}={}", key, value),
    }
    Ok(self)
  }
}

impl FromUrlWithScheme for ModelConfigBuilder {
  const SCHEME: &'static str = "onnx";
}

/// `onnx:///path/model.onnx?labels=/path/classes.txt&size=640&score=0.6&nms=0.55&confidence=0.6`
impl FromUrl for ModelConfigBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let path = urlencoding::decode(url.path()).map_err(|_| ConfigError::InvalidParameter {
      key: "path".to_string(),
      value: url.path().to_string(),
    })?;
    if path.is_empty() {
      return Err(ConfigError::MissingModelPath);
    }

    let mut builder = ModelConfigBuilder::default().model_path(path.into_owned());
    for (key, value) in url.query_pairs() {
      builder = builder.apply_query(&key, &value)?;
    }
    Ok(builder)
  }
}

/// 解析类别文本：每行一个类别，忽略空行和 `#` 注释
pub fn parse_class_names(text: &str) -> Vec<String> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && !line.starts_with('#'))
    .map(String::from)
    .collect()
}

pub fn load_class_names(path: &Path) -> Result<Vec<String>, ConfigError> {
  let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ClassFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;
  Ok(parse_class_names(&text))
}
