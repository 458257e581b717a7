// 该文件是 Anjian （安检） 项目的一部分。
// src/model.rs - 模型
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

use crate::{DetectError, frame::RgbFrame};

mod config;
mod onnx;

pub use self::config::{
  ChannelOrder, ConfigError, ModelConfig, ModelConfigBuilder, NmsMode, load_class_names,
  parse_class_names,
};
pub use self::onnx::{ExecutionPlan, OnnxBuilder, OnnxModel};

/// 已加载的网络
///
/// 输入为 letterbox 之后的帧，输出为未经处理的候选框张量。
pub trait Model {
  fn infer(&self, input: &RgbFrame) -> Result<RawDetectionTensor, DetectError>;
}

/// 根据配置构建网络，返回网络句柄和输出层名称
pub trait ModelBuilder {
  type Model: Model;

  fn build(&self, config: &Arc<ModelConfig>) -> Result<(Self::Model, Vec<String>), DetectError>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn infer(&self, input: &RgbFrame) -> Result<RawDetectionTensor, DetectError> {
    (**self).infer(input)
  }
}

/// 网络原始输出
///
/// 每行一个候选框：`[cx, cy, w, h, objectness, class_score_0 ..]`，
/// 坐标位于网络输入像素空间。
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetectionTensor {
  rows: usize,
  cols: usize,
  data: Vec<f32>,
}

/// 每行最少的列数：4 个框坐标加 objectness
pub const RAW_BOX_COLUMNS: usize = 5;

impl RawDetectionTensor {
  pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, DetectError> {
    if cols < RAW_BOX_COLUMNS {
      return Err(DetectError::inference(format!(
        "输出列数至少为 {}, 实际为 {}",
        RAW_BOX_COLUMNS, cols
      )));
    }
    if rows * cols != data.len() {
      return Err(DetectError::inference(format!(
        "输出形状 {}x{} 与数据长度 {} 不匹配",
        rows,
        cols,
        data.len()
      )));
    }
    Ok(Self { rows, cols, data })
  }

  pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, DetectError> {
    let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(RAW_BOX_COLUMNS);
    let mut data = Vec::with_capacity(rows.len() * cols);
    for row in rows {
      let row = row.as_ref();
      if row.len() != cols {
        return Err(DetectError::inference(format!(
          "输出行长度不一致: 期望 {}, 实际 {}",
          cols,
          row.len()
        )));
      }
      data.extend_from_slice(row);
    }
    Self::new(rows.len(), cols, data)
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
    self.data.chunks_exact(self.cols)
  }
}
