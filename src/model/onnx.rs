// 该文件是 Anjian （安检） 项目的一部分。
// src/model/onnx.rs - ONNX 推理引擎
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

use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use crate::{
  DetectError,
  frame::{AsNhwcFrame, RgbFrame},
  model::{ChannelOrder, Model, ModelBuilder, ModelConfig, RawDetectionTensor},
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// 执行计划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPlan {
  /// 经过算子融合与优化的计划
  Optimized,
  /// 仅做简化的参考计划
  Reference,
}

/// 基于 tract 的 ONNX 网络
pub struct OnnxModel {
  plan: Plan,
  execution: ExecutionPlan,
  config: Arc<ModelConfig>,
}

/// 构建 [`OnnxModel`]
///
/// 默认优先使用优化计划，图无法优化时回退到参考计划。
#[derive(Debug, Clone, Default)]
pub struct OnnxBuilder {
  force_reference: bool,
}

impl OnnxBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 跳过优化，直接使用参考计划
  pub fn force_reference(mut self, force: bool) -> Self {
    self.force_reference = force;
    self
  }
}

impl ModelBuilder for OnnxBuilder {
  type Model = OnnxModel;

  fn build(&self, config: &Arc<ModelConfig>) -> Result<(OnnxModel, Vec<String>), DetectError> {
    let path = config.model_path();
    info!("加载模型文件: {}", path.display());
    if !path.is_file() {
      return Err(DetectError::model_load(format!(
        "模型文件不存在: {}",
        path.display()
      )));
    }

    let (width, height) = config.input_size();
    let model = tract_onnx::onnx()
      .model_for_path(path)
      .map_err(|e| DetectError::model_load(format!("无法解析模型 {}: {:#}", path.display(), e)))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          f32::datum_type(),
          tvec!(1, 3, height as usize, width as usize),
        ),
      )
      .map_err(|e| DetectError::model_load(format!("无法设置模型输入: {:#}", e)))?;

    let output_names = model
      .output_outlets()
      .map_err(|e| DetectError::model_load(format!("无法获取模型输出: {:#}", e)))?
      .iter()
      .map(|outlet| model.node(outlet.node).name.clone())
      .collect::<Vec<_>>();
    debug!("模型输出层: {:?}", output_names);

    let typed = model
      .into_typed()
      .and_then(|m| m.into_decluttered())
      .map_err(|e| DetectError::model_load(format!("模型类型推导失败: {:#}", e)))?;

    let (optimized, execution) = if self.force_reference {
      (typed, ExecutionPlan::Reference)
    } else {
      match typed.clone().into_optimized() {
        Ok(optimized) => (optimized, ExecutionPlan::Optimized),
        Err(e) => {
          warn!("模型优化失败, 使用参考计划: {:#}", e);
          (typed, ExecutionPlan::Reference)
        }
      }
    };

    let plan = optimized
      .into_runnable()
      .map_err(|e| DetectError::model_load(format!("无法创建执行计划: {:#}", e)))?;
    info!("模型加载完成, 执行计划: {:?}", execution);

    Ok((
      OnnxModel {
        plan,
        execution,
        config: Arc::clone(config),
      },
      output_names,
    ))
  }
}

/// 将 HWC 字节帧转换为归一化到 [0, 1] 的 NCHW 张量
pub fn frame_to_tensor(frame: &RgbFrame, order: ChannelOrder) -> Tensor {
  let width = frame.width() as usize;
  let height = frame.height() as usize;
  let pixels = frame.as_nhwc();

  tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, channel, y, x)| {
    let channel = match order {
      ChannelOrder::Rgb => channel,
      ChannelOrder::Bgr => 2 - channel,
    };
    pixels[(y * width + x) * 3 + channel] as f32 / 255.0
  })
  .into_tensor()
}

impl Model for OnnxModel {
  fn infer(&self, input: &RgbFrame) -> Result<RawDetectionTensor, DetectError> {
    let (width, height) = self.config.input_size();
    if (input.width(), input.height()) != (width, height) {
      return Err(DetectError::inference(format!(
        "输入尺寸 {}x{} 与模型输入 {}x{} 不匹配",
        input.width(),
        input.height(),
        width,
        height
      )));
    }

    let tensor = frame_to_tensor(input, self.config.channel_order());
    debug!("执行模型推理, 执行计划: {:?}", self.execution);
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| DetectError::inference(format!("{:#}", e)))?;

    let output = outputs
      .first()
      .ok_or_else(|| DetectError::inference("模型没有输出"))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| DetectError::inference(format!("模型输出不是 f32: {:#}", e)))?;

    raw_tensor_from_view(view)
  }
}

/// 将第一个输出整理为每行一个候选框的矩阵
///
/// 接受 `[1, N, C]` 与 `[N, C]`，其余形状或列数不足都视为推理失败。
fn raw_tensor_from_view(view: tract_ndarray::ArrayViewD<f32>) -> Result<RawDetectionTensor, DetectError> {
  let (rows, cols) = match view.shape() {
    [1, rows, cols] => (*rows, *cols),
    [rows, cols] => (*rows, *cols),
    shape => {
      return Err(DetectError::inference(format!(
        "无法识别的输出形状: {:?}",
        shape
      )));
    }
  };
  debug!("模型输出形状: {}x{}", rows, cols);

  RawDetectionTensor::new(rows, cols, view.iter().copied().collect())
}
