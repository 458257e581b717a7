// 该文件是 Anjian （安检） 项目的一部分。
// src/error.rs - 检测管线错误分类
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

use thiserror::Error;

use crate::model::ConfigError;

/// 检测管线对外暴露的错误
///
/// - `InvalidFrame` / `InferenceError`：只影响当前周期，控制器状态不变
/// - `ModelLoadError` / `DeviceUnavailable`：资源获取失败，控制器回到 Idle
/// - `SourceExhausted`：输入源正常结束，控制器回到 Idle
#[derive(Error, Debug)]
pub enum DetectError {
  #[error("无效帧: {0}")]
  InvalidFrame(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("输入源已结束")]
  SourceExhausted,
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("当前状态 {state} 不允许操作 {action}")]
  InvalidState {
    state: &'static str,
    action: &'static str,
  },
}

impl DetectError {
  pub fn invalid_frame(msg: impl Into<String>) -> Self {
    DetectError::InvalidFrame(msg.into())
  }

  pub fn inference(msg: impl std::fmt::Display) -> Self {
    DetectError::InferenceError(msg.to_string())
  }

  pub fn model_load(msg: impl std::fmt::Display) -> Self {
    DetectError::ModelLoadError(msg.to_string())
  }

  pub fn device(msg: impl std::fmt::Display) -> Self {
    DetectError::DeviceUnavailable(msg.to_string())
  }

  /// 是否只影响当前周期
  pub fn is_per_cycle(&self) -> bool {
    matches!(
      self,
      DetectError::InvalidFrame(_) | DetectError::InferenceError(_)
    )
  }
}
