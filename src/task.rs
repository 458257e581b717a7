// 该文件是 Anjian （安检） 项目的一部分。
// src/task.rs - 任务循环
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

use std::{
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  DetectError,
  controller::{Controller, Tick},
  input::SourceOpener,
  model::ModelBuilder,
  output::Render,
};

/// 未知帧率时的默认值
pub const DEFAULT_FPS: f64 = 30.0;

pub trait Task<B: ModelBuilder, O: SourceOpener, R: Render>: Sized {
  type Error;
  fn run_task(self, controller: &mut Controller<B, O>, output: &R)
  -> Result<TaskSummary, Self::Error>;
}

/// 任务统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
  /// 完成检测的帧数
  pub frames: u64,
  /// 跳过的帧数
  pub skipped: u64,
  /// 检测到的目标总数
  pub detections: u64,
}

/// 单次检测，用于图像模式
pub struct OneShotTask;

impl<B, O, R> Task<B, O, R> for OneShotTask
where
  B: ModelBuilder,
  O: SourceOpener,
  R: Render,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, controller: &mut Controller<B, O>, output: &R) -> anyhow::Result<TaskSummary> {
    info!("开始任务...");
    let now = Instant::now();
    match controller.tick()? {
      Tick::Cycle(cycle) => {
        info!(
          "检测完成, 耗时: {:.2?}, 共 {} 个目标",
          now.elapsed(),
          cycle.detections.len()
        );
        output.render_result(&cycle.annotated, &cycle.detections, controller.class_names())?;
        Ok(TaskSummary {
          frames: 1,
          skipped: 0,
          detections: cycle.detections.len() as u64,
        })
      }
      Tick::Skipped { error, .. } => Err(error).context("检测失败"),
      Tick::Idle | Tick::Stopped(_) => Err(anyhow::anyhow!("控制器没有待处理的帧")),
    }
  }
}

/// 连续检测，用于视频与摄像头
///
/// 按输入源帧率节流，Ctrl-C 通过停止句柄结束循环。
#[derive(Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  pace: bool,
  handle_ctrlc: bool,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      pace: true,
      handle_ctrlc: true,
    }
  }
}

impl ContinuousTask {
  /// 处理指定帧数后停止
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_pacing(mut self, pace: bool) -> Self {
    self.pace = pace;
    self
  }

  pub fn with_ctrlc(mut self, handle: bool) -> Self {
    self.handle_ctrlc = handle;
    self
  }
}

fn frame_period(fps: Option<f64>) -> Duration {
  let fps = fps
    .filter(|fps| fps.is_finite() && *fps > 0.0)
    .unwrap_or(DEFAULT_FPS);
  Duration::from_secs_f64(1.0 / fps)
}

impl<B, O, R> Task<B, O, R> for ContinuousTask
where
  B: ModelBuilder,
  O: SourceOpener,
  R: Render,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, controller: &mut Controller<B, O>, output: &R) -> anyhow::Result<TaskSummary> {
    info!("开始任务...");

    if self.handle_ctrlc {
      let stop = controller.stop_handle();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        stop.request_stop();
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })
      .context("无法设置 Ctrl-C 处理函数")?;
    }

    let mut summary = TaskSummary::default();
    loop {
      let started = Instant::now();
      match controller.tick() {
        Ok(Tick::Cycle(cycle)) => {
          summary.frames += 1;
          summary.detections += cycle.detections.len() as u64;
          info!(
            "第 {} 帧: {} 个目标, 耗时: {:.2?}",
            cycle.frame_index,
            cycle.detections.len(),
            started.elapsed()
          );
          output.render_result(&cycle.annotated, &cycle.detections, controller.class_names())?;
        }
        Ok(Tick::Skipped { frame_index, error }) => {
          summary.skipped += 1;
          warn!("第 {} 帧被跳过: {}", frame_index, error);
        }
        Ok(Tick::Stopped(reason)) => {
          warn!("任务停止: {:?}", reason);
          break;
        }
        Ok(Tick::Idle) => {
          info!("控制器空闲, 退出任务循环");
          break;
        }
        Err(DetectError::SourceExhausted) => {
          info!("输入源已结束");
          break;
        }
        Err(e) => return Err(e).context("任务中止"),
      }

      if self
        .frame_number
        .map(|n| controller.frame_count() >= n)
        .unwrap_or(false)
      {
        info!("达到指定帧数 {}, 退出任务循环", controller.frame_count());
        controller.stop();
        break;
      }

      if self.pace {
        let period = frame_period(controller.source_fps());
        if let Some(rest) = period.checked_sub(started.elapsed()) {
          thread::sleep(rest);
        }
      }
    }

    info!(
      "任务完成: {} 帧, 跳过 {} 帧, {} 个目标",
      summary.frames, summary.skipped, summary.detections
    );
    Ok(summary)
  }
}
