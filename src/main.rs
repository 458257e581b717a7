// 该文件是 Anjian （安检） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{fs::OpenOptions, path::Path, sync::Mutex};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{Level, info};
use url::Url;

use anjian::{
  FromUrl,
  controller::{Controller, Mode, snapshot_name},
  input::{DefaultOpener, SourceDescriptor},
  model::{ModelConfig, ModelConfigBuilder, NmsMode, OnnxBuilder},
  output::{OutputWrapper, SaveImageFileOutput, draw::Annotator},
  task::{OneShotTask, Task},
};
#[cfg(feature = "gstreamer_input")]
use anjian::{controller::StreamPolicy, task::ContinuousTask};

#[cfg(feature = "gstreamer_input")]
use crate::args::StreamArgs;
use crate::args::{Args, Command, ModelArgs};

fn init_logging(args: &Args) -> Result<()> {
  let level = if args.verbose {
    Level::DEBUG
  } else {
    Level::INFO
  };

  match &args.log_file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("无法打开日志文件: {}", path.display()))?;
      tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    }
    None => tracing_subscriber::fmt().with_max_level(level).init(),
  }
  Ok(())
}

/// 模型 URL 或路径加上命令行覆盖项
fn model_config(args: &ModelArgs) -> Result<ModelConfig> {
  let mut builder = match Url::parse(&args.model) {
    Ok(url) if url.scheme() == "onnx" => ModelConfigBuilder::from_url(&url)?,
    _ => ModelConfig::builder().model_path(&args.model),
  };

  if let Some(labels) = &args.labels {
    builder = builder.labels_path(labels);
  }
  if let Some(score) = args.score {
    builder = builder.score_threshold(score);
  }
  if let Some(nms) = args.nms {
    builder = builder.nms_threshold(nms);
  }
  if let Some(confidence) = args.confidence {
    builder = builder.confidence_threshold(confidence);
  }
  if let Some(size) = args.size {
    builder = builder.input_size(size, size);
  }
  if args.per_class_nms {
    builder = builder.nms_mode(NmsMode::PerClass);
  }

  Ok(builder.build()?)
}

/// 指定字体文件时加载，否则使用内置字体
fn annotator(args: &ModelArgs) -> Result<Annotator> {
  match &args.font {
    Some(path) => Annotator::from_font_file(path)
      .with_context(|| format!("无法加载字体: {}", path.display())),
    None => Annotator::new().context("无法加载内置字体"),
  }
}

fn run_image(model: &ModelArgs, input: &Path, output: Option<&Url>) -> Result<()> {
  let config = model_config(model)?;
  let descriptor = SourceDescriptor::ImageFile(input.to_path_buf());

  let output = match output {
    Some(url) => OutputWrapper::from_url(url)?,
    None => {
      let name = snapshot_name(&descriptor, 1, Local::now());
      let path = input.with_file_name(format!("{}.png", name));
      OutputWrapper::SaveImageFileOutput(SaveImageFileOutput::new(path))
    }
  };

  let builder = OnnxBuilder::new().force_reference(model.reference_plan);
  let mut controller =
    Controller::new(Mode::Image, builder, DefaultOpener).with_annotator(annotator(model)?);
  controller.start(config, descriptor)?;

  let summary = OneShotTask.run_task(&mut controller, &output)?;
  info!("检测到 {} 个目标", summary.detections);
  Ok(())
}

#[cfg(feature = "gstreamer_input")]
fn run_stream(model: &ModelArgs, stream: &StreamArgs, descriptor: SourceDescriptor) -> Result<()> {
  let config = model_config(model)?;
  let output = OutputWrapper::from_url(&stream.output)?;
  let mode = Mode::for_source(descriptor.kind());

  let policy = if stream.preview_only {
    StreamPolicy::PreviewOnly
  } else {
    StreamPolicy::DetectEveryFrame
  };
  let builder = OnnxBuilder::new().force_reference(model.reference_plan);
  let mut controller = Controller::new(mode, builder, DefaultOpener)
    .with_policy(policy)
    .with_annotator(annotator(model)?);
  controller.start(config, descriptor)?;

  let summary = ContinuousTask::default()
    .with_frame_number(stream.frame_number)
    .with_pacing(!stream.no_pace)
    .run_task(&mut controller, &output)?;
  info!(
    "共处理 {} 帧, 跳过 {} 帧, 检测到 {} 个目标",
    summary.frames, summary.skipped, summary.detections
  );
  Ok(())
}

fn main() -> Result<()> {
  let args = Args::parse();
  init_logging(&args)?;

  info!("Anjian 行李违禁品检测");
  match &args.command {
    Command::Image {
      model,
      input,
      output,
    } => run_image(model, input, output.as_ref()),
    #[cfg(feature = "gstreamer_input")]
    Command::Video {
      model,
      stream,
      input,
    } => run_stream(model, stream, SourceDescriptor::VideoFile(input.clone())),
    #[cfg(feature = "gstreamer_input")]
    Command::Camera {
      model,
      stream,
      index,
    } => run_stream(model, stream, SourceDescriptor::Camera(*index)),
  }
}
