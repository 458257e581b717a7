// 该文件是 Anjian （安检） 项目的一部分。
// src/controller.rs - 检测模式控制器
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

//! # 模式控制器
//!
//! 三种检测模式共用一条管线：取帧、letterbox、推理、解码、标注。
//! 控制器以状态机驱动管线，每次 [`Controller::tick`] 只做一个有界的工作单元。
//!
//! ```text
//! 实时/视频: Idle -> Configuring -> Streaming <-> Paused
//! 图像:      Idle -> Configuring -> SingleShot -> Idle
//! ```
//!
//! 非法的状态转换返回 [`DetectError::InvalidState`]，状态保持不变。

use std::path::Path;
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::{
  DetectError,
  detector::{self, DetectionSet},
  frame::RgbFrame,
  input::{FrameSource, SourceDescriptor, SourceKind, SourceOpener},
  letterbox::letterbox,
  model::{ConfigError, Model, ModelBuilder, ModelConfig},
  output::draw::{Annotator, Palette},
};

/// 检测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// 摄像头实时检测
  Realtime,
  /// 视频文件检测
  Video,
  /// 单张图像检测
  Image,
}

impl Mode {
  pub fn accepts(&self, kind: SourceKind) -> bool {
    matches!(
      (self, kind),
      (Mode::Realtime, SourceKind::Camera)
        | (Mode::Video, SourceKind::VideoFile)
        | (Mode::Image, SourceKind::ImageFile)
    )
  }

  /// 与输入源类型对应的模式
  pub fn for_source(kind: SourceKind) -> Self {
    match kind {
      SourceKind::Camera => Mode::Realtime,
      SourceKind::VideoFile => Mode::Video,
      SourceKind::ImageFile => Mode::Image,
    }
  }
}

/// 控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Idle,
  Configuring,
  Streaming,
  Paused,
  SingleShot,
}

impl State {
  pub fn name(&self) -> &'static str {
    match self {
      State::Idle => "Idle",
      State::Configuring => "Configuring",
      State::Streaming => "Streaming",
      State::Paused => "Paused",
      State::SingleShot => "SingleShot",
    }
  }
}

/// 流式模式下每帧的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPolicy {
  /// 每帧都做检测
  #[default]
  DetectEveryFrame,
  /// 只预览，不做推理
  PreviewOnly,
}

/// 一个检测周期的结果
#[derive(Debug, Clone)]
pub struct Cycle {
  /// 原始帧
  pub raw: RgbFrame,
  /// 标注后的帧
  pub annotated: RgbFrame,
  pub detections: DetectionSet,
  /// 从 start 开始计数的帧序号，从 1 开始
  pub frame_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 收到停止请求
  Requested,
}

/// 一次 tick 的结果
#[derive(Debug)]
pub enum Tick {
  /// 当前状态没有工作可做
  Idle,
  /// 完成一个周期
  Cycle(Cycle),
  /// 当前周期失败，状态不变
  Skipped { frame_index: u64, error: DetectError },
  /// 控制器已回到 Idle
  Stopped(StopReason),
}

/// 跨线程请求停止
///
/// 请求在下一次 tick 开始时生效，正在执行的 tick 会先完成。
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
  flag: Arc<AtomicBool>,
}

impl StopHandle {
  pub fn request_stop(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_requested(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }

  fn take(&self) -> bool {
    self.flag.swap(false, Ordering::SeqCst)
  }
}

struct Pipeline<M, S> {
  model: M,
  source: S,
  annotator: Annotator,
  palette: Palette,
  output_names: Vec<String>,
}

/// 模式控制器
///
/// 控制器独占网络与输入源，两者在 start 时创建，回到 Idle 时释放。
pub struct Controller<B: ModelBuilder, O: SourceOpener> {
  mode: Mode,
  builder: B,
  opener: O,
  policy: StreamPolicy,
  annotator: Option<Annotator>,
  state: State,
  pipeline: Option<Pipeline<B::Model, O::Source>>,
  config: Option<Arc<ModelConfig>>,
  descriptor: Option<SourceDescriptor>,
  last_raw: Option<RgbFrame>,
  frame_count: u64,
  stop: StopHandle,
}

impl<B: ModelBuilder, O: SourceOpener> Controller<B, O> {
  pub fn new(mode: Mode, builder: B, opener: O) -> Self {
    Self {
      mode,
      builder,
      opener,
      policy: StreamPolicy::default(),
      annotator: None,
      state: State::Idle,
      pipeline: None,
      config: None,
      descriptor: None,
      last_raw: None,
      frame_count: 0,
      stop: StopHandle::default(),
    }
  }

  pub fn with_policy(mut self, policy: StreamPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// 不指定时在 start 中使用内置字体的标注器
  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = Some(annotator);
    self
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn state(&self) -> State {
    self.state
  }

  pub fn policy(&self) -> StreamPolicy {
    self.policy
  }

  /// 从 start 开始已经取到的帧数
  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  /// 最近一次 start 使用的配置，回到 Idle 后仍然保留
  pub fn config(&self) -> Option<&Arc<ModelConfig>> {
    self.config.as_ref()
  }

  pub fn class_names(&self) -> &[String] {
    self.config.as_deref().map(ModelConfig::class_names).unwrap_or(&[])
  }

  pub fn output_names(&self) -> &[String] {
    self
      .pipeline
      .as_ref()
      .map(|p| p.output_names.as_slice())
      .unwrap_or(&[])
  }

  /// 输入源报告的帧率
  pub fn source_fps(&self) -> Option<f64> {
    self.pipeline.as_ref().and_then(|p| p.source.fps())
  }

  pub fn is_active(&self) -> bool {
    self.pipeline.is_some()
  }

  fn invalid(&self, action: &'static str) -> DetectError {
    DetectError::InvalidState {
      state: self.state.name(),
      action,
    }
  }

  /// 加载网络并打开输入源
  ///
  /// 任一资源获取失败都回到 Idle 并返回错误，不会重试。
  pub fn start(
    &mut self,
    config: impl Into<Arc<ModelConfig>>,
    descriptor: SourceDescriptor,
  ) -> Result<(), DetectError> {
    if self.state != State::Idle {
      return Err(self.invalid("start"));
    }
    if !self.mode.accepts(descriptor.kind()) {
      return Err(DetectError::Config(ConfigError::ModeMismatch(format!(
        "{:?} 模式不接受 {:?} 输入源",
        self.mode,
        descriptor.kind()
      ))));
    }

    let config = config.into();
    self.state = State::Configuring;
    info!("启动 {:?} 模式, 输入源: {:?}", self.mode, descriptor);

    let annotator = match self.annotator.clone().map_or_else(Annotator::new, Ok) {
      Ok(annotator) => annotator,
      Err(e) => {
        error!("标注器初始化失败: {}", e);
        self.state = State::Idle;
        return Err(DetectError::Config(ConfigError::Font(e.to_string())));
      }
    };

    let (model, output_names) = match self.builder.build(&config) {
      Ok(built) => built,
      Err(e) => {
        error!("模型加载失败: {}", e);
        self.state = State::Idle;
        return Err(e);
      }
    };
    debug!("模型输出层: {:?}", output_names);

    let source = match self.opener.open(&descriptor) {
      Ok(source) => source,
      Err(e) => {
        error!("无法打开输入源: {}", e);
        self.state = State::Idle;
        return Err(e);
      }
    };

    self.pipeline = Some(Pipeline {
      model,
      source,
      annotator,
      palette: Palette::for_classes(config.class_names()),
      output_names,
    });
    self.config = Some(config);
    self.descriptor = Some(descriptor);
    self.last_raw = None;
    self.frame_count = 0;
    self.stop.take();

    self.state = match self.mode {
      Mode::Image => State::SingleShot,
      Mode::Realtime | Mode::Video => State::Streaming,
    };
    info!("控制器进入 {} 状态", self.state.name());
    Ok(())
  }

  /// 执行一个工作单元
  pub fn tick(&mut self) -> Result<Tick, DetectError> {
    if self.stop.take() && self.state != State::Idle {
      info!("收到停止请求");
      self.release();
      return Ok(Tick::Stopped(StopReason::Requested));
    }

    match self.state {
      State::Streaming => self.tick_streaming(),
      State::SingleShot => self.tick_single_shot(),
      State::Idle | State::Paused | State::Configuring => Ok(Tick::Idle),
    }
  }

  fn pull_frame(&mut self) -> Result<RgbFrame, DetectError> {
    let pulled = match self.pipeline.as_mut() {
      Some(pipeline) => pipeline.source.next_frame(),
      None => return Err(self.invalid("tick")),
    };

    match pulled {
      Ok(Some(frame)) => {
        self.frame_count += 1;
        Ok(frame)
      }
      Ok(None) => {
        info!("输入源已结束, 共 {} 帧", self.frame_count);
        self.release();
        Err(DetectError::SourceExhausted)
      }
      Err(e) => {
        error!("输入源错误: {}", e);
        self.release();
        Err(match e {
          DetectError::DeviceUnavailable(_) => e,
          other => DetectError::device(other),
        })
      }
    }
  }

  fn tick_streaming(&mut self) -> Result<Tick, DetectError> {
    let frame = self.pull_frame()?;
    let frame_index = self.frame_count;
    self.last_raw = Some(frame.clone());

    if self.policy == StreamPolicy::PreviewOnly {
      return Ok(Tick::Cycle(Cycle {
        annotated: frame.clone(),
        raw: frame,
        detections: DetectionSet::default(),
        frame_index,
      }));
    }

    Ok(self.cycle_or_skip(frame, frame_index))
  }

  fn tick_single_shot(&mut self) -> Result<Tick, DetectError> {
    let frame = self.pull_frame()?;
    let frame_index = self.frame_count;
    self.last_raw = Some(frame.clone());
    let tick = self.cycle_or_skip(frame, frame_index);
    self.release();
    Ok(tick)
  }

  fn cycle_or_skip(&self, frame: RgbFrame, frame_index: u64) -> Tick {
    match self.run_cycle(frame, frame_index) {
      Ok(cycle) => Tick::Cycle(cycle),
      Err(error) => {
        warn!("跳过第 {} 帧: {}", frame_index, error);
        Tick::Skipped { frame_index, error }
      }
    }
  }

  /// 预处理、推理、解码、标注
  fn run_cycle(&self, frame: RgbFrame, frame_index: u64) -> Result<Cycle, DetectError> {
    let (pipeline, config) = match (self.pipeline.as_ref(), self.config.as_ref()) {
      (Some(pipeline), Some(config)) => (pipeline, config),
      _ => return Err(self.invalid("detect")),
    };

    let (input, transform) = letterbox(&frame, config.input_size(), config.pad_color())?;
    let raw = pipeline.model.infer(&input)?;
    let detections = detector::decode(&raw, &transform, config)?;
    debug!("第 {} 帧检测到 {} 个目标", frame_index, detections.len());

    let annotated = pipeline.annotator.annotate(
      &frame,
      &detections,
      config.class_names(),
      &pipeline.palette,
    );

    Ok(Cycle {
      raw: frame,
      annotated,
      detections,
      frame_index,
    })
  }

  pub fn pause(&mut self) -> Result<(), DetectError> {
    if self.state != State::Streaming {
      return Err(self.invalid("pause"));
    }
    self.state = State::Paused;
    info!("暂停于第 {} 帧", self.frame_count);
    Ok(())
  }

  pub fn resume(&mut self) -> Result<(), DetectError> {
    if self.state != State::Paused {
      return Err(self.invalid("resume"));
    }
    self.state = State::Streaming;
    info!("继续检测");
    Ok(())
  }

  /// 暂停时对最近一帧做一次检测，不恢复播放
  pub fn detect_current(&mut self) -> Result<Cycle, DetectError> {
    if self.state != State::Paused {
      return Err(self.invalid("detect_current"));
    }
    let frame = self
      .last_raw
      .clone()
      .ok_or_else(|| DetectError::invalid_frame("暂停前没有取到任何帧"))?;
    self.run_cycle(frame, self.frame_count)
  }

  /// 回到 Idle 并释放网络与输入源
  pub fn stop(&mut self) {
    if self.state != State::Idle {
      info!("停止 {:?} 模式", self.mode);
    }
    self.release();
  }

  fn release(&mut self) {
    if self.pipeline.take().is_some() {
      debug!("释放网络与输入源");
    }
    self.state = State::Idle;
  }

  /// 当前帧快照的名称
  pub fn snapshot_name(&self) -> Option<String> {
    self
      .descriptor
      .as_ref()
      .map(|d| snapshot_name(d, self.frame_count, Local::now()))
  }
}

impl<B: ModelBuilder, O: SourceOpener> Drop for Controller<B, O> {
  fn drop(&mut self) {
    self.release();
  }
}

fn file_stem(path: &Path) -> String {
  path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "frame".to_string())
}

/// 快照命名
///
/// - 视频：`<视频文件名>_frame<N>`
/// - 摄像头：`frame_<日-月-年_时-分-秒>`
/// - 图像：`detected_<文件名>`
pub fn snapshot_name(descriptor: &SourceDescriptor, frame_index: u64, now: DateTime<Local>) -> String {
  match descriptor {
    SourceDescriptor::VideoFile(path) => format!("{}_frame{}", file_stem(path), frame_index),
    SourceDescriptor::Camera(_) => format!("frame_{}", now.format("%d-%m-%Y_%H-%M-%S")),
    SourceDescriptor::ImageFile(path) => format!("detected_{}", file_stem(path)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::RawDetectionTensor;
  use chrono::TimeZone;
  use std::collections::VecDeque;
  use std::path::PathBuf;
  use std::sync::Mutex;

  /// 对每帧输出固定候选框的网络
  struct FixedModel {
    rows: Vec<[f32; 6]>,
    fail: bool,
  }

  impl Model for FixedModel {
    fn infer(&self, _input: &RgbFrame) -> Result<RawDetectionTensor, DetectError> {
      if self.fail {
        return Err(DetectError::inference("模拟推理失败"));
      }
      RawDetectionTensor::from_rows(&self.rows)
    }
  }

  struct FixedBuilder {
    rows: Vec<[f32; 6]>,
    fail_load: bool,
    fail_infer: bool,
  }

  impl FixedBuilder {
    fn ok() -> Self {
      Self {
        rows: vec![[320.0, 320.0, 100.0, 100.0, 0.9, 1.0]],
        fail_load: false,
        fail_infer: false,
      }
    }
  }

  impl ModelBuilder for FixedBuilder {
    type Model = FixedModel;

    fn build(&self, _config: &Arc<ModelConfig>) -> Result<(FixedModel, Vec<String>), DetectError> {
      if self.fail_load {
        return Err(DetectError::model_load("模拟加载失败"));
      }
      Ok((
        FixedModel {
          rows: self.rows.clone(),
          fail: self.fail_infer,
        },
        vec!["output0".to_string()],
      ))
    }
  }

  /// 预先准备好若干帧的输入源，释放时记录
  struct ScriptedSource {
    frames: VecDeque<Result<Option<RgbFrame>, DetectError>>,
    dropped: Arc<AtomicBool>,
  }

  impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>, DetectError> {
      self.frames.pop_front().unwrap_or(Ok(None))
    }
  }

  impl Drop for ScriptedSource {
    fn drop(&mut self) {
      self.dropped.store(true, Ordering::SeqCst);
    }
  }

  struct ScriptedOpener {
    script: Mutex<Option<VecDeque<Result<Option<RgbFrame>, DetectError>>>>,
    dropped: Arc<AtomicBool>,
    unavailable: bool,
  }

  impl ScriptedOpener {
    fn frames(n: usize) -> Self {
      let script = (0..n)
        .map(|_| Ok(Some(RgbFrame::filled(1280, 720, [80, 80, 80]))))
        .collect();
      Self::with_script(script)
    }

    fn with_script(script: VecDeque<Result<Option<RgbFrame>, DetectError>>) -> Self {
      Self {
        script: Mutex::new(Some(script)),
        dropped: Arc::new(AtomicBool::new(false)),
        unavailable: false,
      }
    }
  }

  impl SourceOpener for ScriptedOpener {
    type Source = ScriptedSource;

    fn open(&self, _descriptor: &SourceDescriptor) -> Result<ScriptedSource, DetectError> {
      if self.unavailable {
        return Err(DetectError::device("模拟设备不可用"));
      }
      let frames = self.script.lock().unwrap().take().unwrap_or_default();
      Ok(ScriptedSource {
        frames,
        dropped: Arc::clone(&self.dropped),
      })
    }
  }

  fn config() -> ModelConfig {
    ModelConfig::builder()
      .model_path("model.onnx")
      .class_names(["knife"])
      .build()
      .unwrap()
  }

  fn video() -> SourceDescriptor {
    SourceDescriptor::VideoFile(PathBuf::from("/data/belt.mp4"))
  }

  #[test]
  fn exhausted_stream_returns_to_idle_and_releases_source() {
    let opener = ScriptedOpener::frames(2);
    let dropped = Arc::clone(&opener.dropped);
    let mut controller = Controller::new(Mode::Video, FixedBuilder::ok(), opener);

    controller.start(config(), video()).unwrap();
    assert_eq!(controller.state(), State::Streaming);

    for expected in 1..=2 {
      match controller.tick().unwrap() {
        Tick::Cycle(cycle) => {
          assert_eq!(cycle.frame_index, expected);
          assert_eq!(cycle.detections.len(), 1);
          let det = &cycle.detections.as_slice()[0];
          assert_eq!(det.bbox.x_min, 540.0);
          assert_eq!((cycle.annotated.width(), cycle.annotated.height()), (1280, 720));
          assert_ne!(cycle.annotated, cycle.raw);
        }
        other => panic!("unexpected tick: {:?}", other),
      }
    }

    assert!(matches!(controller.tick(), Err(DetectError::SourceExhausted)));
    assert_eq!(controller.state(), State::Idle);
    assert!(!controller.is_active());
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(controller.frame_count(), 2);
  }

  #[test]
  fn model_load_failure_returns_to_idle() {
    let builder = FixedBuilder {
      fail_load: true,
      ..FixedBuilder::ok()
    };
    let mut controller = Controller::new(Mode::Video, builder, ScriptedOpener::frames(1));

    let err = controller.start(config(), video()).unwrap_err();
    assert!(matches!(err, DetectError::ModelLoadError(_)));
    assert_eq!(controller.state(), State::Idle);
    assert!(matches!(controller.tick(), Ok(Tick::Idle)));
  }

  #[test]
  fn unavailable_device_returns_to_idle() {
    let mut opener = ScriptedOpener::frames(0);
    opener.unavailable = true;
    let mut controller = Controller::new(Mode::Realtime, FixedBuilder::ok(), opener);

    let err = controller
      .start(config(), SourceDescriptor::Camera(0))
      .unwrap_err();
    assert!(matches!(err, DetectError::DeviceUnavailable(_)));
    assert_eq!(controller.state(), State::Idle);
  }

  #[test]
  fn source_failure_mid_stream_is_device_unavailable() {
    let script = VecDeque::from(vec![
      Ok(Some(RgbFrame::filled(64, 64, [0, 0, 0]))),
      Err(DetectError::device("拔掉了摄像头")),
    ]);
    let opener = ScriptedOpener::with_script(script);
    let dropped = Arc::clone(&opener.dropped);
    let mut controller = Controller::new(Mode::Realtime, FixedBuilder::ok(), opener);
    controller
      .start(config(), SourceDescriptor::Camera(0))
      .unwrap();

    assert!(matches!(controller.tick(), Ok(Tick::Cycle(_))));
    assert!(matches!(
      controller.tick(),
      Err(DetectError::DeviceUnavailable(_))
    ));
    assert_eq!(controller.state(), State::Idle);
    assert!(dropped.load(Ordering::SeqCst));
  }

  #[test]
  fn mode_and_source_must_agree() {
    let mut controller = Controller::new(Mode::Image, FixedBuilder::ok(), ScriptedOpener::frames(1));
    let err = controller.start(config(), video()).unwrap_err();
    assert!(matches!(err, DetectError::Config(ConfigError::ModeMismatch(_))));
    assert_eq!(controller.state(), State::Idle);
  }

  #[test]
  fn pause_detect_current_and_resume() {
    let mut controller = Controller::new(Mode::Video, FixedBuilder::ok(), ScriptedOpener::frames(3));
    controller.start(config(), video()).unwrap();
    controller.tick().unwrap();

    controller.pause().unwrap();
    assert_eq!(controller.state(), State::Paused);
    assert!(matches!(controller.tick(), Ok(Tick::Idle)));
    assert_eq!(controller.frame_count(), 1);

    let cycle = controller.detect_current().unwrap();
    assert_eq!(cycle.frame_index, 1);
    assert_eq!(cycle.detections.len(), 1);
    assert_eq!(controller.state(), State::Paused);
    assert_eq!(controller.snapshot_name().unwrap(), "belt_frame1");

    controller.resume().unwrap();
    assert!(matches!(controller.tick(), Ok(Tick::Cycle(c)) if c.frame_index == 2));
  }

  #[test]
  fn illegal_transitions_keep_state() {
    let mut controller = Controller::new(Mode::Video, FixedBuilder::ok(), ScriptedOpener::frames(3));
    assert!(matches!(
      controller.pause(),
      Err(DetectError::InvalidState { state: "Idle", .. })
    ));
    assert!(controller.resume().is_err());
    assert!(controller.detect_current().is_err());
    assert_eq!(controller.state(), State::Idle);

    controller.start(config(), video()).unwrap();
    assert!(matches!(
      controller.start(config(), video()),
      Err(DetectError::InvalidState { state: "Streaming", action: "start" })
    ));
    assert!(controller.resume().is_err());
    assert_eq!(controller.state(), State::Streaming);
  }

  #[test]
  fn image_mode_runs_one_cycle_then_idles() {
    let opener = ScriptedOpener::frames(1);
    let dropped = Arc::clone(&opener.dropped);
    let mut controller = Controller::new(Mode::Image, FixedBuilder::ok(), opener);

    controller
      .start(config(), SourceDescriptor::ImageFile(PathBuf::from("/data/bag.jpg")))
      .unwrap();
    assert_eq!(controller.state(), State::SingleShot);

    assert!(matches!(controller.tick(), Ok(Tick::Cycle(_))));
    assert_eq!(controller.state(), State::Idle);
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(controller.snapshot_name().unwrap(), "detected_bag");
    assert_eq!(controller.class_names(), ["knife"]);
  }

  #[test]
  fn inference_failure_skips_the_cycle_only() {
    let builder = FixedBuilder {
      fail_infer: true,
      ..FixedBuilder::ok()
    };
    let mut controller = Controller::new(Mode::Video, builder, ScriptedOpener::frames(2));
    controller.start(config(), video()).unwrap();

    match controller.tick().unwrap() {
      Tick::Skipped { frame_index, error } => {
        assert_eq!(frame_index, 1);
        assert!(error.is_per_cycle());
      }
      other => panic!("unexpected tick: {:?}", other),
    }
    assert_eq!(controller.state(), State::Streaming);
  }

  #[test]
  fn invalid_frame_is_skipped() {
    let script = VecDeque::from(vec![Ok(Some(RgbFrame::filled(0, 0, [0, 0, 0])))]);
    let mut controller =
      Controller::new(Mode::Video, FixedBuilder::ok(), ScriptedOpener::with_script(script));
    controller.start(config(), video()).unwrap();
    assert!(matches!(
      controller.tick(),
      Ok(Tick::Skipped {
        error: DetectError::InvalidFrame(_),
        ..
      })
    ));
    assert_eq!(controller.state(), State::Streaming);
  }

  #[test]
  fn stop_handle_is_observed_on_next_tick() {
    let opener = ScriptedOpener::frames(5);
    let dropped = Arc::clone(&opener.dropped);
    let mut controller = Controller::new(Mode::Video, FixedBuilder::ok(), opener);
    controller.start(config(), video()).unwrap();
    controller.tick().unwrap();

    let handle = controller.stop_handle();
    std::thread::spawn(move || handle.request_stop())
      .join()
      .unwrap();

    assert!(matches!(
      controller.tick(),
      Ok(Tick::Stopped(StopReason::Requested))
    ));
    assert_eq!(controller.state(), State::Idle);
    assert!(dropped.load(Ordering::SeqCst));
    assert!(!controller.stop_handle().is_requested());
  }

  #[test]
  fn preview_only_skips_inference() {
    let builder = FixedBuilder {
      fail_infer: true,
      ..FixedBuilder::ok()
    };
    let mut controller = Controller::new(Mode::Video, builder, ScriptedOpener::frames(1))
      .with_policy(StreamPolicy::PreviewOnly);
    controller.start(config(), video()).unwrap();

    match controller.tick().unwrap() {
      Tick::Cycle(cycle) => {
        assert!(cycle.detections.is_empty());
        assert_eq!(cycle.annotated, cycle.raw);
      }
      other => panic!("unexpected tick: {:?}", other),
    }
  }

  #[test]
  fn explicit_stop_from_paused() {
    let opener = ScriptedOpener::frames(3);
    let dropped = Arc::clone(&opener.dropped);
    let mut controller = Controller::new(Mode::Video, FixedBuilder::ok(), opener);
    controller.start(config(), video()).unwrap();
    controller.tick().unwrap();
    controller.pause().unwrap();

    controller.stop();
    assert_eq!(controller.state(), State::Idle);
    assert!(dropped.load(Ordering::SeqCst));
  }

  #[test]
  fn snapshot_names_follow_source_kind() {
    let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
    assert_eq!(
      snapshot_name(&SourceDescriptor::Camera(0), 12, now),
      "frame_07-03-2024_09-05-01"
    );
    assert_eq!(
      snapshot_name(&SourceDescriptor::VideoFile(PathBuf::from("/v/belt.mp4")), 42, now),
      "belt_frame42"
    );
    assert_eq!(
      snapshot_name(&SourceDescriptor::ImageFile(PathBuf::from("x/bag.png")), 1, now),
      "detected_bag"
    );
  }
}
