// 该文件是 Anjian （安检） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

/// 行李安检违禁品检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输出调试日志
  #[arg(short, long, global = true)]
  pub verbose: bool,

  /// 日志文件（追加写入），不指定时输出到终端
  #[arg(long, value_name = "FILE", global = true)]
  pub log_file: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 检测单张图像
  Image {
    #[command(flatten)]
    model: ModelArgs,
    /// 输入图像
    #[arg(long, value_name = "FILE")]
    input: PathBuf,
    /// 输出 URL，默认保存为输入旁边的 detected_<文件名>.png
    #[arg(long, value_name = "OUTPUT")]
    output: Option<Url>,
  },
  /// 检测视频文件
  #[cfg(feature = "gstreamer_input")]
  Video {
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    stream: StreamArgs,
    /// 输入视频
    #[arg(long, value_name = "FILE")]
    input: PathBuf,
  },
  /// 摄像头实时检测
  #[cfg(feature = "gstreamer_input")]
  Camera {
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    stream: StreamArgs,
    /// 摄像头编号
    #[arg(long, default_value_t = 0)]
    index: u32,
  },
}

#[derive(ClapArgs, Debug)]
pub struct ModelArgs {
  /// 模型文件路径或 onnx:// URL
  #[arg(long, value_name = "MODEL")]
  pub model: String,

  /// 类别文件，每行一个类别名
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 分数阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub score: Option<f32>,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub nms: Option<f32>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 网络输入尺寸
  #[arg(long, value_name = "PIXELS")]
  pub size: Option<u32>,

  /// 按类别分别做 NMS
  #[arg(long)]
  pub per_class_nms: bool,

  /// 使用未优化的参考执行计划
  #[arg(long)]
  pub reference_plan: bool,

  /// 标签字体（TTF/OTF）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

#[cfg(feature = "gstreamer_input")]
#[derive(ClapArgs, Debug)]
pub struct StreamArgs {
  /// 输出 URL，例如 folder:///var/lib/anjian 或 image:///tmp/latest.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 处理指定帧数后停止
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,

  /// 只预览，不做检测
  #[arg(long)]
  pub preview_only: bool,

  /// 不按输入帧率节流
  #[arg(long)]
  pub no_pace: bool,
}
