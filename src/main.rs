//! Resample Chain - 多级音频格式转换
//!
//! 设计目标：
//! - 逐块拉取：内存占用与文件长度无关
//! - 帧数准确：输出长度 = round(输入帧数 × 采样率比)
//! - 恒等转换逐样本一致

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use resample_chain::audio::{AudioFormat, ChannelLayout, SampleFormat};
use resample_chain::decode::{AudioFileReader, FrameReader};
use resample_chain::pipeline::{convert_reader, ConversionPlan, PipelineConfig, StageSpec};
use resample_chain::resample::ResamplerQuality;

/// Resample Chain - multi-stage audio format converter
#[derive(Parser)]
#[command(name = "resample-chain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an audio file to WAV
    Convert(ConvertArgs),

    /// Show audio file information
    Info {
        /// Audio file to inspect
        input: PathBuf,
    },
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// Audio file to convert
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Output sample rate in Hz [default: input rate]
    #[arg(short, long)]
    rate: Option<u32>,

    /// Output channel count [default: input channels]
    #[arg(short, long)]
    channels: Option<u16>,

    /// Output channel i takes input channel map[i], e.g. 0,1
    #[arg(long, value_delimiter = ',')]
    channel_map: Option<Vec<usize>>,

    /// Mix surplus input channels into the output channels
    #[arg(long)]
    downmix: bool,

    /// Output sample format (f32, i16, i24, i32)
    #[arg(long, default_value = "f32")]
    sample_format: SampleFormat,

    /// Resampler quality (fast, normal, high, mastering)
    #[arg(short, long, default_value = "mastering")]
    quality: ResamplerQuality,

    /// Frames per block
    #[arg(short, long, default_value = "4096")]
    block_frames: usize,

    /// Speech preset: 48 kHz stereo, then 16 kHz mono (ignores format options)
    #[arg(long)]
    speech: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Commands::Convert(ref args) => convert(args)?,
        Commands::Info { ref input } => show_file_info(input)?,
    }

    Ok(())
}

/// 显示文件信息
fn show_file_info(path: &Path) -> anyhow::Result<()> {
    let reader = AudioFileReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let info = reader.info();

    println!("=== {} ===\n", path.display());
    println!("Format:      {}", info.format);
    println!("Codec:       {}", info.codec);
    println!("Sample rate: {} Hz", info.sample_rate);
    println!("Channels:    {}", info.channels);
    match info.bit_depth {
        Some(bits) => println!("Bit depth:   {}", bits),
        None => println!("Bit depth:   unknown"),
    }
    match (info.total_frames, info.duration_secs) {
        (Some(frames), Some(secs)) => println!("Duration:    {:.2}s ({} frames)", secs, frames),
        _ => println!("Duration:    unknown"),
    }
    println!("Processing:  {}", reader.format());

    Ok(())
}

/// 由命令行参数得到转换计划
fn plan_for(args: &ConvertArgs, input: &AudioFormat) -> anyhow::Result<ConversionPlan> {
    if args.speech {
        return Ok(ConversionPlan::speech_16k_mono()?);
    }

    let rate = args.rate.map_or(input.sample_rate(), f64::from);
    let channels = args.channels.unwrap_or(input.channels());
    let format = AudioFormat::new(rate, channels, args.sample_format, ChannelLayout::Interleaved)?;

    let mut spec = StageSpec::new(format).with_downmix(args.downmix);
    if let Some(map) = &args.channel_map {
        spec = spec.with_channel_map(map.clone());
    }
    Ok(ConversionPlan::new().then(spec))
}

/// 转换模式
fn convert(args: &ConvertArgs) -> anyhow::Result<()> {
    let reader = AudioFileReader::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let input_format = reader.format();
    let plan = plan_for(args, &input_format)?;

    // Ctrl+C 清除运行标志，驱动器在下一块停止
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let config = PipelineConfig::default()
        .with_block_frames(args.block_frames)
        .with_quality(args.quality)
        .with_running_flag(running);

    println!("{} -> {}", args.input.display(), args.output.display());
    println!("  from: {}", input_format);
    for (i, spec) in plan.stages().iter().enumerate() {
        println!("  stage {}: {}", i + 1, spec.format);
    }

    let output = convert_reader(reader, &args.output, &plan, &config)
        .inspect_err(|failure| {
            if let Some(partial) = &failure.partial {
                eprintln!(
                    "Partial: {} frames ({:.2}s) before the failure",
                    partial.frames,
                    partial.duration_secs()
                );
            }
        })
        .with_context(|| format!("Conversion of {} failed", args.input.display()))?;

    println!(
        "Done: {} frames ({:.2}s) in {} blocks",
        output.frames,
        output.duration_secs(),
        output.blocks
    );

    Ok(())
}
