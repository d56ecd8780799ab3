//! 重采样模块
//!
//! 对转换阶段而言，重采样引擎是一个不透明的状态机：
//! - 由（输入格式，输出格式）构造
//! - 首次转换前可配置声道映射、下混、质量档位
//! - `convert` 需要更多输入时回调 `InputProvider`，内部自行缓冲
//!
//! 具体 DSP 由 rubato 提供（见 `engine`）

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::audio::{AudioFormat, BufferError, FormatError, SampleBuffer};

pub mod channel_map;
pub mod engine;

pub use channel_map::ChannelMixer;
pub use engine::RubatoEngine;

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Input block format {actual} does not match engine input {expected}")]
    InputMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },
    #[error("Output buffer format {actual} does not match engine output {expected}")]
    OutputMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },
    #[error("Resampling failed: {0}")]
    Resample(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// 单次转换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertStatus {
    /// 输出缓冲区有数据（可能是不满的最后一块）
    HaveData,
    /// 引擎已无更多输出
    EndOfStream,
}

/// 输入回调
///
/// 引擎需要输入时调用；`None` 表示上游已结束。
/// 返回的借用只在下一次 `pull` 之前有效
pub trait InputProvider {
    fn pull(&mut self, requested_frames: usize) -> Option<&SampleBuffer>;
}

/// 重采样质量档位
///
/// 只影响 DSP 开销和抗混叠效果，不影响帧数契约
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResamplerQuality {
    /// 多项式插值，最快
    Fast,
    /// 64-tap sinc，线性插值
    #[default]
    Normal,
    /// 256-tap sinc，三次插值
    High,
    /// FFT 重采样（整数采样率时），离线处理最佳
    Mastering,
}

impl fmt::Display for ResamplerQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Mastering => "mastering",
        };
        f.write_str(name)
    }
}

impl FromStr for ResamplerQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "mastering" | "max" => Ok(Self::Mastering),
            other => Err(format!(
                "unknown quality '{}' (expected fast, normal, high, mastering)",
                other
            )),
        }
    }
}

/// 重采样引擎
pub trait ResamplingEngine {
    fn input_format(&self) -> &AudioFormat;

    fn output_format(&self) -> &AudioFormat;

    /// 声道映射：输出声道 i 取输入声道 `map[i]`
    fn set_channel_map(&mut self, map: Vec<usize>) -> Result<(), EngineError>;

    /// 下混：多输入声道合并到更少的输出声道
    fn set_downmix(&mut self, enabled: bool) -> Result<(), EngineError>;

    fn set_quality(&mut self, quality: ResamplerQuality) -> Result<(), EngineError>;

    /// 填充一块输出
    ///
    /// `output` 的有效长度被设为产出的帧数；结束后返回 `EndOfStream` 且长度为 0
    fn convert(
        &mut self,
        output: &mut SampleBuffer,
        input: &mut dyn InputProvider,
    ) -> Result<ConvertStatus, EngineError>;

    /// 输出/输入采样率比
    fn ratio(&self) -> f64;
}
