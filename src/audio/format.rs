//! 音频格式描述
//!
//! 内部表示：所有样本统一为归一化 f32（[-1.0, 1.0]），按声道平面存储
//! `SampleFormat` 描述的是"声明的"样本表示：
//! - 对整数表示，转换阶段会把样本量化到对应位深的网格上
//! - 写文件时按该表示编码（见 `audio::sink`）

use std::fmt;

use thiserror::Error;

/// 格式错误
///
/// 构造阶段即可发现的问题，数据流动前就会失败
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),
    #[error("Channel count must be positive")]
    ZeroChannels,
    #[error("Invalid channel map {map:?} for {input_channels} input / {output_channels} output channels")]
    InvalidChannelMap {
        map: Vec<usize>,
        input_channels: u16,
        output_channels: u16,
    },
    #[error("Unsupported conversion {from} -> {to}: {reason}")]
    UnsupportedConversion {
        from: AudioFormat,
        to: AudioFormat,
        reason: String,
    },
    #[error("Format cannot be written to file: {0}")]
    UnsupportedContainer(String),
}

/// 声道布局
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    /// 交织：LRLRLR...
    Interleaved,
    /// 非交织：每声道独立平面
    NonInterleaved,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::NonInterleaved
    }
}

/// 样本表示
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
    I24,
    I32,
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::F32
    }
}

impl SampleFormat {
    /// 位深
    #[inline]
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::I16 => 16,
            Self::I24 => 24,
            Self::F32 | Self::I32 => 32,
        }
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32)
    }

    /// 整数满量程（正向最大值 + 1）
    #[inline]
    fn full_scale(self) -> f64 {
        match self {
            Self::I16 => 32768.0,
            Self::I24 => 8388608.0,
            Self::I32 => 2147483648.0,
            Self::F32 => 1.0,
        }
    }

    /// 将归一化样本量化到本表示的网格上
    ///
    /// F32 原样返回；整数表示先 clamp 再四舍五入
    #[inline]
    pub fn quantize(self, sample: f32) -> f32 {
        if self.is_float() {
            return sample;
        }
        let scale = self.full_scale();
        let max = scale - 1.0;
        let v = (sample as f64 * scale).round().clamp(-scale, max);
        (v / scale) as f32
    }

    /// 归一化样本转为整数（写文件用）
    ///
    /// 结果落在本位深的有符号范围内（I24 不左对齐）
    #[inline]
    pub fn to_int(self, sample: f32) -> i32 {
        let scale = self.full_scale();
        let max = scale - 1.0;
        (sample as f64 * scale).round().clamp(-scale, max) as i32
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::I16 => "i16",
            Self::I24 => "i24",
            Self::I32 => "i32",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float" => Ok(Self::F32),
            "i16" | "s16" => Ok(Self::I16),
            "i24" | "s24" => Ok(Self::I24),
            "i32" | "s32" => Ok(Self::I32),
            other => Err(format!("unknown sample format '{}' (expected f32, i16, i24, i32)", other)),
        }
    }
}

/// 音频格式
///
/// 构造后不可变；所有字段都相同才相等
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioFormat {
    sample_rate: f64,
    channels: u16,
    sample_format: SampleFormat,
    layout: ChannelLayout,
}

impl AudioFormat {
    /// 创建新的音频格式
    pub fn new(
        sample_rate: f64,
        channels: u16,
        sample_format: SampleFormat,
        layout: ChannelLayout,
    ) -> Result<Self, FormatError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(FormatError::InvalidSampleRate(sample_rate));
        }
        if channels == 0 {
            return Err(FormatError::ZeroChannels);
        }
        Ok(Self {
            sample_rate,
            channels,
            sample_format,
            layout,
        })
    }

    /// 非交织 f32（解码器的处理格式）
    pub fn float_planar(sample_rate: f64, channels: u16) -> Result<Self, FormatError> {
        Self::new(
            sample_rate,
            channels,
            SampleFormat::F32,
            ChannelLayout::NonInterleaved,
        )
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    #[inline]
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// 帧数换算为秒
    #[inline]
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate
    }

    /// 整数采样率（容器写入需要）
    pub fn integral_sample_rate(&self) -> Option<u32> {
        let rounded = self.sample_rate.round();
        if (self.sample_rate - rounded).abs() < f64::EPSILON && rounded <= u32::MAX as f64 {
            Some(rounded as u32)
        } else {
            None
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.layout {
            ChannelLayout::Interleaved => "interleaved",
            ChannelLayout::NonInterleaved => "planar",
        };
        write!(
            f,
            "{} Hz, {} ch, {}, {}",
            self.sample_rate, self.channels, self.sample_format, layout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_descriptors() {
        assert_eq!(
            AudioFormat::float_planar(0.0, 2),
            Err(FormatError::InvalidSampleRate(0.0))
        );
        assert!(AudioFormat::float_planar(f64::NAN, 2).is_err());
        assert_eq!(
            AudioFormat::float_planar(48000.0, 0),
            Err(FormatError::ZeroChannels)
        );
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = AudioFormat::float_planar(48000.0, 2).unwrap();
        let b = AudioFormat::new(48000.0, 2, SampleFormat::F32, ChannelLayout::Interleaved).unwrap();
        let c = AudioFormat::new(48000.0, 2, SampleFormat::I16, ChannelLayout::NonInterleaved).unwrap();
        assert_eq!(a, AudioFormat::float_planar(48000.0, 2).unwrap());
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, AudioFormat::float_planar(44100.0, 2).unwrap());
    }

    #[test]
    fn test_sample_format_parse() {
        assert_eq!("I16".parse::<SampleFormat>(), Ok(SampleFormat::I16));
        assert_eq!("float".parse::<SampleFormat>(), Ok(SampleFormat::F32));
        assert!("u8".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn test_frames_to_secs() {
        let format = AudioFormat::new(96000.0, 2, SampleFormat::I24, ChannelLayout::Interleaved).unwrap();
        assert_eq!(format.sample_format().bits_per_sample(), 24);
        assert_eq!(format.layout(), ChannelLayout::Interleaved);
        assert!((format.frames_to_secs(48000) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_quantize_16bit() {
        let q = SampleFormat::I16;
        // 正好落在网格上的值不变
        assert_eq!(q.quantize(0.5), 0.5);
        // 满量程正向被 clamp 到 32767/32768
        assert_eq!(q.quantize(1.0), 32767.0 / 32768.0);
        assert_eq!(q.quantize(-1.0), -1.0);
        assert_eq!(q.to_int(-1.0), -32768);
        assert_eq!(q.to_int(1.5), 32767);
    }

    #[test]
    fn test_24bit_sign() {
        let q = SampleFormat::I24;
        assert_eq!(q.to_int(-1.0), -8388608);
        assert_eq!(q.to_int(1.0), 8388607);
        assert!(q.to_int(-0.25) < 0);
    }

    #[test]
    fn test_float_is_untouched() {
        assert_eq!(SampleFormat::F32.quantize(0.123_456_7), 0.123_456_7);
    }

    #[test]
    fn test_integral_rate() {
        let f = AudioFormat::float_planar(16000.0, 1).unwrap();
        assert_eq!(f.integral_sample_rate(), Some(16000));
        let g = AudioFormat::float_planar(44100.5, 1).unwrap();
        assert_eq!(g.integral_sample_rate(), None);
    }
}
