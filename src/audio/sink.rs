//! 输出消费者
//!
//! 驱动器每产出一块数据就交给所有消费者：
//! - `WavFileSink`: 写 WAV 文件（hound）
//! - `SampleAccumulator`: 内存数组
//!
//! 写入格式就是缓冲区自身的格式，不做任何隐式转换

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{WavSpec, WavWriter};
use thiserror::Error;

use super::buffer::SampleBuffer;
use super::format::{AudioFormat, FormatError, SampleFormat};

/// 消费者错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Block format {actual} does not match sink format {expected}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },
    #[error("Sink already finished")]
    Finished,
    #[error("{0}")]
    Rejected(String),
}

/// 块消费者
pub trait FrameSink {
    /// 追加缓冲区的有效区域
    fn write(&mut self, block: &SampleBuffer) -> Result<(), SinkError>;

    /// 流结束后调用一次
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// WAV 文件写入器
///
/// WAV 在磁盘上总是交织存储，平面缓冲区写入时逐帧交织
pub struct WavFileSink {
    path: PathBuf,
    format: AudioFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl WavFileSink {
    /// 按最终阶段的输出格式创建文件
    pub fn create<P: AsRef<Path>>(path: P, format: AudioFormat) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let spec = wav_spec(&format)?;
        let writer = WavWriter::create(path, spec)?;

        log::info!("Writing {} ({})", path.display(), format);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer: Some(writer),
            frames_written: 0,
        })
    }
}

/// 由格式推导 WAV 头
fn wav_spec(format: &AudioFormat) -> Result<WavSpec, FormatError> {
    let sample_rate = format.integral_sample_rate().ok_or_else(|| {
        FormatError::UnsupportedContainer(format!(
            "WAV needs an integral sample rate, got {}",
            format.sample_rate()
        ))
    })?;

    let sample_format = if format.sample_format().is_float() {
        hound::SampleFormat::Float
    } else {
        hound::SampleFormat::Int
    };

    Ok(WavSpec {
        channels: format.channels(),
        sample_rate,
        bits_per_sample: format.sample_format().bits_per_sample(),
        sample_format,
    })
}

impl FrameSink for WavFileSink {
    fn write(&mut self, block: &SampleBuffer) -> Result<(), SinkError> {
        if block.format() != &self.format {
            return Err(SinkError::FormatMismatch {
                expected: self.format,
                actual: *block.format(),
            });
        }
        let writer = self.writer.as_mut().ok_or(SinkError::Finished)?;
        let sample_format = self.format.sample_format();
        let channels = block.channel_count();

        for frame in 0..block.frame_length() {
            for ch in 0..channels {
                let sample = block.channel(ch)[frame];
                match sample_format {
                    SampleFormat::F32 => writer.write_sample(sample)?,
                    SampleFormat::I16 => writer.write_sample(sample_format.to_int(sample) as i16)?,
                    SampleFormat::I24 | SampleFormat::I32 => {
                        writer.write_sample(sample_format.to_int(sample))?
                    }
                }
            }
        }

        self.frames_written += block.frame_length() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let writer = self.writer.take().ok_or(SinkError::Finished)?;
        writer.finalize()?;
        log::info!(
            "Finished {}: {} frames ({:.2}s)",
            self.path.display(),
            self.frames_written,
            self.format.frames_to_secs(self.frames_written)
        );
        Ok(())
    }
}

/// 内存累加器
///
/// 按帧交织保存所有样本
#[derive(Debug, Default)]
pub struct SampleAccumulator {
    samples: Vec<f32>,
    frames: u64,
    blocks: u64,
}

impl SampleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, block: &SampleBuffer) {
        block.append_interleaved_to(&mut self.samples);
        self.frames += block.frame_length() as u64;
        self.blocks += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl FrameSink for SampleAccumulator {
    fn write(&mut self, block: &SampleBuffer) -> Result<(), SinkError> {
        self.append(block);
        Ok(())
    }
}
