//! 音频文件读取
//!
//! 使用 symphonia 库解码音频文件，支持：FLAC, WAV, AIFF, MP3
//!
//! 处理格式统一为非交织 f32：
//! - 每个 packet 解码后转换到 f32 平面，暂存在待读队列
//! - `read` 按调用方请求的帧数从队列取数据，与 packet 大小无关

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use thiserror::Error;

use crate::audio::{AudioFormat, BufferError, FormatError, SampleBuffer};

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),
    #[error("Unsupported audio format")]
    UnsupportedFormat,
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Failed to create decoder: {0}")]
    DecoderCreation(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Reader format {expected} does not match buffer format {actual}")]
    BufferMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// 帧读取游标（文件源的底层接口）
pub trait FrameReader {
    /// 读出数据的格式，生命周期内不变
    fn format(&self) -> AudioFormat;

    /// 读取至多 `max_frames` 帧到 `into`
    ///
    /// `into` 的有效长度被设为实际读取的帧数，返回 0 表示读完
    fn read(&mut self, into: &mut SampleBuffer, max_frames: usize) -> Result<usize, DecodeError>;
}

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channels: u16,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    /// 总时长（秒）
    pub duration_secs: Option<f64>,
    /// 格式名称
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

/// 音频文件读取器
pub struct AudioFileReader {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    format: AudioFormat,
    /// 已解码未读出的样本（每声道一个队列）
    pending: PlanarQueue,
}

impl AudioFileReader {
    /// 打开音频文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // 提示文件扩展名
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|_| DecodeError::UnsupportedFormat)?;

        let reader = probed.format;
        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        // 查找第一个音频轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or(DecodeError::NoAudioTrack)?;
        let total_frames = codec_params.n_frames;

        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AudioInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration_secs: total_frames.map(|f| f as f64 / sample_rate as f64),
            format: format_name,
            codec: codec_name,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        let format = AudioFormat::float_planar(sample_rate as f64, channels)?;

        log::info!(
            "Opened {}: {} | {} | {}Hz {}ch {}bit | {} frames",
            path.display(),
            info.format,
            info.codec,
            info.sample_rate,
            info.channels,
            info.bit_depth.unwrap_or(0),
            info.total_frames
                .map(|f| f.to_string())
                .unwrap_or_else(|| "?".to_string())
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            format,
            pending: PlanarQueue::new(channels as usize),
        })
    }

    /// 获取音频信息
    pub fn info(&self) -> &AudioInfo {
        &self.info
    }
}

/// 解码下一个 packet 到待读队列
///
/// 返回 false 表示文件结束
fn decode_packet(
    reader: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
    track_id: u32,
    pending: &mut PlanarQueue,
) -> Result<bool, DecodeError> {
    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(false);
            }
            Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
        };

        // 跳过非目标轨道
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                // 跳过损坏的帧
                log::debug!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
        };

        if decoded.frames() == 0 {
            continue;
        }

        match decoded {
            AudioBufferRef::U8(buf) => pending.push(&*buf),
            AudioBufferRef::U16(buf) => pending.push(&*buf),
            AudioBufferRef::U24(buf) => pending.push(&*buf),
            AudioBufferRef::U32(buf) => pending.push(&*buf),
            AudioBufferRef::S8(buf) => pending.push(&*buf),
            AudioBufferRef::S16(buf) => pending.push(&*buf),
            AudioBufferRef::S24(buf) => pending.push(&*buf),
            AudioBufferRef::S32(buf) => pending.push(&*buf),
            AudioBufferRef::F32(buf) => pending.push(&*buf),
            AudioBufferRef::F64(buf) => pending.push(&*buf),
        }
        return Ok(true);
    }
}

impl FrameReader for AudioFileReader {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, into: &mut SampleBuffer, max_frames: usize) -> Result<usize, DecodeError> {
        if into.channel_count() != self.format.channels() as usize {
            return Err(DecodeError::BufferMismatch {
                expected: self.format,
                actual: *into.format(),
            });
        }
        let want = max_frames.min(into.frame_capacity());

        let Self {
            reader,
            decoder,
            track_id,
            pending,
            ..
        } = self;
        let track_id = *track_id;
        pending.fill(want, |queue| {
            decode_packet(&mut **reader, &mut **decoder, track_id, queue)
        })?;

        Ok(pending.pop_into(into, want)?)
    }
}

/// 平面样本队列
///
/// 队列非空时遇到的解码错误先挂起，已解码的帧读完后再报告
struct PlanarQueue {
    planes: Vec<Vec<f32>>,
    eof: bool,
    deferred: Option<DecodeError>,
}

impl PlanarQueue {
    fn new(channels: usize) -> Self {
        Self {
            planes: vec![Vec::new(); channels],
            eof: false,
            deferred: None,
        }
    }

    /// 解码直到队列至少有 `want` 帧或文件结束
    fn fill<F>(&mut self, want: usize, mut decode_next: F) -> Result<(), DecodeError>
    where
        F: FnMut(&mut Self) -> Result<bool, DecodeError>,
    {
        while self.len() < want && !self.eof {
            match decode_next(self) {
                Ok(true) => {}
                Ok(false) => self.eof = true,
                Err(e) if self.len() > 0 => {
                    log::warn!(
                        "Decode failed with {} frames pending, delivering them first: {}",
                        self.len(),
                        e
                    );
                    self.deferred = Some(e);
                    self.eof = true;
                }
                Err(e) => return Err(e),
            }
        }
        if self.len() == 0 {
            if let Some(e) = self.deferred.take() {
                return Err(e);
            }
        }
        Ok(())
    }

    #[inline]
    fn len(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    /// 追加解码结果（任意样本类型 → f32）
    ///
    /// 文件声道数以 codec 参数为准，多余的 packet 声道被忽略，缺失的补零
    fn push<S>(&mut self, buf: &AudioBuffer<S>)
    where
        S: Sample + IntoSample<f32>,
    {
        let frames = buf.frames();
        let available = buf.spec().channels.count();
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            if ch < available {
                plane.extend(buf.chan(ch).iter().map(|&s| s.into_sample()));
            } else {
                plane.extend(std::iter::repeat(0.0).take(frames));
            }
        }
    }

    /// 取出至多 `max` 帧写入缓冲区
    fn pop_into(&mut self, into: &mut SampleBuffer, max: usize) -> Result<usize, BufferError> {
        let frames = self.len().min(max);
        into.set_length(frames)?;
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            into.channel_mut(ch)[..frames].copy_from_slice(&plane[..frames]);
            plane.drain(..frames);
        }
        Ok(frames)
    }
}

/// 内存读取器
///
/// 从平面样本数组供数据，用于生成信号和测试
pub struct MemoryReader {
    format: AudioFormat,
    planes: Vec<Vec<f32>>,
    position: usize,
}

impl MemoryReader {
    /// `planes` 每声道一个数组，长度需一致
    pub fn new(format: AudioFormat, planes: Vec<Vec<f32>>) -> Result<Self, DecodeError> {
        let frames = planes.first().map_or(0, Vec::len);
        if planes.len() != format.channels() as usize || planes.iter().any(|p| p.len() != frames) {
            return Err(DecodeError::DecodeFailed(format!(
                "expected {} equal-length planes",
                format.channels()
            )));
        }
        Ok(Self {
            format,
            planes,
            position: 0,
        })
    }

    pub fn total_frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }
}

impl FrameReader for MemoryReader {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, into: &mut SampleBuffer, max_frames: usize) -> Result<usize, DecodeError> {
        if into.format() != &self.format {
            return Err(DecodeError::BufferMismatch {
                expected: self.format,
                actual: *into.format(),
            });
        }
        let remaining = self.total_frames() - self.position;
        let frames = remaining.min(max_frames).min(into.frame_capacity());
        let range = self.position..self.position + frames;
        into.set_length(frames)?;
        for (ch, plane) in self.planes.iter().enumerate() {
            into.channel_mut(ch)[..frames].copy_from_slice(&plane[range.clone()]);
        }
        self.position += frames;
        Ok(frames)
    }
}
