//! 固定容量样本缓冲区
//!
//! 阶段之间传递数据的单元：
//! - 容量在分配时确定，之后不再改变（内存有界）
//! - `frame_length` 之外的存储内容未定义，读者只能读有效前缀
//! - 每轮拉取原地复用，不重新分配

use thiserror::Error;

use super::format::AudioFormat;

/// 缓冲区错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Frame length {requested} exceeds capacity {capacity}")]
    OutOfRange { requested: usize, capacity: usize },
    #[error("Buffer capacity must be positive")]
    ZeroCapacity,
    #[error("Channel count mismatch: {expected} != {actual}")]
    FormatMismatch { expected: u16, actual: u16 },
}

/// 样本缓冲区（平面 f32 存储）
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    format: AudioFormat,
    capacity: usize,
    frame_length: usize,
    /// 每声道一个平面，长度恒为 capacity
    planes: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// 分配指定容量的空缓冲区
    pub fn allocate(format: AudioFormat, capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        let planes = (0..format.channels()).map(|_| vec![0.0; capacity]).collect();
        Ok(Self {
            format,
            capacity,
            frame_length: 0,
            planes,
        })
    }

    #[inline]
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    #[inline]
    pub fn frame_capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame_length == 0
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }

    /// 设置有效帧数
    pub fn set_length(&mut self, frames: usize) -> Result<(), BufferError> {
        if frames > self.capacity {
            return Err(BufferError::OutOfRange {
                requested: frames,
                capacity: self.capacity,
            });
        }
        self.frame_length = frames;
        Ok(())
    }

    #[inline]
    pub fn clear(&mut self) {
        self.frame_length = 0;
    }

    /// 单声道有效数据
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.planes[ch][..self.frame_length]
    }

    /// 单声道完整存储（生产者写入用，写完后调用 `set_length`）
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        &mut self.planes[ch]
    }

    /// 所有声道的有效数据
    pub fn channels(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.planes.iter().map(move |p| &p[..self.frame_length])
    }

    /// 逐声道原样复制另一个缓冲区的有效区域
    pub fn copy_from(&mut self, other: &SampleBuffer) -> Result<(), BufferError> {
        if other.channel_count() != self.channel_count() {
            return Err(BufferError::FormatMismatch {
                expected: self.format.channels(),
                actual: other.format.channels(),
            });
        }
        let frames = other.frame_length;
        if frames > self.capacity {
            return Err(BufferError::OutOfRange {
                requested: frames,
                capacity: self.capacity,
            });
        }
        for (dst, src) in self.planes.iter_mut().zip(other.channels()) {
            dst[..frames].copy_from_slice(src);
        }
        self.frame_length = frames;
        Ok(())
    }

    /// 按帧交织追加有效区域
    ///
    /// 输出：[L0, R0, L1, R1, ...]；单声道即原样
    pub fn append_interleaved_to(&self, out: &mut Vec<f32>) {
        let channels = self.channel_count();
        out.reserve(self.frame_length * channels);

        if channels == 1 {
            out.extend_from_slice(self.channel(0));
            return;
        }

        for frame in 0..self.frame_length {
            for plane in &self.planes {
                out.push(plane[frame]);
            }
        }
    }
}
