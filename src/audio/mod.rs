//! 音频核心模块
//!
//! 包含：
//! - Format: 音频格式描述与样本表示
//! - Buffer: 固定容量样本缓冲区
//! - Sink: 输出消费者（WAV 文件、内存数组）

pub mod buffer;
pub mod format;
pub mod sink;

pub use buffer::{BufferError, SampleBuffer};
pub use format::{AudioFormat, ChannelLayout, FormatError, SampleFormat};
pub use sink::{FrameSink, SampleAccumulator, SinkError, WavFileSink};
