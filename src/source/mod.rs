//! 数据源
//!
//! 所有数据源对外只有两个能力：
//! - `processing_format`: 输出格式，生命周期内不变
//! - `refill`: 按需产出一块数据
//!
//! `current_buffer` 借用 `&self`，下一次 `refill`（`&mut self`）之前借用必须结束，
//! 需要跨 refill 保留数据时用 `CopySource` 显式复制

pub mod converter;
pub mod copy;
pub mod file;

pub use converter::ConverterSource;
pub use copy::CopySource;
pub use file::FileSource;

use crate::audio::{AudioFormat, SampleBuffer};

/// 拉取结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    HaveData,
    EndOfStream,
}

/// 数据源
pub trait Source {
    fn processing_format(&self) -> &AudioFormat;

    /// 产出至多 `requested_frames` 帧（也受缓冲区容量限制）
    fn refill(&mut self, requested_frames: usize) -> StreamStatus;

    /// 最近一次 `refill` 的结果
    fn current_buffer(&self) -> &SampleBuffer;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn processing_format(&self) -> &AudioFormat {
        (**self).processing_format()
    }

    fn refill(&mut self, requested_frames: usize) -> StreamStatus {
        (**self).refill(requested_frames)
    }

    fn current_buffer(&self) -> &SampleBuffer {
        (**self).current_buffer()
    }
}
