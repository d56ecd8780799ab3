//! 复制数据源
//!
//! 上游缓冲区每轮原地复用，下游需要在上游下一次 refill 之后仍持有数据时，
//! 在中间插一个 CopySource：它拥有自己的缓冲区，逐声道原样复制上游的有效区域

use crate::audio::{AudioFormat, BufferError, SampleBuffer};

use super::{Source, StreamStatus};

pub struct CopySource<S: Source> {
    input: S,
    buffer: SampleBuffer,
}

impl<S: Source> CopySource<S> {
    pub fn new(input: S, block_frames: usize) -> Result<Self, BufferError> {
        let buffer = SampleBuffer::allocate(*input.processing_format(), block_frames)?;
        Ok(Self { input, buffer })
    }
}

impl<S: Source> Source for CopySource<S> {
    fn processing_format(&self) -> &AudioFormat {
        self.input.processing_format()
    }

    fn refill(&mut self, requested_frames: usize) -> StreamStatus {
        if self.input.refill(requested_frames) == StreamStatus::EndOfStream {
            self.buffer.clear();
            return StreamStatus::EndOfStream;
        }

        match self.buffer.copy_from(self.input.current_buffer()) {
            Ok(()) => StreamStatus::HaveData,
            Err(e) => {
                log::error!("Failed to copy upstream block: {}", e);
                self.buffer.clear();
                StreamStatus::EndOfStream
            }
        }
    }

    fn current_buffer(&self) -> &SampleBuffer {
        &self.buffer
    }
}
