//! 文件数据源
//!
//! 读失败视为流结束（记录 warn），之后不再读取

use crate::audio::{AudioFormat, BufferError, SampleBuffer};
use crate::decode::FrameReader;

use super::{Source, StreamStatus};

pub struct FileSource<R: FrameReader> {
    reader: R,
    format: AudioFormat,
    buffer: SampleBuffer,
    exhausted: bool,
    frames_read: u64,
}

impl<R: FrameReader> FileSource<R> {
    pub fn new(reader: R, block_frames: usize) -> Result<Self, BufferError> {
        let format = reader.format();
        let buffer = SampleBuffer::allocate(format, block_frames)?;
        Ok(Self {
            reader,
            format,
            buffer,
            exhausted: false,
            frames_read: 0,
        })
    }
}

impl<R: FrameReader> Source for FileSource<R> {
    fn processing_format(&self) -> &AudioFormat {
        &self.format
    }

    fn refill(&mut self, requested_frames: usize) -> StreamStatus {
        if self.exhausted {
            self.buffer.clear();
            return StreamStatus::EndOfStream;
        }

        let frames = requested_frames.clamp(1, self.buffer.frame_capacity());
        match self.reader.read(&mut self.buffer, frames) {
            Ok(0) => {
                log::debug!("File source exhausted after {} frames", self.frames_read);
                self.exhausted = true;
                StreamStatus::EndOfStream
            }
            Ok(n) => {
                self.frames_read += n as u64;
                StreamStatus::HaveData
            }
            Err(e) => {
                log::warn!(
                    "Read failed after {} frames, treating as end of stream: {}",
                    self.frames_read,
                    e
                );
                self.buffer.clear();
                self.exhausted = true;
                StreamStatus::EndOfStream
            }
        }
    }

    fn current_buffer(&self) -> &SampleBuffer {
        &self.buffer
    }
}
