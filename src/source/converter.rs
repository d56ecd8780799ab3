//! 转换阶段作为数据源
//!
//! 多级链路中，上一级阶段通过它成为下一级的输入

use crate::audio::{AudioFormat, SampleBuffer};
use crate::pipeline::ConverterStage;

use super::{Source, StreamStatus};

pub struct ConverterSource {
    stage: ConverterStage,
}

impl ConverterSource {
    pub fn new(stage: ConverterStage) -> Self {
        Self { stage }
    }
}

impl Source for ConverterSource {
    fn processing_format(&self) -> &AudioFormat {
        self.stage.output_format()
    }

    /// 块大小由阶段自身的输出缓冲区决定，`requested_frames` 不参与
    fn refill(&mut self, _requested_frames: usize) -> StreamStatus {
        match self.stage.step() {
            Ok(status) => status,
            Err(e) => {
                log::error!("Upstream converter failed, ending stream: {}", e);
                StreamStatus::EndOfStream
            }
        }
    }

    fn current_buffer(&self) -> &SampleBuffer {
        self.stage.output_buffer()
    }
}
