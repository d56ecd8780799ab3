//! 转换流水线
//!
//! 结构：
//! - `FileSource → ConverterStage → ConverterSource → ... → ConverterStage`
//! - 驱动器从末级阶段逐块拉取，交给消费者
//!
//! 全程单线程、同步拉取，不存在隐藏队列

pub mod config;
pub mod driver;
pub mod plan;
pub mod stage;

pub use config::PipelineConfig;
pub use driver::{ConversionOutput, Pipeline, PipelineFailure, PipelineState};
pub use plan::{convert_file, convert_reader, convert_reader_into, ConversionPlan, StageSpec};
pub use stage::{ConverterStage, StageState};

use std::io;

use thiserror::Error;

use crate::audio::{BufferError, FormatError, SinkError};
use crate::decode::DecodeError;
use crate::resample::EngineError;

/// 流水线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Decode error: {0}")]
    Decode(DecodeError),
    #[error("Consumer error: {0}")]
    Consumer(#[from] SinkError),
    #[error("Engine error: {0}")]
    Engine(EngineError),
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("Conversion cancelled")]
    Cancelled,
}

impl From<EngineError> for PipelineError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidState(s) => Self::InvalidState(s),
            EngineError::Format(e) => Self::Format(e),
            EngineError::Buffer(e) => Self::Buffer(e),
            other => Self::Engine(other),
        }
    }
}

impl From<DecodeError> for PipelineError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::FileOpen(e) => Self::Io(e),
            DecodeError::Format(e) => Self::Format(e),
            DecodeError::Buffer(e) => Self::Buffer(e),
            other => Self::Decode(other),
        }
    }
}

impl PipelineError {
    /// 消费者创建失败按 I/O / 格式错误归类
    pub(crate) fn from_sink_setup(e: SinkError) -> Self {
        match e {
            SinkError::Wav(hound::Error::IoError(e)) => Self::Io(e),
            SinkError::Format(e) => Self::Format(e),
            other => Self::Consumer(other),
        }
    }
}
