//! 转换阶段
//!
//! 一个阶段 = 上游数据源 + 重采样引擎 + 自有输出缓冲区
//! 每次 `step` 驱动引擎转换一块；引擎需要输入时经回调拉取上游

use crate::audio::{AudioFormat, SampleBuffer};
use crate::resample::{ConvertStatus, InputProvider, ResamplerQuality, ResamplingEngine, RubatoEngine};
use crate::source::{Source, StreamStatus};

use super::{PipelineConfig, PipelineError};

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// 尚未转换，可配置
    Idle,
    Running,
    /// 最近一块不满，流即将结束
    Draining,
    Done,
    Failed,
}

/// 把上游数据源适配为引擎的输入回调
struct SourceInput<'a> {
    source: &'a mut dyn Source,
}

impl InputProvider for SourceInput<'_> {
    fn pull(&mut self, requested_frames: usize) -> Option<&SampleBuffer> {
        match self.source.refill(requested_frames) {
            StreamStatus::HaveData => Some(self.source.current_buffer()),
            StreamStatus::EndOfStream => None,
        }
    }
}

/// 转换阶段
pub struct ConverterStage {
    source: Box<dyn Source>,
    engine: Box<dyn ResamplingEngine>,
    output: SampleBuffer,
    state: StageState,
    frames_produced: u64,
}

impl ConverterStage {
    /// 以 rubato 引擎创建阶段；不支持的转换在此失败
    pub fn new(
        source: Box<dyn Source>,
        output_format: AudioFormat,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let input_format = *source.processing_format();
        let mut engine = RubatoEngine::new(input_format, output_format, config.block_frames)?;
        engine.set_quality(config.quality)?;

        log::info!("New converter: {} -> {}", input_format, output_format);

        Self::with_engine(source, Box::new(engine), config.block_frames)
    }

    /// 使用指定引擎创建阶段
    pub fn with_engine(
        source: Box<dyn Source>,
        engine: Box<dyn ResamplingEngine>,
        block_frames: usize,
    ) -> Result<Self, PipelineError> {
        if source.processing_format() != engine.input_format() {
            return Err(PipelineError::InvalidState(
                "engine input format differs from the source format",
            ));
        }
        let output = SampleBuffer::allocate(*engine.output_format(), block_frames)?;
        Ok(Self {
            source,
            engine,
            output,
            state: StageState::Idle,
            frames_produced: 0,
        })
    }

    pub fn input_format(&self) -> &AudioFormat {
        self.source.processing_format()
    }

    pub fn output_format(&self) -> &AudioFormat {
        self.output.format()
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    /// 最近一次 `step` 的输出
    pub fn output_buffer(&self) -> &SampleBuffer {
        &self.output
    }

    pub fn set_channel_map(&mut self, map: Vec<usize>) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.engine.set_channel_map(map)?;
        Ok(())
    }

    pub fn set_downmix(&mut self, enabled: bool) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.engine.set_downmix(enabled)?;
        Ok(())
    }

    pub fn set_quality(&mut self, quality: ResamplerQuality) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.engine.set_quality(quality)?;
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.state == StageState::Idle {
            Ok(())
        } else {
            Err(PipelineError::InvalidState(
                "converter configuration must happen before the first step",
            ))
        }
    }

    /// 转换一块
    ///
    /// 输出非空时返回 `HaveData`（包括结尾不满的块）；
    /// 一旦返回 `EndOfStream`，之后的调用不再触碰引擎
    pub fn step(&mut self) -> Result<StreamStatus, PipelineError> {
        match self.state {
            StageState::Done => {
                self.output.clear();
                return Ok(StreamStatus::EndOfStream);
            }
            StageState::Failed => {
                return Err(PipelineError::InvalidState("converter stage already failed"));
            }
            _ => {}
        }

        let mut input = SourceInput {
            source: &mut *self.source,
        };
        match self.engine.convert(&mut self.output, &mut input) {
            Ok(ConvertStatus::HaveData) if !self.output.is_empty() => {
                let frames = self.output.frame_length();
                self.frames_produced += frames as u64;
                self.state = if frames < self.output.frame_capacity() {
                    StageState::Draining
                } else {
                    StageState::Running
                };
                Ok(StreamStatus::HaveData)
            }
            Ok(_) => {
                self.output.clear();
                self.state = StageState::Done;
                log::debug!(
                    "Converter {} -> {} done: {} frames",
                    self.source.processing_format(),
                    self.output.format(),
                    self.frames_produced
                );
                Ok(StreamStatus::EndOfStream)
            }
            Err(e) => {
                self.state = StageState::Failed;
                log::error!("Converter step failed: {}", e);
                Err(e.into())
            }
        }
    }
}
