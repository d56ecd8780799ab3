//! 流水线驱动器
//!
//! 从末级阶段逐块拉取：
//! - 每块先写所有消费者，全部成功后再追加到内存累加器
//! - 任一消费者失败立即中止，已累加的块作为部分结果返回
//! - 不重试

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::audio::{AudioFormat, FrameSink, SampleAccumulator, SinkError};
use crate::source::StreamStatus;

use super::{ConverterStage, PipelineError};

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// 已收到不满的块
    Draining,
    Done,
    Failed,
}

/// 转换结果
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub format: AudioFormat,
    /// 按帧交织的样本
    pub samples: Vec<f32>,
    pub frames: u64,
    pub blocks: u64,
}

impl ConversionOutput {
    pub fn duration_secs(&self) -> f64 {
        self.format.frames_to_secs(self.frames)
    }
}

/// 失败及失败前已得到的部分结果
///
/// 数据开始流动前的失败（打开输入、创建消费者等）没有部分结果
#[derive(Debug, Error)]
#[error("{error}{}", partial_note(.partial))]
pub struct PipelineFailure {
    #[source]
    pub error: PipelineError,
    pub partial: Option<ConversionOutput>,
}

impl From<PipelineError> for PipelineFailure {
    fn from(error: PipelineError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

fn partial_note(partial: &Option<ConversionOutput>) -> String {
    match partial {
        Some(output) => format!(" ({} frames converted before the failure)", output.frames),
        None => String::new(),
    }
}

/// 单次转换作业
pub struct Pipeline {
    terminal: ConverterStage,
    sinks: Vec<Box<dyn FrameSink>>,
    accumulator: SampleAccumulator,
    state: PipelineState,
    running: Option<Arc<AtomicBool>>,
}

impl Pipeline {
    pub fn new(terminal: ConverterStage) -> Self {
        Self {
            terminal,
            sinks: Vec::new(),
            accumulator: SampleAccumulator::new(),
            state: PipelineState::Idle,
            running: None,
        }
    }

    /// 注册消费者（按注册顺序写入）
    pub fn add_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.sinks.push(sink);
    }

    /// 运行标志被清除时，驱动器在下一轮停止
    pub fn set_running_flag(&mut self, running: Arc<AtomicBool>) {
        self.running = Some(running);
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn output_format(&self) -> &AudioFormat {
        self.terminal.output_format()
    }

    /// 驱动直到流结束
    pub fn run(&mut self) -> Result<ConversionOutput, PipelineFailure> {
        if self.state != PipelineState::Idle {
            return Err(PipelineFailure {
                error: PipelineError::InvalidState("pipeline has already run"),
                partial: Some(self.empty_output()),
            });
        }
        self.state = PipelineState::Running;
        log::info!(
            "Pipeline started: {} -> {}",
            self.terminal.input_format(),
            self.terminal.output_format()
        );

        loop {
            if self.cancelled() {
                log::warn!("Pipeline cancelled after {} frames", self.accumulator.frames());
                return Err(self.fail(PipelineError::Cancelled));
            }

            match self.terminal.step() {
                Ok(StreamStatus::HaveData) => {
                    let block = self.terminal.output_buffer();
                    if block.frame_length() < block.frame_capacity() {
                        self.state = PipelineState::Draining;
                    }
                    let written: Result<(), SinkError> =
                        self.sinks.iter_mut().try_for_each(|sink| sink.write(block));
                    if written.is_ok() {
                        self.accumulator.append(block);
                    }
                    if let Err(e) = written {
                        log::error!(
                            "Consumer rejected block {}: {}",
                            self.accumulator.blocks() + 1,
                            e
                        );
                        return Err(self.fail(e.into()));
                    }
                }
                Ok(StreamStatus::EndOfStream) => break,
                Err(e) => return Err(self.fail(e)),
            }
        }

        if let Err(e) = self.sinks.iter_mut().try_for_each(|sink| sink.finish()) {
            log::error!("Consumer failed to finish: {}", e);
            return Err(self.fail(e.into()));
        }

        self.state = PipelineState::Done;
        let output = self.take_output();
        log::info!(
            "Pipeline done: {} frames in {} blocks ({:.2}s)",
            output.frames,
            output.blocks,
            output.duration_secs()
        );
        Ok(output)
    }

    fn cancelled(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::SeqCst))
    }

    fn fail(&mut self, error: PipelineError) -> PipelineFailure {
        self.state = PipelineState::Failed;
        PipelineFailure {
            error,
            partial: Some(self.take_output()),
        }
    }

    fn take_output(&mut self) -> ConversionOutput {
        let accumulator = std::mem::take(&mut self.accumulator);
        ConversionOutput {
            format: *self.terminal.output_format(),
            frames: accumulator.frames(),
            blocks: accumulator.blocks(),
            samples: accumulator.into_samples(),
        }
    }

    fn empty_output(&self) -> ConversionOutput {
        ConversionOutput {
            format: *self.terminal.output_format(),
            samples: Vec::new(),
            frames: 0,
            blocks: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleBuffer;
    use crate::decode::MemoryReader;
    use crate::pipeline::PipelineConfig;
    use crate::source::{FileSource, Source};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn stage(frames: usize, block: usize) -> ConverterStage {
        let format = AudioFormat::float_planar(8000.0, 1).unwrap();
        let samples: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
        let reader = MemoryReader::new(format, vec![samples]).unwrap();
        let source: Box<dyn Source> = Box::new(FileSource::new(reader, block).unwrap());
        let config = PipelineConfig::default().with_block_frames(block);
        ConverterStage::new(source, format, &config).unwrap()
    }

    /// 记录写入的帧数；第 `fail_on` 块拒绝
    struct CountingSink {
        frames: Rc<RefCell<u64>>,
        writes: usize,
        fail_on: Option<usize>,
        finished: Rc<RefCell<bool>>,
    }

    impl FrameSink for CountingSink {
        fn write(&mut self, block: &SampleBuffer) -> Result<(), SinkError> {
            self.writes += 1;
            if Some(self.writes) == self.fail_on {
                return Err(SinkError::Rejected("disk full".to_string()));
            }
            *self.frames.borrow_mut() += block.frame_length() as u64;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            *self.finished.borrow_mut() = true;
            Ok(())
        }
    }

    fn counting(fail_on: Option<usize>) -> (CountingSink, Rc<RefCell<u64>>, Rc<RefCell<bool>>) {
        let frames = Rc::new(RefCell::new(0));
        let finished = Rc::new(RefCell::new(false));
        let sink = CountingSink {
            frames: Rc::clone(&frames),
            writes: 0,
            fail_on,
            finished: Rc::clone(&finished),
        };
        (sink, frames, finished)
    }

    #[test]
    fn test_sink_sees_every_frame() {
        let (sink, frames, finished) = counting(None);
        let mut pipeline = Pipeline::new(stage(1000, 128));
        pipeline.add_sink(Box::new(sink));

        let output = pipeline.run().unwrap();
        assert_eq!(output.frames, 1000);
        assert_eq!(output.blocks, 8);
        assert_eq!(*frames.borrow(), 1000);
        assert!(*finished.borrow());
        assert_eq!(output.samples.len(), 1000);
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[test]
    fn test_sink_failure_keeps_earlier_blocks() {
        let (sink, frames, finished) = counting(Some(3));
        let mut pipeline = Pipeline::new(stage(1000, 100));
        pipeline.add_sink(Box::new(sink));

        let failure = pipeline.run().unwrap_err();
        assert!(matches!(failure.error, PipelineError::Consumer(SinkError::Rejected(_))));
        let partial = failure.partial.unwrap();
        assert_eq!(partial.blocks, 2);
        assert_eq!(partial.frames, 200);
        assert_eq!(*frames.borrow(), 200);
        assert!(!*finished.borrow());
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_empty_stream() {
        let mut pipeline = Pipeline::new(stage(0, 64));
        let output = pipeline.run().unwrap();
        assert_eq!(output.frames, 0);
        assert_eq!(output.blocks, 0);
        assert!(output.samples.is_empty());
    }

    #[test]
    fn test_run_twice_is_invalid() {
        let mut pipeline = Pipeline::new(stage(10, 4));
        pipeline.run().unwrap();
        let failure = pipeline.run().unwrap_err();
        assert!(matches!(failure.error, PipelineError::InvalidState(_)));
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[test]
    fn test_cleared_running_flag_cancels() {
        let running = Arc::new(AtomicBool::new(false));
        let mut pipeline = Pipeline::new(stage(100, 10));
        pipeline.set_running_flag(Arc::clone(&running));

        let failure = pipeline.run().unwrap_err();
        assert!(matches!(failure.error, PipelineError::Cancelled));
        assert_eq!(failure.partial.unwrap().frames, 0);
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_failure_message_mentions_partial() {
        let (sink, _, _) = counting(Some(2));
        let mut pipeline = Pipeline::new(stage(100, 10));
        pipeline.add_sink(Box::new(sink));
        let failure = pipeline.run().unwrap_err();
        assert!(failure.to_string().contains("10 frames converted"), "{}", failure);

        let setup: PipelineFailure = PipelineError::InvalidState("no input").into();
        assert!(setup.partial.is_none());
        assert_eq!(setup.to_string(), "Invalid state: no input");
    }

    #[test]
    fn test_partial_last_block_drains() {
        let mut pipeline = Pipeline::new(stage(10, 4));
        let output = pipeline.run().unwrap();
        assert_eq!(output.frames, 10);
        assert_eq!(output.blocks, 3);
    }
}
