//! 转换计划
//!
//! 有序的阶段描述，按顺序串成一条链：
//! `FileSource → Stage₁ → ConverterSource → [CopySource] → Stage₂ → ...`
//! 空计划得到一个输入格式上的恒等阶段

use std::path::Path;

use crate::audio::{AudioFormat, ChannelLayout, FormatError, FrameSink, SampleFormat, WavFileSink};
use crate::decode::{AudioFileReader, FrameReader};
use crate::source::{ConverterSource, CopySource, FileSource, Source};

use super::{
    ConversionOutput, ConverterStage, Pipeline, PipelineConfig, PipelineError, PipelineFailure,
};

/// 单个阶段的描述
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub format: AudioFormat,
    pub channel_map: Option<Vec<usize>>,
    pub downmix: bool,
    /// 在阶段前插入复制源
    pub copy_input: bool,
}

impl StageSpec {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            channel_map: None,
            downmix: false,
            copy_input: false,
        }
    }

    pub fn with_channel_map(mut self, map: Vec<usize>) -> Self {
        self.channel_map = Some(map);
        self
    }

    pub fn with_downmix(mut self, enabled: bool) -> Self {
        self.downmix = enabled;
        self
    }

    pub fn with_copy_input(mut self, enabled: bool) -> Self {
        self.copy_input = enabled;
        self
    }
}

/// 转换计划
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionPlan {
    stages: Vec<StageSpec>,
}

impl ConversionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一级
    pub fn then(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 语音识别预设：先整理成 48 kHz 立体声（取前两个声道），再下混到 16 kHz 单声道
    pub fn speech_16k_mono() -> Result<Self, FormatError> {
        let stereo = AudioFormat::new(48000.0, 2, SampleFormat::F32, ChannelLayout::Interleaved)?;
        let mono = AudioFormat::new(16000.0, 1, SampleFormat::F32, ChannelLayout::Interleaved)?;
        Ok(Self::new()
            .then(StageSpec::new(stereo).with_channel_map(vec![0, 1]))
            .then(StageSpec::new(mono).with_downmix(true)))
    }

    /// 构建阶段链，返回末级阶段
    pub fn build<R>(&self, reader: R, config: &PipelineConfig) -> Result<ConverterStage, PipelineError>
    where
        R: FrameReader + 'static,
    {
        let file = FileSource::new(reader, config.block_frames)?;
        let input_format = *file.processing_format();

        let identity;
        let specs: &[StageSpec] = if self.stages.is_empty() {
            identity = [StageSpec::new(input_format)];
            &identity
        } else {
            &self.stages
        };

        let (first, rest) = specs
            .split_first()
            .ok_or(PipelineError::InvalidState("conversion plan produced no stage"))?;
        let mut terminal = build_stage(Box::new(file), first, config)?;
        for spec in rest {
            terminal = build_stage(Box::new(ConverterSource::new(terminal)), spec, config)?;
        }
        Ok(terminal)
    }
}

/// 按描述创建并配置一级
fn build_stage(
    mut source: Box<dyn Source>,
    spec: &StageSpec,
    config: &PipelineConfig,
) -> Result<ConverterStage, PipelineError> {
    if spec.copy_input {
        source = Box::new(CopySource::new(source, config.block_frames)?);
    }
    let mut stage = ConverterStage::new(source, spec.format, config)?;
    if let Some(map) = &spec.channel_map {
        stage.set_channel_map(map.clone())?;
    }
    stage.set_downmix(spec.downmix)?;
    log::debug!(
        "Stage configured: map {:?}, downmix {}, copy {}",
        spec.channel_map,
        spec.downmix,
        spec.copy_input
    );
    Ok(stage)
}

/// 转换文件到 WAV
///
/// 失败时 `PipelineFailure::partial` 带有失败前已转换的数据
pub fn convert_file<P, Q>(
    input: P,
    output: Q,
    plan: &ConversionPlan,
    config: &PipelineConfig,
) -> Result<ConversionOutput, PipelineFailure>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let reader = AudioFileReader::open(input).map_err(PipelineError::from)?;
    convert_reader(reader, output, plan, config)
}

/// 从已打开的读取器转换到 WAV
pub fn convert_reader<R, Q>(
    reader: R,
    output: Q,
    plan: &ConversionPlan,
    config: &PipelineConfig,
) -> Result<ConversionOutput, PipelineFailure>
where
    R: FrameReader + 'static,
    Q: AsRef<Path>,
{
    let terminal = plan.build(reader, config)?;
    let sink = WavFileSink::create(output, *terminal.output_format())
        .map_err(PipelineError::from_sink_setup)?;
    run_pipeline(terminal, vec![Box::new(sink)], config)
}

/// 从已打开的读取器转换，输出交给调用方提供的消费者
pub fn convert_reader_into<R>(
    reader: R,
    sinks: Vec<Box<dyn FrameSink>>,
    plan: &ConversionPlan,
    config: &PipelineConfig,
) -> Result<ConversionOutput, PipelineFailure>
where
    R: FrameReader + 'static,
{
    let terminal = plan.build(reader, config)?;
    run_pipeline(terminal, sinks, config)
}

fn run_pipeline(
    terminal: ConverterStage,
    sinks: Vec<Box<dyn FrameSink>>,
    config: &PipelineConfig,
) -> Result<ConversionOutput, PipelineFailure> {
    let mut pipeline = Pipeline::new(terminal);
    for sink in sinks {
        pipeline.add_sink(sink);
    }
    if let Some(running) = &config.running {
        pipeline.set_running_flag(running.clone());
    }

    pipeline.run().inspect_err(|failure| {
        if let Some(partial) = &failure.partial {
            log::warn!(
                "Conversion stopped after {} frames in {} blocks",
                partial.frames,
                partial.blocks
            );
        }
    })
}
