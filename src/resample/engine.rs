//! rubato 重采样引擎
//!
//! 数据路径：输入块 → 声道路由 → 输入队列 → rubato 定长分块处理 → 输出队列 → 输出缓冲区
//!
//! - 采样率相同时不创建 rubato，路由结果直接进入输出队列（恒等转换逐帧相等）
//! - rubato 的固有延迟从输出开头裁掉
//! - 上游结束后补零冲刷滤波器尾部，并把总输出截断到 round(输入帧数 × 比率)

use rubato::{
    FastFixedIn, FftFixedIn, PolynomialDegree, ResampleError, Resampler as RubatoResampler,
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::channel_map::ChannelMixer;
use super::{ConvertStatus, EngineError, InputProvider, ResamplerQuality, ResamplingEngine};
use crate::audio::{AudioFormat, FormatError, SampleBuffer};

/// rubato 内部分块的最小帧数，与流水线块大小无关
const MIN_RESAMPLER_CHUNK: usize = 1024;

/// FftFixedIn 的子块数；分块帧数不足时无法构造
const FFT_SUB_CHUNKS: usize = 2;

impl ResamplerQuality {
    fn sinc_params(self) -> SincInterpolationParameters {
        match self {
            Self::High | Self::Mastering => SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            Self::Fast | Self::Normal => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            },
        }
    }
}

/// rubato 重采样器（trait 非 object-safe，用枚举分派）
enum ResamplerKind {
    Poly(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
    Fft(FftFixedIn<f32>),
}

impl ResamplerKind {
    fn create(
        quality: ResamplerQuality,
        input: &AudioFormat,
        output: &AudioFormat,
        chunk_size: usize,
        channels: usize,
    ) -> Result<Self, FormatError> {
        let ratio = output.sample_rate() / input.sample_rate();
        let unsupported = |e: rubato::ResamplerConstructionError| FormatError::UnsupportedConversion {
            from: *input,
            to: *output,
            reason: e.to_string(),
        };

        match quality {
            ResamplerQuality::Fast => {
                FastFixedIn::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, channels)
                    .map(Self::Poly)
                    .map_err(unsupported)
            }
            ResamplerQuality::Mastering => {
                match (input.integral_sample_rate(), output.integral_sample_rate()) {
                    (Some(from), Some(to)) if chunk_size >= FFT_SUB_CHUNKS => FftFixedIn::new(
                        from as usize,
                        to as usize,
                        chunk_size,
                        FFT_SUB_CHUNKS,
                        channels,
                    )
                    .map(Self::Fft)
                    .map_err(unsupported),
                    _ => {
                        log::debug!("Mastering falls back to sinc for {} -> {}", input, output);
                        SincFixedIn::new(ratio, 1.0, quality.sinc_params(), chunk_size, channels)
                            .map(Self::Sinc)
                            .map_err(unsupported)
                    }
                }
            }
            ResamplerQuality::Normal | ResamplerQuality::High => {
                SincFixedIn::new(ratio, 1.0, quality.sinc_params(), chunk_size, channels)
                    .map(Self::Sinc)
                    .map_err(unsupported)
            }
        }
    }

    fn process(
        &mut self,
        input: &[&[f32]],
        output: &mut [Vec<f32>],
    ) -> Result<(usize, usize), ResampleError> {
        match self {
            Self::Poly(r) => r.process_into_buffer(input, output, None),
            Self::Sinc(r) => r.process_into_buffer(input, output, None),
            Self::Fft(r) => r.process_into_buffer(input, output, None),
        }
    }

    /// 不足一块的输入（`None` 表示纯补零）
    fn process_partial(
        &mut self,
        input: Option<&[&[f32]]>,
        output: &mut [Vec<f32>],
    ) -> Result<(usize, usize), ResampleError> {
        match self {
            Self::Poly(r) => r.process_partial_into_buffer(input, output, None),
            Self::Sinc(r) => r.process_partial_into_buffer(input, output, None),
            Self::Fft(r) => r.process_partial_into_buffer(input, output, None),
        }
    }

    fn input_frames_next(&self) -> usize {
        match self {
            Self::Poly(r) => r.input_frames_next(),
            Self::Sinc(r) => r.input_frames_next(),
            Self::Fft(r) => r.input_frames_next(),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Self::Poly(r) => r.output_frames_max(),
            Self::Sinc(r) => r.output_frames_max(),
            Self::Fft(r) => r.output_frames_max(),
        }
    }

    fn output_delay(&self) -> usize {
        match self {
            Self::Poly(r) => r.output_delay(),
            Self::Sinc(r) => r.output_delay(),
            Self::Fft(r) => r.output_delay(),
        }
    }
}

/// 已重采样、尚未交付的输出
struct OutputQueue {
    planes: Vec<Vec<f32>>,
    /// 还需从开头丢弃的延迟帧
    delay_remaining: usize,
    /// 裁掉延迟后累计进入队列的帧数
    produced: u64,
}

impl OutputQueue {
    fn new(channels: usize, delay: usize) -> Self {
        Self {
            planes: vec![Vec::new(); channels],
            delay_remaining: delay,
            produced: 0,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    /// 追加 rubato 输出的前 `frames` 帧
    fn push(&mut self, scratch: &[Vec<f32>], frames: usize) {
        let skip = self.delay_remaining.min(frames);
        self.delay_remaining -= skip;
        for (plane, out) in self.planes.iter_mut().zip(scratch) {
            plane.extend_from_slice(&out[skip..frames]);
        }
        self.produced += (frames - skip) as u64;
    }

    /// 截断尾部，使累计帧数不超过 `total`
    fn truncate_to(&mut self, total: u64) {
        let excess = self.produced.saturating_sub(total).min(self.len() as u64) as usize;
        if excess == 0 {
            return;
        }
        let keep = self.len() - excess;
        for plane in &mut self.planes {
            plane.truncate(keep);
        }
        self.produced -= excess as u64;
    }

    /// 取出至多 `max` 帧写入输出缓冲区（按输出样本表示量化）
    fn drain_into(&mut self, output: &mut SampleBuffer, max: usize) -> Result<usize, EngineError> {
        let frames = self.len().min(max);
        let sample_format = output.format().sample_format();
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            let dst = &mut output.channel_mut(ch)[..frames];
            for (d, &s) in dst.iter_mut().zip(&plane[..frames]) {
                *d = sample_format.quantize(s);
            }
            plane.drain(..frames);
        }
        output.set_length(frames)?;
        Ok(frames)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// 可配置，尚未转换
    Configuring,
    Converting,
    /// 已输出 EndOfStream
    Finished,
}

/// 基于 rubato 的重采样引擎
pub struct RubatoEngine {
    input_format: AudioFormat,
    output_format: AudioFormat,
    quality: ResamplerQuality,
    channel_map: Option<Vec<usize>>,
    downmix: bool,
    chunk_size: usize,
    state: EngineState,
    mixer: Option<ChannelMixer>,
    /// 采样率相同时为 None（直通）
    resampler: Option<ResamplerKind>,
    /// 路由后、待重采样的输入（每输出声道一个平面）
    pending_in: Vec<Vec<f32>>,
    /// rubato 输出暂存
    scratch: Vec<Vec<f32>>,
    queue: OutputQueue,
    /// 已接收的输入帧数
    frames_in: u64,
    input_done: bool,
    flushed: bool,
}

impl RubatoEngine {
    /// 创建引擎；不支持的转换在此失败
    pub fn new(
        input_format: AudioFormat,
        output_format: AudioFormat,
        chunk_size: usize,
    ) -> Result<Self, FormatError> {
        let chunk_size = chunk_size.max(1);
        let channels = output_format.channels() as usize;
        let quality = ResamplerQuality::default();

        let mut engine = Self {
            input_format,
            output_format,
            quality,
            channel_map: None,
            downmix: false,
            chunk_size,
            state: EngineState::Configuring,
            mixer: None,
            resampler: None,
            pending_in: vec![Vec::new(); channels],
            scratch: Vec::new(),
            queue: OutputQueue::new(channels, 0),
            frames_in: 0,
            input_done: false,
            flushed: false,
        };
        engine.rebuild_resampler()?;

        Ok(engine)
    }

    /// 按当前质量档位（重新）创建 rubato
    fn rebuild_resampler(&mut self) -> Result<(), FormatError> {
        let channels = self.output_format.channels() as usize;

        if self.input_format.sample_rate() == self.output_format.sample_rate() {
            self.resampler = None;
            self.scratch.clear();
            self.queue = OutputQueue::new(channels, 0);
            return Ok(());
        }

        let resampler = ResamplerKind::create(
            self.quality,
            &self.input_format,
            &self.output_format,
            self.chunk_size.max(MIN_RESAMPLER_CHUNK),
            channels,
        )?;
        self.scratch = vec![vec![0.0; resampler.output_frames_max()]; channels];
        self.queue = OutputQueue::new(channels, resampler.output_delay());
        self.resampler = Some(resampler);
        Ok(())
    }

    fn ensure_configurable(&self) -> Result<(), EngineError> {
        if self.state == EngineState::Configuring {
            Ok(())
        } else {
            Err(EngineError::InvalidState(
                "engine configuration is fixed after the first conversion",
            ))
        }
    }

    /// 首次转换：固定配置
    fn start(&mut self) -> Result<(), EngineError> {
        let mixer = ChannelMixer::new(
            self.input_format.channels(),
            self.output_format.channels(),
            self.channel_map.as_deref(),
            self.downmix,
        )?;
        log::debug!(
            "Engine started: {} -> {} | quality {} | map {:?} | downmix {}",
            self.input_format,
            self.output_format,
            self.quality,
            self.channel_map,
            self.downmix
        );
        self.mixer = Some(mixer);
        self.state = EngineState::Converting;
        Ok(())
    }

    /// 本轮向上游请求的帧数
    fn input_request(&self) -> usize {
        let needed = match &self.resampler {
            Some(r) => r.input_frames_next().saturating_sub(self.pending_len()),
            None => self.chunk_size,
        };
        needed.max(1)
    }

    #[inline]
    fn pending_len(&self) -> usize {
        self.pending_in.first().map_or(0, Vec::len)
    }

    /// 接收一块上游数据
    fn accept(&mut self, block: &SampleBuffer) -> Result<(), EngineError> {
        if block.format() != &self.input_format {
            return Err(EngineError::InputMismatch {
                expected: self.input_format,
                actual: *block.format(),
            });
        }
        let mixer = self
            .mixer
            .as_ref()
            .ok_or(EngineError::InvalidState("engine not started"))?;

        let frames = block.frame_length();
        self.frames_in += frames as u64;

        if self.resampler.is_none() {
            mixer.append(block, &mut self.queue.planes);
            self.queue.produced += frames as u64;
            return Ok(());
        }

        mixer.append(block, &mut self.pending_in);
        self.process_ready_chunks()
    }

    /// 处理所有凑满的整块
    fn process_ready_chunks(&mut self) -> Result<(), EngineError> {
        let Self {
            resampler,
            pending_in,
            scratch,
            queue,
            ..
        } = self;
        let Some(resampler) = resampler.as_mut() else {
            return Ok(());
        };

        loop {
            let needed = resampler.input_frames_next();
            if pending_in.first().map_or(0, Vec::len) < needed {
                return Ok(());
            }
            let (used, produced) = {
                let input: Vec<&[f32]> = pending_in.iter().map(|p| &p[..needed]).collect();
                resampler
                    .process(&input, scratch)
                    .map_err(|e| EngineError::Resample(e.to_string()))?
            };
            for plane in pending_in.iter_mut() {
                plane.drain(..used);
            }
            queue.push(scratch, produced);
        }
    }

    /// 上游结束：处理剩余输入并冲刷滤波器尾部
    fn flush(&mut self) -> Result<(), EngineError> {
        let ratio = self.ratio();
        let expected = (self.frames_in as f64 * ratio).round() as u64;
        let Self {
            resampler,
            pending_in,
            scratch,
            queue,
            ..
        } = self;
        let Some(resampler) = resampler.as_mut() else {
            return Ok(());
        };
        if expected == 0 {
            return Ok(());
        }

        let remaining = pending_in.first().map_or(0, Vec::len);
        if remaining > 0 {
            let (_, produced) = {
                let input: Vec<&[f32]> = pending_in.iter().map(Vec::as_slice).collect();
                resampler
                    .process_partial(Some(input.as_slice()), scratch)
                    .map_err(|e| EngineError::Resample(e.to_string()))?
            };
            for plane in pending_in.iter_mut() {
                plane.clear();
            }
            queue.push(scratch, produced);
        }

        // 每轮补零至少产出 per_round 帧，轮数上限由剩余延迟和缺口推出
        let per_round = ((resampler.input_frames_next() as f64 * ratio).floor() as usize)
            .saturating_sub(1)
            .max(1);
        let outstanding = queue.delay_remaining + expected.saturating_sub(queue.produced) as usize;
        let max_rounds = outstanding / per_round + 4;
        let mut rounds = 0;
        while queue.produced < expected && rounds < max_rounds {
            let (_, produced) = resampler
                .process_partial(None, scratch)
                .map_err(|e| EngineError::Resample(e.to_string()))?;
            queue.push(scratch, produced);
            rounds += 1;
        }
        if queue.produced < expected {
            log::warn!(
                "Resampler tail short after {} rounds: {} of {} frames",
                rounds,
                queue.produced,
                expected
            );
        }

        queue.truncate_to(expected);
        log::debug!(
            "Resampler flushed: {} input frames -> {} output frames",
            self.frames_in,
            self.queue.produced
        );
        Ok(())
    }
}

impl ResamplingEngine for RubatoEngine {
    fn input_format(&self) -> &AudioFormat {
        &self.input_format
    }

    fn output_format(&self) -> &AudioFormat {
        &self.output_format
    }

    fn set_channel_map(&mut self, map: Vec<usize>) -> Result<(), EngineError> {
        self.ensure_configurable()?;
        // 提前校验，错误的映射不落地
        ChannelMixer::new(
            self.input_format.channels(),
            self.output_format.channels(),
            Some(&map),
            self.downmix,
        )?;
        self.channel_map = Some(map);
        Ok(())
    }

    fn set_downmix(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.ensure_configurable()?;
        self.downmix = enabled;
        Ok(())
    }

    fn set_quality(&mut self, quality: ResamplerQuality) -> Result<(), EngineError> {
        self.ensure_configurable()?;
        if quality != self.quality {
            self.quality = quality;
            self.rebuild_resampler()?;
        }
        Ok(())
    }

    fn convert(
        &mut self,
        output: &mut SampleBuffer,
        input: &mut dyn InputProvider,
    ) -> Result<ConvertStatus, EngineError> {
        if output.format() != &self.output_format {
            return Err(EngineError::OutputMismatch {
                expected: self.output_format,
                actual: *output.format(),
            });
        }
        match self.state {
            EngineState::Configuring => self.start()?,
            EngineState::Converting => {}
            EngineState::Finished => {
                output.clear();
                return Ok(ConvertStatus::EndOfStream);
            }
        }

        let capacity = output.frame_capacity();
        loop {
            if self.queue.len() >= capacity {
                self.queue.drain_into(output, capacity)?;
                return Ok(ConvertStatus::HaveData);
            }

            if self.input_done {
                if !self.flushed {
                    self.flush()?;
                    self.flushed = true;
                    continue;
                }
                if self.queue.len() > 0 {
                    self.queue.drain_into(output, capacity)?;
                    return Ok(ConvertStatus::HaveData);
                }
                output.clear();
                self.state = EngineState::Finished;
                return Ok(ConvertStatus::EndOfStream);
            }

            let request = self.input_request();
            match input.pull(request) {
                Some(block) => self.accept(block)?,
                None => self.input_done = true,
            }
        }
    }

    fn ratio(&self) -> f64 {
        self.output_format.sample_rate() / self.input_format.sample_rate()
    }
}
