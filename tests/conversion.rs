//! 端到端转换测试：hound 生成 WAV，经流水线转换后再读回

use std::path::Path;

use hound::{SampleFormat as WavSampleFormat, WavReader, WavSpec, WavWriter};

use resample_chain::audio::{
    AudioFormat, ChannelLayout, FrameSink, SampleBuffer, SampleFormat, SinkError,
};
use resample_chain::decode::{AudioFileReader, FrameReader, MemoryReader};
use resample_chain::pipeline::{
    convert_file, ConversionPlan, Pipeline, PipelineConfig, PipelineError, PipelineState,
    StageSpec,
};
use resample_chain::resample::ResamplerQuality;
use resample_chain::source::StreamStatus;

/// 写交织 f32 WAV；`gen(frame, channel)` 给出样本
fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize, gen: impl Fn(usize, u16) -> f32) {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 32,
        sample_format: WavSampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for frame in 0..frames {
        for ch in 0..channels {
            writer.write_sample(gen(frame, ch)).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn read_wav(path: &Path) -> (WavSpec, Vec<f32>) {
    let mut reader = WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    (spec, samples)
}

fn tone(frame: usize, rate: f64, freq: f64) -> f32 {
    (2.0 * std::f64::consts::PI * freq * frame as f64 / rate).sin() as f32 * 0.5
}

#[test]
fn test_downsample_stereo_to_mono_16k() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    let frames = 48000 * 2;
    write_wav(&input, 48000, 2, frames, |i, _| tone(i, 48000.0, 440.0));

    let mono = AudioFormat::new(16000.0, 1, SampleFormat::F32, ChannelLayout::Interleaved).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(mono).with_downmix(true));
    let config = PipelineConfig::default();

    let result = convert_file(&input, &output, &plan, &config).unwrap();
    let expected = frames as i64 / 3;
    assert!((result.frames as i64 - expected).abs() <= config.block_frames as i64);
    assert_eq!(result.frames, expected as u64);

    let (spec, samples) = read_wav(&output);
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 1);
    assert_eq!(samples.len() as u64, result.frames);
    // 440 Hz 远低于新的奈奎斯特频率，幅度应基本保持
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.4 && peak < 0.6, "peak {}", peak);
}

#[test]
fn test_empty_wav_produces_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.wav");
    let output = dir.path().join("out.wav");
    write_wav(&input, 48000, 2, 0, |_, _| 0.0);

    let mono = AudioFormat::new(16000.0, 1, SampleFormat::F32, ChannelLayout::Interleaved).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(mono).with_downmix(true));

    let result = convert_file(&input, &output, &plan, &PipelineConfig::default()).unwrap();
    assert_eq!(result.frames, 0);
    assert_eq!(result.blocks, 0);

    let (_, samples) = read_wav(&output);
    assert!(samples.is_empty());
}

#[test]
fn test_empty_input_first_step_is_end_of_stream() {
    let format = AudioFormat::float_planar(48000.0, 2).unwrap();
    let reader = MemoryReader::new(format, vec![Vec::new(), Vec::new()]).unwrap();
    let mono = AudioFormat::float_planar(16000.0, 1).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(mono).with_downmix(true));

    let mut stage = plan.build(reader, &PipelineConfig::default()).unwrap();
    assert_eq!(stage.step().unwrap(), StreamStatus::EndOfStream);
    assert_eq!(stage.frames_produced(), 0);
}

/// 第三块写入失败的消费者
struct FailOnThird {
    writes: usize,
}

impl FrameSink for FailOnThird {
    fn write(&mut self, _block: &SampleBuffer) -> Result<(), SinkError> {
        self.writes += 1;
        if self.writes == 3 {
            Err(SinkError::Rejected("no space left".to_string()))
        } else {
            Ok(())
        }
    }
}

#[test]
fn test_consumer_failure_on_third_block() {
    let format = AudioFormat::float_planar(44100.0, 2).unwrap();
    let planes = vec![vec![0.1; 10_000], vec![0.2; 10_000]];
    let reader = MemoryReader::new(format, planes).unwrap();
    let config = PipelineConfig::default().with_block_frames(1000);

    let mut pipeline = Pipeline::new(ConversionPlan::new().build(reader, &config).unwrap());
    pipeline.add_sink(Box::new(FailOnThird { writes: 0 }));

    let failure = pipeline.run().unwrap_err();
    assert!(matches!(failure.error, PipelineError::Consumer(_)));
    let partial = failure.partial.unwrap();
    assert_eq!(partial.blocks, 2);
    assert_eq!(partial.frames, 2000);
    assert_eq!(partial.samples.len(), 4000);
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[test]
fn test_five_channel_map_keeps_front_pair() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("surround.wav");
    let output = dir.path().join("front.wav");
    let frames = 3000;
    let gen = |i: usize, ch: u16| {
        let sign = if ch % 2 == 0 { 1.0 } else { -1.0 };
        sign * (i % 100) as f32 / 100.0 + ch as f32 * 0.01
    };
    write_wav(&input, 48000, 5, frames, gen);

    let stereo = AudioFormat::new(48000.0, 2, SampleFormat::F32, ChannelLayout::Interleaved).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(stereo).with_channel_map(vec![0, 1]));
    let config = PipelineConfig::default().with_block_frames(512);

    let result = convert_file(&input, &output, &plan, &config).unwrap();
    assert_eq!(result.frames, frames as u64);

    let (spec, samples) = read_wav(&output);
    assert_eq!(spec.channels, 2);
    for (i, frame) in samples.chunks(2).enumerate() {
        assert_eq!(frame[0], gen(i, 0));
        assert_eq!(frame[1], gen(i, 1));
    }
}

#[test]
fn test_identity_conversion_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    write_wav(&input, 44100, 2, 5000, |i, ch| tone(i, 44100.0, 100.0 * (ch + 1) as f64));

    let result = convert_file(&input, &output, &ConversionPlan::new(), &PipelineConfig::default()).unwrap();
    assert_eq!(result.frames, 5000);

    let (_, original) = read_wav(&input);
    let (_, converted) = read_wav(&output);
    assert_eq!(original, converted);
}

#[test]
fn test_frames_written_equal_sum_of_steps() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    write_wav(&input, 22050, 1, 12345, |i, _| tone(i, 22050.0, 1000.0));

    let reader = AudioFileReader::open(&input).unwrap();
    assert_eq!(reader.format(), AudioFormat::float_planar(22050.0, 1).unwrap());
    let out = AudioFormat::float_planar(44100.0, 1).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(out));
    let mut stage = plan
        .build(reader, &PipelineConfig::default().with_block_frames(1000))
        .unwrap();

    let mut total = 0u64;
    while stage.step().unwrap() == StreamStatus::HaveData {
        total += stage.output_buffer().frame_length() as u64;
    }
    assert_eq!(total, stage.frames_produced());
    assert_eq!(total, 24690);
    // 结束之后不再产出
    assert_eq!(stage.step().unwrap(), StreamStatus::EndOfStream);
    assert_eq!(stage.frames_produced(), 24690);
}

#[test]
fn test_speech_preset_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("speech.wav");
    write_wav(&input, 44100, 2, 44100, |i, _| tone(i, 44100.0, 300.0));

    let plan = ConversionPlan::speech_16k_mono().unwrap();
    let result = convert_file(&input, &output, &plan, &PipelineConfig::default()).unwrap();

    let (spec, samples) = read_wav(&output);
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 1);
    assert_eq!(samples.len() as u64, result.frames);
    assert!((result.frames as i64 - 16000).abs() <= 2);
}

#[test]
fn test_integer_output_format() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out16.wav");
    write_wav(&input, 8000, 1, 100, |_, _| 0.5);

    let out = AudioFormat::new(8000.0, 1, SampleFormat::I16, ChannelLayout::Interleaved).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(out));
    convert_file(&input, &output, &plan, &PipelineConfig::default()).unwrap();

    let mut reader = WavReader::open(&output).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.spec().sample_format, WavSampleFormat::Int);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, vec![16384; 100]);
}

#[test]
fn test_truncated_input_converts_decoded_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cut.wav");
    let output = dir.path().join("out.wav");
    write_wav(&input, 16000, 1, 16000, |i, _| tone(i, 16000.0, 200.0));

    // 去掉最后 4000 帧的数据
    let len = std::fs::metadata(&input).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&input).unwrap();
    file.set_len(len - 4000 * 4).unwrap();
    drop(file);

    let plan = ConversionPlan::new().then(StageSpec::new(AudioFormat::float_planar(16000.0, 1).unwrap()));
    let result = convert_file(&input, &output, &plan, &PipelineConfig::default()).unwrap();
    assert!(result.frames > 8000 && result.frames <= 12000, "got {}", result.frames);

    let (_, samples) = read_wav(&output);
    assert_eq!(samples.len() as u64, result.frames);
    assert!((samples[100] - tone(100, 16000.0, 200.0)).abs() < 1e-6);
}

#[test]
fn test_mastering_with_single_frame_blocks() {
    let format = AudioFormat::float_planar(48000.0, 1).unwrap();
    let samples: Vec<f32> = (0..3000).map(|i| tone(i, 48000.0, 440.0)).collect();
    let reader = MemoryReader::new(format, vec![samples]).unwrap();
    let out = AudioFormat::float_planar(16000.0, 1).unwrap();
    let plan = ConversionPlan::new().then(StageSpec::new(out));
    let config = PipelineConfig::default()
        .with_block_frames(1)
        .with_quality(ResamplerQuality::Mastering);

    let output = Pipeline::new(plan.build(reader, &config).unwrap()).run().unwrap();
    assert_eq!(output.frames, 1000);
    assert_eq!(output.samples.len(), 1000);
}
