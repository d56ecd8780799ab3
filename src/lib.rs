//! Resample Chain Library
//!
//! Pull-driven multi-stage audio format conversion: sample rate, channel count,
//! channel routing and sample representation.

pub mod audio;
pub mod decode;
pub mod pipeline;
pub mod resample;
pub mod source;

pub use audio::{AudioFormat, ChannelLayout, SampleBuffer, SampleFormat};
pub use pipeline::{
    convert_file, ConversionOutput, ConversionPlan, Pipeline, PipelineConfig, PipelineError,
    PipelineFailure, StageSpec,
};
pub use resample::ResamplerQuality;
