//! 流水线配置

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::resample::ResamplerQuality;

/// 流水线配置
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// 每块帧数，所有缓冲区按此分配
    pub block_frames: usize,
    /// 重采样质量（离线转换默认最高档）
    pub quality: ResamplerQuality,
    /// 运行标志；被清除时驱动器在下一轮停止
    pub running: Option<Arc<AtomicBool>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_frames: 4096,
            quality: ResamplerQuality::Mastering,
            running: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_block_frames(mut self, frames: usize) -> Self {
        self.block_frames = frames.max(1);
        self
    }

    pub fn with_quality(mut self, quality: ResamplerQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }
}
