//! 解码模块
//!
//! 文件源的底层游标：按帧数读取，读完返回 0

pub mod decoder;

pub use decoder::{AudioFileReader, AudioInfo, DecodeError, FrameReader, MemoryReader};
