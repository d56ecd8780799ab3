//! 声道映射与下混
//!
//! 在重采样之前把输入声道整理成输出声道数：
//! - 显式映射：输出声道 i 取输入声道 map[i]，映射之外的输出声道静音
//! - 下混：输入声道 k 累加到输出声道 k % out，再取平均
//! - 默认：单声道复制到所有输出；否则按序号对应，多余的输入丢弃，缺少的静音

use crate::audio::{FormatError, SampleBuffer};

/// 单个输出声道的来源
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Copy(usize),
    Mix(Vec<usize>),
    Silence,
}

/// 声道路由表
#[derive(Debug, Clone)]
pub struct ChannelMixer {
    routes: Vec<Route>,
}

impl ChannelMixer {
    pub fn new(
        input_channels: u16,
        output_channels: u16,
        channel_map: Option<&[usize]>,
        downmix: bool,
    ) -> Result<Self, FormatError> {
        let inputs = input_channels as usize;
        let outputs = output_channels as usize;

        let routes = match channel_map {
            Some(map) => {
                validate_map(map, input_channels, output_channels)?;
                if downmix {
                    log::debug!("Channel map {:?} set, downmix flag ignored", map);
                }
                (0..outputs)
                    .map(|i| map.get(i).map_or(Route::Silence, |&src| Route::Copy(src)))
                    .collect()
            }
            None if downmix && inputs > outputs => (0..outputs)
                .map(|j| Route::Mix((j..inputs).step_by(outputs).collect()))
                .collect(),
            None if inputs == 1 => vec![Route::Copy(0); outputs],
            None => (0..outputs)
                .map(|i| if i < inputs { Route::Copy(i) } else { Route::Silence })
                .collect(),
        };

        Ok(Self { routes })
    }

    /// 把输入块的有效区域按路由追加到 `dest`（每输出声道一个平面）
    pub fn append(&self, input: &SampleBuffer, dest: &mut [Vec<f32>]) {
        let frames = input.frame_length();
        for (route, plane) in self.routes.iter().zip(dest.iter_mut()) {
            match route {
                Route::Copy(src) => plane.extend_from_slice(input.channel(*src)),
                Route::Silence => plane.extend(std::iter::repeat(0.0).take(frames)),
                Route::Mix(sources) => {
                    let gain = 1.0 / sources.len() as f32;
                    let start = plane.len();
                    plane.resize(start + frames, 0.0);
                    let out = &mut plane[start..];
                    for &src in sources {
                        for (o, &s) in out.iter_mut().zip(input.channel(src)) {
                            *o += s;
                        }
                    }
                    for o in out.iter_mut() {
                        *o *= gain;
                    }
                }
            }
        }
    }
}

fn validate_map(map: &[usize], input_channels: u16, output_channels: u16) -> Result<(), FormatError> {
    let valid = !map.is_empty()
        && map.len() <= output_channels as usize
        && map.iter().all(|&ch| ch < input_channels as usize);
    if valid {
        Ok(())
    } else {
        Err(FormatError::InvalidChannelMap {
            map: map.to_vec(),
            input_channels,
            output_channels,
        })
    }
}
