use crate::core::{PlayerError, Result, SampleFormat};
use crate::player::sink::AudioSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 设备不支持源格式时依次尝试的配置
const FALLBACK_CONFIGS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];

/// cpal 音频输出端
///
/// 设备流在第一次 `enqueue` 时按源格式打开（设备不支持时回退到标准配置），
/// 源格式变化时重新打开。样本经无锁队列交给 cpal 回调线程。
pub struct CpalAudioSink {
    device: Device,
    stream: Option<Stream>,
    config: Option<StreamConfig>,
    source: Option<(u32, u16)>,
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
    rate_mismatch_logged: bool,
}

// cpal::Stream 在部分平台上不是 Send；流只在执行 enqueue 的线程上创建和销毁
unsafe impl Send for CpalAudioSink {}

impl CpalAudioSink {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        info!("🔊 使用音频设备: {}", device.name().unwrap_or_default());

        Ok(Self {
            device,
            stream: None,
            config: None,
            source: None,
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
            rate_mismatch_logged: false,
        })
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    /// 缓冲区中尚未播放的采样数
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0
            && config.channels == supported.channels()
    }

    fn supports(&self, config: &StreamConfig) -> Result<bool> {
        let mut supported = self
            .device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported.any(|range| Self::is_config_compatible(config, &range)))
    }

    fn choose_config(&self, sample_rate: u32, channels: u16) -> Result<StreamConfig> {
        let make = |rate: u32, channels: u16| StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let requested = make(sample_rate, channels);
        if self.supports(&requested)? {
            return Ok(requested);
        }
        warn!("⚠️ 音频设备不支持 {} Hz, {} 声道，尝试标准配置", sample_rate, channels);
        for (rate, fb_channels) in FALLBACK_CONFIGS {
            let fallback = make(rate, fb_channels);
            if self.supports(&fallback)? {
                info!("✅ 使用回退配置: {} Hz, {} 声道", rate, fb_channels);
                return Ok(fallback);
            }
        }
        Err(PlayerError::AudioError(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            sample_rate, channels
        )))
    }

    fn open_stream(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        self.close_stream();
        let config = self.choose_config(sample_rate, channels)?;

        let buffer = self.buffer.clone();
        let volume = self.volume.clone();
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().map(|v| v * vol).unwrap_or(0.0);
                    }
                },
                move |err| error!("❌ 音频流错误: {}", err),
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;
        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        info!("🔊 音频输出已启动: {} Hz, {} 声道", config.sample_rate.0, config.channels);
        self.stream = Some(stream);
        self.config = Some(config);
        self.source = Some((sample_rate, channels));
        self.rate_mismatch_logged = false;
        Ok(())
    }

    fn close_stream(&mut self) {
        if self.stream.take().is_some() {
            info!("🔊 音频输出已停止");
        }
        self.config = None;
        self.source = None;
    }
}

/// 按声道数重排交错样本（单声道复制 / 多声道取平均 / 截断）
fn remap_channels(input: &[f32], from: u16, to: u16, out: &mut Vec<f32>) {
    let (from, to) = (from as usize, to as usize);
    if from == to {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                out.push(frame[ch.min(from - 1)]);
            }
        }
    }
}

impl AudioSink for CpalAudioSink {
    fn enqueue(
        &mut self,
        buffer: &[f32],
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
    ) -> Result<()> {
        if format != SampleFormat::F32 {
            return Err(PlayerError::AudioError(format!("不支持的采样格式: {:?}", format)));
        }
        if channels == 0 {
            return Err(PlayerError::AudioError("声道数为 0".to_string()));
        }
        if self.source != Some((sample_rate, channels)) {
            self.open_stream(sample_rate, channels)?;
        }
        let Some(config) = self.config.as_ref() else {
            return Err(PlayerError::AudioError("音频流未打开".to_string()));
        };

        if config.sample_rate.0 != sample_rate && !self.rate_mismatch_logged {
            warn!(
                "⚠️ 设备采样率 {} Hz 与源 {} Hz 不一致，音调会有偏差",
                config.sample_rate.0, sample_rate
            );
            self.rate_mismatch_logged = true;
        }

        let mut mapped = Vec::with_capacity(buffer.len());
        remap_channels(buffer, channels, config.channels, &mut mapped);
        for sample in mapped {
            self.buffer.push(sample);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut dropped = 0usize;
        while self.buffer.pop().is_some() {
            dropped += 1;
        }
        debug!("🗑️ 清空音频缓冲: {} 个采样", dropped);
        Ok(())
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        self.close_stream();
    }
}
