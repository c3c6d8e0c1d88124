use crate::core::{PlayerError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 跳帧阈值 = 该系数 × 帧时长
pub const DEFAULT_SKIP_THRESHOLD_FRAMES: f64 = 5.0;
/// 最多连续跳过的帧数，之后强制渲染一帧
pub const DEFAULT_MAX_CONSECUTIVE_SKIPS: u32 = 4;
/// 单帧最长等待时间
pub const DEFAULT_MAX_WAIT_MS: u64 = 1000;
/// 流未提供帧率时使用的帧率
pub const DEFAULT_FRAME_RATE: f64 = 25.0;

/// 视频在途队列：超过高水位开始限流
pub const VIDEO_HIGH_WATERMARK: usize = 48;
/// 视频在途队列：回落到低水位才解除限流
pub const VIDEO_LOW_WATERMARK: usize = 36;
pub const AUDIO_HIGH_WATERMARK: usize = 120;
pub const AUDIO_LOW_WATERMARK: usize = 80;

/// 时钟最多领先最后一帧（结束时刻）的时间
pub const DEFAULT_LOOKAHEAD_MS: u64 = 100;
/// 超过这个时间没有音频帧同步，时钟退回墙钟主导
pub const DEFAULT_AUDIO_STALL_MS: u64 = 500;

/// 阻塞点重新检查停止信号的间隔
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
pub const MAX_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_PAUSED_SLEEP_MS: u64 = 10;
/// 播放结束时等待在途帧送达的上限
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub skip_threshold_frames: f64,
    pub max_consecutive_skips: u32,
    pub max_wait_ms: u64,
    pub default_frame_rate: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            skip_threshold_frames: DEFAULT_SKIP_THRESHOLD_FRAMES,
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            default_frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

/// 背压水位（单位：在途帧数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Watermarks {
    pub video_high: usize,
    pub video_low: usize,
    pub audio_high: usize,
    pub audio_low: usize,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            video_high: VIDEO_HIGH_WATERMARK,
            video_low: VIDEO_LOW_WATERMARK,
            audio_high: AUDIO_HIGH_WATERMARK,
            audio_low: AUDIO_LOW_WATERMARK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub lookahead_ms: u64,
    pub audio_stall_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            audio_stall_ms: DEFAULT_AUDIO_STALL_MS,
        }
    }
}

/// 引擎配置（JSON，缺省字段使用默认值）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pacing: PacingConfig,
    pub backpressure: Watermarks,
    pub clock: ClockConfig,
    pub poll_interval_ms: u64,
    pub paused_sleep_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pacing: PacingConfig::default(),
            backpressure: Watermarks::default(),
            clock: ClockConfig::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            paused_sleep_ms: DEFAULT_PAUSED_SLEEP_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PlayerError::ConfigError(msg));

        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return invalid(format!(
                "poll_interval_ms 必须在 1..={} 之间: {}",
                MAX_POLL_INTERVAL_MS, self.poll_interval_ms
            ));
        }
        if self.paused_sleep_ms == 0 || self.paused_sleep_ms > MAX_POLL_INTERVAL_MS {
            return invalid(format!(
                "paused_sleep_ms 必须在 1..={} 之间: {}",
                MAX_POLL_INTERVAL_MS, self.paused_sleep_ms
            ));
        }
        if self.clock.lookahead_ms > DEFAULT_LOOKAHEAD_MS {
            return invalid(format!("lookahead_ms 不能超过 100: {}", self.clock.lookahead_ms));
        }
        let marks = &self.backpressure;
        if marks.video_low >= marks.video_high {
            return invalid(format!(
                "视频水位必须 low < high: {} / {}",
                marks.video_low, marks.video_high
            ));
        }
        if marks.audio_low >= marks.audio_high {
            return invalid(format!(
                "音频水位必须 low < high: {} / {}",
                marks.audio_low, marks.audio_high
            ));
        }
        if !(self.pacing.default_frame_rate.is_finite() && self.pacing.default_frame_rate > 0.0) {
            return invalid(format!("default_frame_rate 无效: {}", self.pacing.default_frame_rate));
        }
        if !(self.pacing.skip_threshold_frames.is_finite() && self.pacing.skip_threshold_frames > 0.0) {
            return invalid(format!(
                "skip_threshold_frames 无效: {}",
                self.pacing.skip_threshold_frames
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn paused_sleep(&self) -> Duration {
        Duration::from_millis(self.paused_sleep_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
