use crate::core::config::PacingConfig;
use std::time::Duration;

/// 对一帧的调度决定
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacingDecision {
    /// 立即送出
    Render,
    /// 连续跳帧达到上限，强制送出一帧保证画面有进展
    ForcedRender,
    /// 帧还没到时间，等待后送出；时长按媒体时间计，调用方按当前速率换算成墙钟
    Wait(Duration),
    /// 严重落后，丢弃
    Skip,
}

/// 帧调度策略：根据 drift = 帧 PTS - 参考时间 决定渲染、等待或跳过
///
/// 跳帧阈值按帧率换算（`系数 / fps` 秒），24/30/60fps 的内容在相对意义上表现一致。
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    frame_duration: f64,
    skip_threshold: f64,
    max_consecutive_skips: u32,
    max_wait: Duration,
    consecutive_skips: u32,
}

impl PacingPolicy {
    pub fn for_frame_rate(frame_rate: Option<f64>, config: &PacingConfig) -> Self {
        let fps = frame_rate
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(config.default_frame_rate);
        Self {
            frame_duration: 1.0 / fps,
            skip_threshold: config.skip_threshold_frames / fps,
            max_consecutive_skips: config.max_consecutive_skips,
            max_wait: Duration::from_millis(config.max_wait_ms),
            consecutive_skips: 0,
        }
    }

    /// 视频帧决策
    pub fn evaluate_video(&mut self, drift: f64) -> PacingDecision {
        if drift < -self.skip_threshold {
            if self.consecutive_skips < self.max_consecutive_skips {
                self.consecutive_skips += 1;
                return PacingDecision::Skip;
            }
            self.consecutive_skips = 0;
            return PacingDecision::ForcedRender;
        }

        self.consecutive_skips = 0;
        if drift <= 0.0 {
            PacingDecision::Render
        } else {
            PacingDecision::Wait(self.wait_for(drift))
        }
    }

    /// 音频帧决策：只等待，从不跳过
    pub fn evaluate_audio(&self, drift: f64) -> PacingDecision {
        if drift <= 0.0 {
            PacingDecision::Render
        } else {
            PacingDecision::Wait(self.wait_for(drift))
        }
    }

    fn wait_for(&self, drift: f64) -> Duration {
        Duration::from_secs_f64(drift).min(self.max_wait)
    }

    pub fn reset(&mut self) {
        self.consecutive_skips = 0;
    }

    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    pub fn skip_threshold(&self) -> f64 {
        self.skip_threshold
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn consecutive_skips(&self) -> u32 {
        self.consecutive_skips
    }
}
