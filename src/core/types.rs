use crate::core::clock::MasterSource;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// 播放状态
///
/// `Waiting → Loading → (Playing ⇄ Paused) → {Ended | Stopped | Error}`，
/// `Buffering` 只在清晰度切换过程中短暂出现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Waiting,
    Loading,
    Playing,
    Paused,
    Buffering,
    Ended,
    Stopped,
    Error,
}

impl Status {
    /// 播放线程已退出（或从未启动）
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Waiting | Status::Ended | Status::Stopped | Status::Error)
    }

    fn as_u8(self) -> u8 {
        match self {
            Status::Waiting => 0,
            Status::Loading => 1,
            Status::Playing => 2,
            Status::Paused => 3,
            Status::Buffering => 4,
            Status::Ended => 5,
            Status::Stopped => 6,
            Status::Error => 7,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Status::Loading,
            2 => Status::Playing,
            3 => Status::Paused,
            4 => Status::Buffering,
            5 => Status::Ended,
            6 => Status::Stopped,
            7 => Status::Error,
            _ => Status::Waiting,
        }
    }
}

/// 可跨线程无锁读取的状态；只有播放线程写入
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status.as_u8()))
    }

    pub fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    /// 写入新状态，返回旧状态
    pub fn swap(&self, status: Status) -> Status {
        Status::from_u8(self.0.swap(status.as_u8(), Ordering::AcqRel))
    }
}

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 视频帧数据
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub stride: usize,      // 每行字节数
    pub format: PixelFormat,
    pub duration: f64,      // 帧持续时间（秒），0 表示未知
    pub data: Vec<u8>,
}

/// 音频帧数据（交错排列）
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>,     // 统一使用 f32 格式
}

impl AudioFrame {
    /// 本帧覆盖的时长（秒）
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.data.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

#[derive(Debug, Clone)]
pub enum FramePayload {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// 解码产出的一帧，创建后不再修改，被调度恰好消费一次
#[derive(Debug, Clone)]
pub struct FrameUnit {
    pub pts: f64,           // 显示时间戳（秒）
    pub payload: FramePayload,
}

impl FrameUnit {
    pub fn video(pts: f64, frame: VideoFrame) -> Self {
        Self { pts, payload: FramePayload::Video(frame) }
    }

    pub fn audio(pts: f64, frame: AudioFrame) -> Self {
        Self { pts, payload: FramePayload::Audio(frame) }
    }

    pub fn kind(&self) -> MediaKind {
        match self.payload {
            FramePayload::Video(_) => MediaKind::Video,
            FramePayload::Audio(_) => MediaKind::Audio,
        }
    }

    /// 帧时长（秒），视频帧未标注时返回 0
    pub fn duration(&self) -> f64 {
        match &self.payload {
            FramePayload::Video(frame) => frame.duration,
            FramePayload::Audio(frame) => frame.duration(),
        }
    }
}

/// Seek 方向偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekBias {
    /// 定位到目标之前（或恰好在目标）的关键帧
    Backward,
    /// 允许定位到目标之后的关键帧
    Forward,
}

/// 解码会话信息（由 Decoder::open 返回）
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub duration_ms: Option<i64>,     // None 表示直播 / 未知时长
    pub seekable: bool,
    pub has_video: bool,
    pub has_audio: bool,
    pub frame_rate_hint: Option<f64>,
}

impl SessionInfo {
    /// 有限时长、可 Seek 的媒体
    pub fn finite(duration_ms: i64) -> Self {
        Self {
            duration_ms: Some(duration_ms.max(0)),
            seekable: true,
            has_video: false,
            has_audio: false,
            frame_rate_hint: None,
        }
    }

    /// 直播流：无时长、不可 Seek
    pub fn live() -> Self {
        Self {
            duration_ms: None,
            seekable: false,
            has_video: false,
            has_audio: false,
            frame_rate_hint: None,
        }
    }

    pub fn with_video(mut self, frame_rate: Option<f64>) -> Self {
        self.has_video = true;
        self.frame_rate_hint = frame_rate.filter(|fps| fps.is_finite() && *fps > 0.0);
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.has_audio = true;
        self
    }

    pub fn with_seekable(mut self, seekable: bool) -> Self {
        self.seekable = seekable;
        self
    }

    pub fn is_live(&self) -> bool {
        self.duration_ms.is_none()
    }
}

/// 一档清晰度：已解析好的媒体地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    pub label: String,
    pub url: String,
}

impl QualityLevel {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self { label: label.into(), url: url.into() }
    }
}

/// 帧调度诊断计数（不影响正确性），每次重新初始化会话时清零
#[derive(Debug, Default)]
pub struct PacingStats {
    rendered: AtomicU64,
    skipped: AtomicU64,
    forced: AtomicU64,
    audio_frames: AtomicU64,
    decode_errors: AtomicU64,
    consecutive_skips: AtomicU64,
}

impl PacingStats {
    pub fn record_rendered(&self, forced: bool) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
        self.consecutive_skips.store(0, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.consecutive_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.rendered.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.forced.store(0, Ordering::Relaxed);
        self.audio_frames.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.consecutive_skips.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PacingStatsSnapshot {
        PacingStatsSnapshot {
            rendered: self.rendered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            consecutive_skips: self.consecutive_skips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingStatsSnapshot {
    pub rendered: u64,
    pub skipped: u64,
    pub forced: u64,
    pub audio_frames: u64,
    pub decode_errors: u64,
    pub consecutive_skips: u64,
}

/// 播放器状态信息（供 UI 读取）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub status: Status,
    pub position_ms: i64,       // 当前位置（毫秒）
    pub duration_ms: i64,       // 总时长（毫秒），直播为 -1
    pub speed: f32,
    pub quality: usize,
    pub repeat: bool,
    pub clock_master: MasterSource,  // 诊断：音频主导还是墙钟主导
    pub stats: PacingStatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_status_round_trips_every_state() {
        let status = AtomicStatus::new(Status::Waiting);
        for next in [
            Status::Loading,
            Status::Playing,
            Status::Paused,
            Status::Buffering,
            Status::Ended,
            Status::Stopped,
            Status::Error,
        ] {
            status.swap(next);
            assert_eq!(status.load(), next);
        }
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            data: vec![0.0; 48000],
        };
        assert!((frame.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_stats_reset_clears_counters() {
        let stats = PacingStats::default();
        stats.record_skipped();
        stats.record_skipped();
        assert_eq!(stats.snapshot().consecutive_skips, 2);
        stats.record_rendered(true);
        let snap = stats.snapshot();
        assert_eq!((snap.rendered, snap.skipped, snap.forced, snap.consecutive_skips), (1, 2, 1, 0));
        stats.reset();
        assert_eq!(stats.snapshot(), PacingStatsSnapshot::default());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Buffering).unwrap();
        assert_eq!(json, "\"buffering\"");
    }
}
