use crate::core::{PlayerError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 允许的最大播放速率
pub const MAX_SPEED: f32 = 4.0;

/// 时钟主导源（诊断信息：两种模式下 `now()` 的外推方式相同，区别只在锚点由谁刷新）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterSource {
    /// 墙钟外推
    Wall,
    /// 每个音频帧到达时用其 PTS 重新锚定
    Audio,
}

/// 播放时钟 - 用于音视频同步
///
/// 媒体时间 = 锚点媒体时间 + (当前墙钟 - 锚点墙钟) × 速率。
/// 除 `rebase` 以外，任何线程连续调用 `now()` 得到的值都不会回退。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    anchor_media: f64,              // 锚点媒体时间（秒）
    anchor_wall: Instant,           // 锚点墙钟时刻
    speed: f64,
    paused: bool,
    frozen: f64,                    // 暂停时冻结的位置
    floor: f64,                     // 最近一次报告的值（单调下界）
    presented_until: Option<f64>,   // 已送出帧的最晚结束时刻
    lookahead: f64,
    master: MasterSource,
    last_audio_sync: Option<Instant>,
    audio_stall: Duration,
}

impl ClockInner {
    fn now(&mut self) -> f64 {
        if self.paused {
            return self.frozen;
        }

        let mut value = self.anchor_media + self.anchor_wall.elapsed().as_secs_f64() * self.speed;

        // 不允许跑到解码前面太多：到达上界后把锚点挪到上界，解码追上后平滑继续
        if let Some(until) = self.presented_until {
            let bound = until + self.lookahead;
            if value > bound {
                self.anchor_media = bound;
                self.anchor_wall = Instant::now();
                value = bound;
            }
        }

        if value < self.floor {
            value = self.floor;
        } else {
            self.floor = value;
        }
        value
    }

    fn reanchor(&mut self) {
        let current = self.now();
        self.anchor_media = current;
        self.anchor_wall = Instant::now();
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::with_settings(
            Duration::from_millis(crate::core::config::DEFAULT_LOOKAHEAD_MS),
            Duration::from_millis(crate::core::config::DEFAULT_AUDIO_STALL_MS),
        )
    }

    pub fn with_settings(lookahead: Duration, audio_stall: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                anchor_media: 0.0,
                anchor_wall: Instant::now(),
                speed: 1.0,
                paused: true,
                frozen: 0.0,
                floor: 0.0,
                presented_until: None,
                lookahead: lookahead.as_secs_f64(),
                master: MasterSource::Wall,
                last_audio_sync: None,
                audio_stall,
            })),
        }
    }

    /// 获取当前播放时间（秒）
    pub fn now(&self) -> f64 {
        self.inner.lock().now()
    }

    /// 获取当前播放时间（毫秒）
    pub fn now_ms(&self) -> i64 {
        (self.now() * 1000.0) as i64
    }

    /// 暂停播放（幂等）
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.frozen = inner.now();
            inner.paused = true;
        }
    }

    /// 恢复播放（幂等）
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.anchor_media = inner.frozen;
            inner.anchor_wall = Instant::now();
            inner.paused = false;
        }
    }

    /// 重设播放位置（Seek / 循环播放后使用）
    ///
    /// 这是唯一允许时间回退的操作，调用方需要把它当成显式的时间断点。
    pub fn rebase(&self, target: f64) {
        let mut inner = self.inner.lock();
        inner.anchor_media = target;
        inner.anchor_wall = Instant::now();
        inner.frozen = target;
        inner.floor = target;
        inner.presented_until = None;
    }

    /// 设置播放速率，范围 (0, 4]，超出范围时不做任何修改
    pub fn set_speed(&self, speed: f32) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0 && speed <= MAX_SPEED) {
            return Err(PlayerError::InvalidSpeed(speed));
        }
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.reanchor();
        }
        inner.speed = speed as f64;
        Ok(())
    }

    pub fn speed(&self) -> f32 {
        self.inner.lock().speed as f32
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// 记录一帧已送出，`duration` 为帧时长（秒）
    pub fn note_presented(&self, pts: f64, duration: f64) {
        let end = pts + duration.max(0.0);
        let mut inner = self.inner.lock();
        inner.presented_until = Some(match inner.presented_until {
            Some(until) => until.max(end),
            None => end,
        });
    }

    /// 用音频帧 PTS 锚定时钟
    ///
    /// 只会把时钟往回拉（音频落后时等音频追上），不会推到当前时间之前：
    /// 提前送出的音频帧不能让时间跳跃。报告值同样不会回退。
    pub fn sync_audio(&self, pts: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current = inner.now();
            inner.anchor_media = pts.min(current);
            inner.anchor_wall = Instant::now();
        }
        inner.master = MasterSource::Audio;
        inner.last_audio_sync = Some(Instant::now());
    }

    /// Seek 后音频时钟失效，直到下一个真实音频帧到达
    pub fn invalidate_audio_master(&self) {
        let mut inner = self.inner.lock();
        inner.master = MasterSource::Wall;
        inner.last_audio_sync = None;
    }

    /// 已送出帧的最晚结束时刻（秒）
    pub fn presented_until(&self) -> Option<f64> {
        self.inner.lock().presented_until
    }

    /// 当前主导源；音频超过 `audio_stall` 没有同步时退回墙钟
    pub fn master_source(&self) -> MasterSource {
        let mut inner = self.inner.lock();
        if inner.master == MasterSource::Audio && !inner.paused {
            let stalled = inner
                .last_audio_sync
                .map(|t| t.elapsed() > inner.audio_stall)
                .unwrap_or(true);
            if stalled {
                inner.master = MasterSource::Wall;
            }
        }
        inner.master
    }

    /// 回到初始状态（暂停在 0），保留速率
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.anchor_media = 0.0;
        inner.anchor_wall = Instant::now();
        inner.paused = true;
        inner.frozen = 0.0;
        inner.floor = 0.0;
        inner.presented_until = None;
        inner.master = MasterSource::Wall;
        inner.last_audio_sync = None;
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
