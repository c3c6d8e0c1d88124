use crate::core::{
    AtomicStatus, EngineConfig, PacingStats, PacingStatsSnapshot, PlaybackClock, PlayerError,
    PlayerState, QualityLevel, Result, SessionInfo, Status, MAX_SPEED,
};
use crate::player::command::CommandSlots;
use crate::player::decoder_source::DecoderFactory;
use crate::player::log_ctx;
use crate::player::playback_loop::PlaybackLoop;
use crate::player::sink::{SinkDispatcher, Sinks};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 播放器对外接口
///
/// 所有控制方法都不阻塞（`stop` 除外，它会等待播放线程退出），
/// 可以从任意线程调用，包括每帧轮询时间的渲染线程。
pub trait MediaPlayer {
    /// 启动播放线程并开始播放
    fn start(&self) -> Result<()>;
    /// 启动播放线程，打开后停在暂停状态
    fn start_paused(&self) -> Result<()>;
    fn pause(&self);
    fn resume(&self);
    fn toggle_play(&self);
    /// 请求停止并等待播放线程退出
    fn stop(&self);
    /// 跳转到指定位置（毫秒），不可 Seek 时返回 false
    fn seek(&self, position_ms: i64) -> bool;
    fn seek_relative(&self, delta_ms: i64) -> bool;
    /// 设置播放速率，范围 (0, 4]
    fn set_speed(&self, speed: f32) -> bool;
    fn set_quality(&self, index: usize) -> bool;
    fn status(&self) -> Status;
    fn time_ms(&self) -> i64;
    /// 总时长（毫秒），直播 / 未知返回 -1
    fn duration_ms(&self) -> i64;
    fn can_seek(&self) -> bool;
    fn can_pause(&self) -> bool;
    fn can_play(&self) -> bool;
    fn set_repeat(&self, repeat: bool);
    fn is_repeat(&self) -> bool;
    fn snapshot(&self) -> PlayerState;
}

/// 播放线程与控制方共享的状态
///
/// 播放线程是唯一写入 `status` / `duration_ms` / `seekable` 的一方，
/// 外部线程只通过 `slots` 影响播放线程。
pub(crate) struct EngineShared {
    pub clock: PlaybackClock,
    pub slots: CommandSlots,
    pub status: AtomicStatus,
    pub duration_ms: AtomicI64,
    pub seekable: AtomicBool,
    pub repeat: AtomicBool,
    pub active_quality: AtomicUsize,
    pub stats: PacingStats,
    pub dispatcher: SinkDispatcher,
}

impl EngineShared {
    pub fn new(config: &EngineConfig, sinks: Sinks) -> Self {
        Self {
            clock: PlaybackClock::with_settings(
                Duration::from_millis(config.clock.lookahead_ms),
                Duration::from_millis(config.clock.audio_stall_ms),
            ),
            slots: CommandSlots::new(),
            status: AtomicStatus::new(Status::Waiting),
            duration_ms: AtomicI64::new(-1),
            seekable: AtomicBool::new(false),
            repeat: AtomicBool::new(false),
            active_quality: AtomicUsize::new(0),
            stats: PacingStats::default(),
            dispatcher: SinkDispatcher::new(sinks),
        }
    }

    pub fn set_status(&self, status: Status) {
        let old = self.status.swap(status);
        if old != status {
            info!("{} 📺 状态变化: {:?} -> {:?}", log_ctx(), old, status);
        }
    }

    /// 会话打开后公布媒体信息
    pub fn publish_session(&self, info: &SessionInfo, quality: usize) {
        self.duration_ms.store(info.duration_ms.unwrap_or(-1), Ordering::Release);
        self.seekable.store(info.seekable, Ordering::Release);
        self.active_quality.store(quality, Ordering::Release);
    }

    fn forget_session(&self) {
        self.duration_ms.store(-1, Ordering::Release);
        self.seekable.store(false, Ordering::Release);
    }
}

/// 播放引擎：持有一个专用播放线程，对外提供 `MediaPlayer` 接口
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    factory: Arc<dyn DecoderFactory>,
    qualities: Vec<QualityLevel>,
    config: EngineConfig,
    thread: Mutex<Option<JoinHandle<Status>>>,
}

impl PlaybackEngine {
    pub fn new(
        config: EngineConfig,
        qualities: Vec<QualityLevel>,
        factory: Arc<dyn DecoderFactory>,
        sinks: Sinks,
    ) -> Result<Self> {
        config.validate()?;
        if qualities.is_empty() {
            return Err(PlayerError::ConfigError("至少需要一档清晰度".to_string()));
        }

        info!("{} 🎮 创建播放引擎，共 {} 档清晰度", log_ctx(), qualities.len());
        Ok(Self {
            shared: Arc::new(EngineShared::new(&config, sinks)),
            factory,
            qualities,
            config,
            thread: Mutex::new(None),
        })
    }

    pub fn qualities(&self) -> &[QualityLevel] {
        &self.qualities
    }

    pub fn active_quality(&self) -> usize {
        self.shared.active_quality.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PacingStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn speed(&self) -> f32 {
        self.shared.clock.speed()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 播放线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn spawn(&self, start_paused: bool) -> Result<()> {
        let mut slot = self.thread.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                warn!("{} ⚠️ 播放线程已在运行，忽略启动请求", log_ctx());
                return Err(PlayerError::AlreadyRunning);
            }
        }
        if let Some(handle) = slot.take() {
            Self::join(handle);
        }

        self.shared.slots.clear_all();
        self.shared.clock.reset();
        self.shared.forget_session();
        self.shared.set_status(Status::Loading);

        let shared = self.shared.clone();
        let factory = self.factory.clone();
        let qualities = self.qualities.clone();
        let config = self.config.clone();

        info!("{} 🚀 启动播放线程 (start_paused={})", log_ctx(), start_paused);
        let spawned = thread::Builder::new()
            .name("playback-engine".to_string())
            .spawn(move || PlaybackLoop::new(shared, factory, qualities, config).run(start_paused));

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!("{} ❌ 无法创建播放线程: {}", log_ctx(), e);
                self.shared.set_status(Status::Error);
                Err(e.into())
            }
        }
    }

    fn join(handle: JoinHandle<Status>) -> Option<Status> {
        match handle.join() {
            Ok(status) => Some(status),
            Err(_) => {
                error!("{} ❌ 播放线程 panic", log_ctx());
                None
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.status().is_terminal()
    }
}

impl MediaPlayer for PlaybackEngine {
    fn start(&self) -> Result<()> {
        self.spawn(false)
    }

    fn start_paused(&self) -> Result<()> {
        self.spawn(true)
    }

    fn pause(&self) {
        if self.is_active() {
            info!("{} ⏸️ 请求暂停", log_ctx());
            self.shared.slots.pause.request(true);
        }
    }

    fn resume(&self) {
        if self.is_active() {
            info!("{} ▶️ 请求继续播放", log_ctx());
            self.shared.slots.pause.request(false);
        }
    }

    fn toggle_play(&self) {
        match self.status() {
            Status::Playing => self.pause(),
            status if status.is_terminal() => {
                if let Err(e) = self.start() {
                    warn!("{} ⚠️ 重新开始播放失败: {}", log_ctx(), e);
                }
            }
            _ => self.resume(),
        }
    }

    fn stop(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            info!("{} ⏹️ 请求停止播放", log_ctx());
            self.shared.slots.stop.request(());
            match Self::join(handle) {
                Some(status) => info!("{} ✅ 播放线程已结束: {:?}", log_ctx(), status),
                None => self.shared.set_status(Status::Error),
            }
        }
    }

    fn seek(&self, position_ms: i64) -> bool {
        if !self.can_seek() {
            warn!("{} ⚠️ 当前不可 Seek ({:?})，忽略 {}ms", log_ctx(), self.status(), position_ms);
            return false;
        }
        let duration = self.duration_ms();
        let target = if duration >= 0 {
            position_ms.clamp(0, duration)
        } else {
            position_ms.max(0)
        };
        info!("{} 🎯 请求 Seek 到: {} ms", log_ctx(), target);
        self.shared.slots.seek.request(target);
        true
    }

    fn seek_relative(&self, delta_ms: i64) -> bool {
        let base = self.shared.slots.seek.peek().unwrap_or_else(|| self.time_ms());
        self.seek(base.saturating_add(delta_ms))
    }

    fn set_speed(&self, speed: f32) -> bool {
        if !(speed.is_finite() && speed > 0.0 && speed <= MAX_SPEED) {
            warn!("{} ⚠️ 播放速率超出范围 (0, {}]: {}", log_ctx(), MAX_SPEED, speed);
            return false;
        }
        if self.is_running() {
            self.shared.slots.speed.request(speed);
            true
        } else {
            self.shared.clock.set_speed(speed).is_ok()
        }
    }

    fn set_quality(&self, index: usize) -> bool {
        if index >= self.qualities.len() {
            warn!(
                "{} ⚠️ {}",
                log_ctx(),
                PlayerError::InvalidQuality { index, available: self.qualities.len() }
            );
            return false;
        }
        if self.is_running() {
            info!("{} 🔀 请求切换清晰度: {}", log_ctx(), self.qualities[index].label);
            self.shared.slots.quality.request(index);
        } else {
            self.shared.active_quality.store(index, Ordering::Release);
        }
        true
    }

    fn status(&self) -> Status {
        self.shared.status.load()
    }

    fn time_ms(&self) -> i64 {
        self.shared.clock.now_ms()
    }

    fn duration_ms(&self) -> i64 {
        self.shared.duration_ms.load(Ordering::Acquire)
    }

    fn can_seek(&self) -> bool {
        self.shared.seekable.load(Ordering::Acquire)
            && matches!(self.status(), Status::Playing | Status::Paused | Status::Buffering)
    }

    fn can_pause(&self) -> bool {
        self.status() == Status::Playing
    }

    fn can_play(&self) -> bool {
        let status = self.status();
        status == Status::Paused || status.is_terminal()
    }

    fn set_repeat(&self, repeat: bool) {
        self.shared.repeat.store(repeat, Ordering::Release);
    }

    fn is_repeat(&self) -> bool {
        self.shared.repeat.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> PlayerState {
        PlayerState {
            status: self.status(),
            position_ms: self.time_ms(),
            duration_ms: self.duration_ms(),
            speed: self.speed(),
            quality: self.active_quality(),
            repeat: self.is_repeat(),
            clock_master: self.shared.clock.master_source(),
            stats: self.stats(),
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
