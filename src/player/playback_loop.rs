use crate::core::{
    AudioFrame, EngineConfig, FramePayload, FrameUnit, PlayerError, QualityLevel, Result, SeekBias,
    Status, VideoFrame,
};
use crate::player::backpressure::BackpressureGate;
use crate::player::decoder_source::{DecodedUnit, DecoderFactory};
use crate::player::engine::EngineShared;
use crate::player::log_ctx;
use crate::player::pacing::{PacingDecision, PacingPolicy};
use crate::player::session::PlaybackSession;
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 开头这么多帧逐帧打印，之后每 100 帧打印一次
const VERBOSE_FIRST_FRAMES: u64 = 5;
const LOG_EVERY_FRAMES: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopControl {
    Continue,
    Exit(Status),
}

/// 播放线程状态机
///
/// 只在播放线程内创建和运行；每次 `step` 按固定优先级处理命令：
/// 停止 > 清晰度切换 > Seek > 速率/暂停，然后拉取并调度一个解码单元。
///
/// 所有阻塞点（暂停、背压、等待帧到期、结束时排空）每隔 `poll_interval_ms`
/// 重新检查停止信号。`stop()` 最坏延迟 = 一个轮询间隔 + 一次 `next_unit()` + 一次投递。
pub(crate) struct PlaybackLoop {
    shared: Arc<EngineShared>,
    factory: Arc<dyn DecoderFactory>,
    qualities: Vec<QualityLevel>,
    config: EngineConfig,
    session: Option<PlaybackSession>,
    pacing: PacingPolicy,
    gate: BackpressureGate,
    internal_seek: Option<i64>,     // 内部 Seek（循环播放、清晰度切换后恢复位置）
    preroll_until: Option<f64>,     // Seek 后丢弃目标之前的帧（秒）
    awaiting_first_frame: bool,     // 新会话的首帧需要重新锚定时钟
    session_unpositioned: bool,     // 清晰度切换后的新会话还没 Seek 回原位置
}

impl PlaybackLoop {
    pub fn new(
        shared: Arc<EngineShared>,
        factory: Arc<dyn DecoderFactory>,
        qualities: Vec<QualityLevel>,
        config: EngineConfig,
    ) -> Self {
        let pacing = PacingPolicy::for_frame_rate(None, &config.pacing);
        let gate = BackpressureGate::new(config.backpressure);
        Self {
            shared,
            factory,
            qualities,
            config,
            session: None,
            pacing,
            gate,
            internal_seek: None,
            preroll_until: None,
            awaiting_first_frame: false,
            session_unpositioned: false,
        }
    }

    /// 线程入口：初始化 → 主循环 → 清理，返回最终状态
    pub fn run(mut self, start_paused: bool) -> Status {
        info!("{} 🎬 播放线程启动", log_ctx());
        let status = match self.initialize(start_paused) {
            Ok(()) => loop {
                if let LoopControl::Exit(status) = self.step() {
                    break status;
                }
            },
            Err(e) => {
                error!("{} ❌ 初始化播放会话失败: {}", log_ctx(), e);
                Status::Error
            }
        };
        self.cleanup(status);
        status
    }

    fn initialize(&mut self, start_paused: bool) -> Result<()> {
        self.shared.set_status(Status::Loading);
        let index = self
            .shared
            .active_quality
            .load(Ordering::Acquire)
            .min(self.qualities.len().saturating_sub(1));
        self.open_session(index)?;

        self.shared.clock.rebase(0.0);
        self.awaiting_first_frame = true;
        if start_paused {
            self.shared.clock.pause();
            self.shared.set_status(Status::Paused);
        } else {
            self.shared.clock.resume();
            self.shared.set_status(Status::Playing);
        }
        Ok(())
    }

    fn open_session(&mut self, index: usize) -> Result<()> {
        let quality = self.qualities.get(index).ok_or(PlayerError::InvalidQuality {
            index,
            available: self.qualities.len(),
        })?;
        let session = PlaybackSession::open(self.factory.as_ref(), quality)?;
        let info = session.info().clone();

        self.shared.publish_session(&info, index);
        self.shared.stats.reset();
        self.shared.dispatcher.begin_session();
        self.pacing = PacingPolicy::for_frame_rate(info.frame_rate_hint, &self.config.pacing);
        self.preroll_until = None;
        self.session_unpositioned = false;
        self.session = Some(session);
        debug!(
            "{} 帧调度: 帧时长={:.4}s, 跳帧阈值={:.4}s",
            log_ctx(),
            self.pacing.frame_duration(),
            self.pacing.skip_threshold()
        );
        Ok(())
    }

    /// 主循环的一次迭代
    pub fn step(&mut self) -> LoopControl {
        let shared = self.shared.clone();

        // 1. 停止
        if shared.slots.stop.take_if_present().is_some() {
            info!("{} ⏹️ 收到停止请求", log_ctx());
            return LoopControl::Exit(Status::Stopped);
        }

        // 2. 清晰度切换
        if let Some(index) = shared.slots.quality.take_if_present() {
            if index != shared.active_quality.load(Ordering::Acquire) {
                return self.switch_quality(index);
            }
            debug!("{} 已经是第 {} 档清晰度，忽略", log_ctx(), index);
        }

        // 3. Seek（用户请求优先于内部 Seek）
        let user_seek = shared.slots.seek.take_if_present();
        let internal_seek = self.internal_seek.take();
        if let Some(target) = user_seek.or(internal_seek) {
            if !self.perform_seek(target) && self.session_unpositioned {
                // 时钟还停在旧会话的位置，改由新会话的首帧重新锚定
                warn!("{} ⚠️ 切换清晰度后未能恢复位置，从新会话起点继续", log_ctx());
                self.session_unpositioned = false;
                self.awaiting_first_frame = true;
            }
            return LoopControl::Continue;
        }

        // 4. 速率 / 暂停
        self.apply_soft_commands();
        if shared.status.load() == Status::Paused {
            thread::sleep(self.config.paused_sleep());
            return LoopControl::Continue;
        }

        // 背压：在途帧过多时先等渲染线程消化
        let was_throttling = self.gate.is_throttling();
        let throttling = self.gate.update(
            shared.dispatcher.video_in_flight(),
            shared.dispatcher.audio_in_flight(),
        );
        if throttling != was_throttling {
            debug!(
                "{} {} 背压 (视频在途={}, 音频在途={})",
                log_ctx(),
                if throttling { "🚦 进入" } else { "✅ 解除" },
                shared.dispatcher.video_in_flight(),
                shared.dispatcher.audio_in_flight()
            );
        }
        if throttling {
            thread::sleep(self.config.poll_interval());
            return LoopControl::Continue;
        }

        // 5. 拉取一个解码单元
        let unit = match self.session.as_mut() {
            Some(session) => session.decoder().next_unit(),
            None => {
                error!("{} ❌ 没有活动的播放会话", log_ctx());
                return LoopControl::Exit(Status::Error);
            }
        };

        match unit {
            Ok(DecodedUnit::Frames(frames)) => {
                // 6/7. 调度并送出
                for frame in frames {
                    if !self.present(frame) {
                        break;
                    }
                }
                LoopControl::Continue
            }
            Ok(DecodedUnit::EndOfStream) => self.handle_end_of_stream(),
            Err(e) if e.is_transient() => {
                warn!("{} ⚠️ 跳过损坏的数据单元: {}", log_ctx(), e);
                shared.stats.record_decode_error();
                LoopControl::Continue
            }
            Err(e) => {
                error!("{} ❌ 解码器故障，终止播放: {}", log_ctx(), e);
                LoopControl::Exit(Status::Error)
            }
        }
    }

    /// 处理速率和暂停命令（不会打断阻塞点）
    fn apply_soft_commands(&mut self) {
        let shared = &self.shared;
        if let Some(speed) = shared.slots.speed.take_if_present() {
            match shared.clock.set_speed(speed) {
                Ok(()) => info!("{} ⏩ 播放速率: {}x", log_ctx(), speed),
                Err(e) => warn!("{} ⚠️ {}", log_ctx(), e),
            }
        }

        if let Some(paused) = shared.slots.pause.take_if_present() {
            match (paused, shared.status.load()) {
                (true, Status::Playing) => {
                    shared.clock.pause();
                    shared.dispatcher.flush_audio();
                    shared.set_status(Status::Paused);
                }
                (false, Status::Paused) => {
                    shared.clock.resume();
                    shared.set_status(Status::Playing);
                }
                _ => {}
            }
        }
    }

    /// 调度一帧；返回 false 表示被停止 / Seek / 切换请求打断，剩余帧应丢弃
    fn present(&mut self, unit: FrameUnit) -> bool {
        let FrameUnit { pts, payload } = unit;

        if let Some(target) = self.preroll_until {
            let end = match &payload {
                FramePayload::Video(frame) if frame.duration > 0.0 => pts + frame.duration,
                FramePayload::Video(_) => pts + self.pacing.frame_duration(),
                FramePayload::Audio(_) => pts,
            };
            if end < target {
                debug!("{} ⏭️ 丢弃 Seek 前导帧: PTS={:.3}s (目标 {:.3}s)", log_ctx(), pts, target);
                return true;
            }
            if pts >= target {
                self.preroll_until = None;
            }
        }

        if self.awaiting_first_frame {
            self.awaiting_first_frame = false;
            info!("{} 🕐 首帧锚定时钟: PTS={:.3}s", log_ctx(), pts);
            self.shared.clock.rebase(pts);
        }

        match payload {
            FramePayload::Video(frame) => self.present_video(pts, frame),
            FramePayload::Audio(frame) => self.present_audio(pts, frame),
        }
    }

    fn present_video(&mut self, pts: f64, frame: VideoFrame) -> bool {
        let shared = self.shared.clone();
        let drift = pts - shared.clock.now();

        let forced = match self.pacing.evaluate_video(drift) {
            PacingDecision::Skip => {
                shared.stats.record_skipped();
                debug!("{} ⏭️ 跳过视频帧: PTS={:.3}s, 落后 {:.3}s", log_ctx(), pts, -drift);
                return true;
            }
            PacingDecision::ForcedRender => {
                debug!("{} ⚡ 连续跳帧达到上限，强制渲染: PTS={:.3}s", log_ctx(), pts);
                true
            }
            PacingDecision::Render => false,
            PacingDecision::Wait(budget) => {
                if !self.wait_until_due(pts, budget) {
                    return false;
                }
                false
            }
        };

        let duration = if frame.duration > 0.0 { frame.duration } else { self.pacing.frame_duration() };
        shared.dispatcher.dispatch_video(frame);
        shared.clock.note_presented(pts, duration);
        shared.stats.record_rendered(forced);

        let rendered = shared.stats.snapshot().rendered;
        if rendered <= VERBOSE_FIRST_FRAMES || rendered % LOG_EVERY_FRAMES == 0 {
            info!(
                "{} 🎬 渲染视频帧 #{}: PTS={:.3}s, 时钟={:.3}s",
                log_ctx(),
                rendered,
                pts,
                shared.clock.now()
            );
        }
        true
    }

    fn present_audio(&mut self, pts: f64, frame: AudioFrame) -> bool {
        let shared = self.shared.clone();
        if let PacingDecision::Wait(budget) = self.pacing.evaluate_audio(pts - shared.clock.now()) {
            if !self.wait_until_due(pts, budget) {
                return false;
            }
        }

        let duration = frame.duration();
        shared.dispatcher.dispatch_audio(frame);
        shared.clock.sync_audio(pts);
        shared.clock.note_presented(pts, duration);
        shared.stats.record_audio();
        true
    }

    /// 分片等待直到帧到期，`budget` 为最长等待（媒体时间）
    ///
    /// 每片睡眠按当前速率从预算里扣除对应的媒体时间，慢速播放时墙钟等待相应变长。
    /// 暂停期间不消耗预算。返回 false 表示被打断。
    fn wait_until_due(&mut self, pts: f64, budget: Duration) -> bool {
        let slice = self.config.poll_interval();
        let mut remaining = budget.as_secs_f64();
        loop {
            if self.shared.slots.interrupt_pending() {
                debug!("{} 等待帧到期时被打断: PTS={:.3}s", log_ctx(), pts);
                return false;
            }
            self.apply_soft_commands();
            if self.shared.status.load() == Status::Paused {
                thread::sleep(self.config.paused_sleep());
                continue;
            }

            let drift = pts - self.shared.clock.now();
            if drift <= 0.0 || remaining <= 0.0 {
                return true;
            }
            let speed = f64::from(self.shared.clock.speed()).max(f64::EPSILON);
            let nap = Duration::from_secs_f64(drift.min(remaining) / speed)
                .min(slice)
                .max(Duration::from_micros(100));
            thread::sleep(nap);
            remaining -= nap.as_secs_f64() * speed;
        }
    }

    /// 流结束后等待时钟走到最后一帧的结束时刻，最后一帧才算完整播放
    ///
    /// 暂停不计时；时钟超过 `drain_timeout` 没有前进时放弃。返回 false 表示被打断。
    fn wait_for_presented_end(&mut self) -> bool {
        let Some(end) = self.shared.clock.presented_until() else {
            return true;
        };
        let slice = self.config.poll_interval();
        let mut last = self.shared.clock.now();
        let mut progressed_at = Instant::now();
        loop {
            if self.shared.slots.interrupt_pending() {
                return false;
            }
            self.apply_soft_commands();
            if self.shared.status.load() == Status::Paused {
                thread::sleep(self.config.paused_sleep());
                progressed_at = Instant::now();
                continue;
            }

            let now = self.shared.clock.now();
            if now >= end {
                return true;
            }
            if now > last {
                last = now;
                progressed_at = Instant::now();
            } else if progressed_at.elapsed() >= self.config.drain_timeout() {
                warn!("{} ⚠️ 时钟停滞，提前结束: {:.3}s / {:.3}s", log_ctx(), now, end);
                return true;
            }
            let speed = f64::from(self.shared.clock.speed()).max(f64::EPSILON);
            let nap = Duration::from_secs_f64((end - now) / speed)
                .min(slice)
                .max(Duration::from_micros(100));
            thread::sleep(nap);
        }
    }

    /// 流结束：排空在途帧，然后循环或结束
    fn handle_end_of_stream(&mut self) -> LoopControl {
        info!("{} 🏁 到达流末尾", log_ctx());
        if !self.drain_in_flight() || !self.wait_for_presented_end() {
            return LoopControl::Continue;
        }

        if !self.shared.repeat.load(Ordering::Acquire) {
            return LoopControl::Exit(Status::Ended);
        }

        let seekable = self.session.as_ref().map(|s| s.info().seekable).unwrap_or(false);
        if seekable {
            info!("{} 🔁 循环播放：回到开头", log_ctx());
            self.internal_seek = Some(0);
            return LoopControl::Continue;
        }

        info!("{} 🔁 循环播放：媒体源不支持 Seek，重新打开", log_ctx());
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        let index = self.shared.active_quality.load(Ordering::Acquire);
        match self.open_session(index) {
            Ok(()) => {
                self.awaiting_first_frame = true;
                LoopControl::Continue
            }
            Err(e) => {
                error!("{} ❌ 循环播放重新打开失败: {}", log_ctx(), e);
                LoopControl::Exit(Status::Error)
            }
        }
    }

    /// 等待在途帧送达（有上限）；被停止 / Seek / 切换打断时返回 false
    fn drain_in_flight(&self) -> bool {
        let deadline = Instant::now() + self.config.drain_timeout();
        loop {
            let pending = self.shared.dispatcher.in_flight();
            if pending == 0 {
                return true;
            }
            if self.shared.slots.interrupt_pending() {
                return false;
            }
            if Instant::now() >= deadline {
                warn!("{} ⚠️ 等待在途帧超时，放弃 {} 帧", log_ctx(), pending);
                return true;
            }
            thread::sleep(self.config.poll_interval());
        }
    }

    /// 执行 Seek；失败时时钟和状态保持不变，返回 false
    fn perform_seek(&mut self, target_ms: i64) -> bool {
        let shared = self.shared.clone();
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let info = session.info().clone();
        if !info.seekable {
            warn!("{} ⚠️ 当前媒体源不支持 Seek，忽略 {}ms", log_ctx(), target_ms);
            return false;
        }
        let target_ms = match info.duration_ms {
            Some(duration) => target_ms.clamp(0, duration),
            None => target_ms.max(0),
        };
        let current_ms = shared.clock.now_ms();
        let bias = if target_ms > current_ms { SeekBias::Forward } else { SeekBias::Backward };
        info!("{} 🎯 Seek: {}ms -> {}ms ({:?})", log_ctx(), current_ms, target_ms, bias);

        let decoder = session.decoder();
        if let Err(e) = decoder.flush() {
            warn!("{} ⚠️ Seek 前 flush 解码器失败: {}", log_ctx(), e);
        }
        if let Err(e) = decoder.seek(target_ms, bias) {
            warn!("{} ❌ Seek 失败，保持原位置: {}", log_ctx(), e);
            return false;
        }

        let target = target_ms as f64 / 1000.0;
        shared.clock.rebase(target);
        shared.clock.invalidate_audio_master();
        shared.dispatcher.flush_audio();
        self.pacing.reset();
        self.preroll_until = Some(target);
        self.awaiting_first_frame = false;
        self.session_unpositioned = false;
        info!("{} ✅ Seek 完成: {}ms", log_ctx(), target_ms);
        true
    }

    fn switch_quality(&mut self, index: usize) -> LoopControl {
        let shared = self.shared.clone();
        let Some(quality) = self.qualities.get(index) else {
            warn!("{} ⚠️ 清晰度索引越界: {}", log_ctx(), index);
            return LoopControl::Continue;
        };
        let label = quality.label.clone();

        // 冻结时钟，记下当前位置
        let was_paused = shared.status.load() == Status::Paused;
        shared.clock.pause();
        let current_ms = shared.clock.now_ms();
        info!("{} 🔀 切换清晰度到 [{}]，当前位置 {}ms", log_ctx(), label, current_ms);
        shared.set_status(Status::Buffering);

        if let Some(session) = self.session.take() {
            session.teardown();
        }
        shared.dispatcher.flush_audio();

        if let Err(e) = self.open_session(index) {
            error!("{} ❌ 切换清晰度失败: {}", log_ctx(), e);
            return LoopControl::Exit(Status::Error);
        }

        let seekable = self.session.as_ref().map(|s| s.info().seekable).unwrap_or(false);
        if current_ms > 0 && seekable {
            if shared.slots.seek.is_pending() {
                debug!("{} 已有待处理的 Seek，不再恢复原位置", log_ctx());
            } else {
                self.internal_seek = Some(current_ms);
            }
            self.awaiting_first_frame = false;
            self.session_unpositioned = true;
        } else {
            if current_ms > 0 {
                warn!("{} ⚠️ 新清晰度不支持 Seek，从其起点继续播放", log_ctx());
            }
            self.awaiting_first_frame = true;
        }

        if was_paused {
            shared.set_status(Status::Paused);
        } else {
            shared.clock.resume();
            shared.set_status(Status::Playing);
        }
        info!("{} ✅ 已切换到 [{}]", log_ctx(), label);
        LoopControl::Continue
    }

    /// 释放资源；每一步都会执行，出错只记录日志
    fn cleanup(&mut self, status: Status) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        if status != Status::Ended {
            self.shared.dispatcher.flush_audio();
        }
        self.shared.clock.pause();
        self.internal_seek = None;
        self.preroll_until = None;
        self.shared.set_status(status);
        info!("{} 🎬 播放线程结束: {:?}", log_ctx(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::sink::{DiscardSink, Sinks};
    use crate::player::synthetic::{SyntheticFactory, SyntheticProbe};

    fn fixture(urls: &[&str]) -> (PlaybackLoop, Arc<EngineShared>, SyntheticProbe) {
        let config = EngineConfig::default();
        let sinks = Sinks::inline(Box::new(DiscardSink::default()), Box::new(DiscardSink::default()));
        let shared = Arc::new(EngineShared::new(&config, sinks));
        let probe = SyntheticProbe::default();
        let qualities = urls
            .iter()
            .enumerate()
            .map(|(i, url)| QualityLevel::new(format!("q{}", i), *url))
            .collect();
        let playback = PlaybackLoop::new(
            shared.clone(),
            Arc::new(SyntheticFactory::new(probe.clone())),
            qualities,
            config,
        );
        (playback, shared, probe)
    }

    fn run_until_exit(playback: &mut PlaybackLoop, max_steps: usize) -> Option<Status> {
        for _ in 0..max_steps {
            if let LoopControl::Exit(status) = playback.step() {
                return Some(status);
            }
        }
        None
    }

    #[test]
    fn test_rapid_seeks_coalesce_into_one() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a"]);
        playback.initialize(false).unwrap();

        shared.slots.seek.request(1_000);
        shared.slots.seek.request(2_000);
        shared.slots.seek.request(3_000);
        assert_eq!(playback.step(), LoopControl::Continue);

        assert_eq!(probe.snapshot().seeks, vec![(3_000, SeekBias::Forward)]);
        assert_eq!(probe.snapshot().flushes, 1);
        let now = shared.clock.now_ms();
        assert!((3_000..3_100).contains(&now), "时钟位置: {}", now);

        playback.step();
        assert_eq!(probe.snapshot().seeks.len(), 1);
    }

    #[test]
    fn test_user_seek_overrides_internal_seek() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a"]);
        playback.initialize(false).unwrap();
        playback.internal_seek = Some(0);
        shared.slots.seek.request(4_000);

        playback.step();
        playback.step();
        assert_eq!(probe.snapshot().seeks, vec![(4_000, SeekBias::Forward)]);
        assert!(playback.internal_seek.is_none());
    }

    #[test]
    fn test_stop_wins_over_other_commands() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a", "synthetic://b"]);
        playback.initialize(false).unwrap();
        shared.slots.quality.request(1);
        shared.slots.seek.request(2_000);
        shared.slots.stop.request(());

        assert_eq!(playback.step(), LoopControl::Exit(Status::Stopped));
        assert_eq!(probe.snapshot().opens.len(), 1);
        assert!(probe.snapshot().seeks.is_empty());
        assert!(shared.slots.seek.is_pending());
    }

    #[test]
    fn test_quality_switch_reseeks_to_previous_position() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a", "synthetic://b"]);
        playback.initialize(false).unwrap();
        shared.clock.rebase(2.0);

        shared.slots.quality.request(1);
        assert_eq!(playback.step(), LoopControl::Continue);
        assert_eq!(shared.status.load(), Status::Playing);
        assert_eq!(shared.active_quality.load(Ordering::Acquire), 1);
        let log = probe.snapshot();
        assert_eq!(log.opens, vec!["synthetic://a".to_string(), "synthetic://b".to_string()]);
        assert_eq!(log.closes, 1);

        // 下一次迭代执行内部 Seek 回到原位置
        playback.step();
        let (target, bias) = probe.snapshot().seeks[0];
        assert!((2_000..2_050).contains(&target), "Seek 目标: {}", target);
        assert_eq!(bias, SeekBias::Backward);
        let now = shared.clock.now_ms();
        assert!((2_000..2_100).contains(&now), "时钟位置: {}", now);
    }

    #[test]
    fn test_failed_seek_keeps_clock_position() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a?fail_seek=1"]);
        playback.initialize(true).unwrap();
        shared.clock.rebase(1.5);

        shared.slots.seek.request(4_000);
        assert_eq!(playback.step(), LoopControl::Continue);
        assert_eq!(shared.clock.now_ms(), 1_500);
        assert_eq!(shared.status.load(), Status::Paused);
        assert!(!shared.slots.seek.is_pending());
        assert!(!playback.awaiting_first_frame);

        // 失败的 Seek 不会被重试
        playback.step();
        assert_eq!(probe.snapshot().seeks, vec![(4_000, SeekBias::Forward)]);
        assert_eq!(shared.clock.now_ms(), 1_500);
    }

    #[test]
    fn test_failed_restore_after_quality_switch_reanchors_on_first_frame() {
        let (mut playback, shared, probe) =
            fixture(&["synthetic://a", "synthetic://b?fail_seek=1&audio=0"]);
        playback.initialize(false).unwrap();
        shared.clock.rebase(2.0);

        shared.slots.quality.request(1);
        assert_eq!(playback.step(), LoopControl::Continue);
        assert!(!playback.awaiting_first_frame);

        // 恢复位置的 Seek 失败，改为等新会话首帧锚定
        assert_eq!(playback.step(), LoopControl::Continue);
        assert_eq!(probe.snapshot().seeks.len(), 1);
        assert!(playback.awaiting_first_frame);
        assert!(playback.internal_seek.is_none());

        assert_eq!(playback.step(), LoopControl::Continue);
        assert!(!playback.awaiting_first_frame);
        let now = shared.clock.now_ms();
        assert!(now < 100, "时钟位置: {}", now);
        assert_eq!(shared.status.load(), Status::Playing);
        assert_eq!(shared.stats.snapshot().rendered, 1);
    }

    #[test]
    fn test_quality_switch_keeps_pause_state() {
        let (mut playback, shared, _) = fixture(&["synthetic://a", "synthetic://b"]);
        playback.initialize(true).unwrap();
        shared.clock.rebase(1.0);
        shared.slots.quality.request(1);
        playback.step();
        assert_eq!(shared.status.load(), Status::Paused);
        assert!(shared.clock.is_paused());
        assert_eq!(shared.clock.now_ms(), 1_000);
    }

    #[test]
    fn test_failed_quality_switch_is_session_error() {
        let (mut playback, shared, _) = fixture(&["synthetic://a", "synthetic://b?fail_open=1"]);
        playback.initialize(false).unwrap();
        shared.slots.quality.request(1);
        assert_eq!(playback.step(), LoopControl::Exit(Status::Error));
    }

    #[test]
    fn test_paused_loop_does_not_touch_decoder() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a"]);
        playback.initialize(true).unwrap();
        assert_eq!(shared.status.load(), Status::Paused);
        for _ in 0..3 {
            playback.step();
        }
        assert_eq!(probe.snapshot().units, 0);

        shared.slots.pause.request(false);
        playback.step();
        assert_eq!(shared.status.load(), Status::Playing);
        assert_eq!(probe.snapshot().units, 1);
    }

    #[test]
    fn test_backward_seek_drops_preroll_frames() {
        let (mut playback, shared, _) = fixture(&["synthetic://a?audio=0"]);
        playback.initialize(false).unwrap();
        shared.clock.rebase(5.0);
        shared.slots.seek.request(1_500);
        playback.step();

        // 关键帧 1.00s 到 1.44s 的 12 帧只解码不显示
        for _ in 0..12 {
            playback.step();
        }
        let stats = shared.stats.snapshot();
        assert_eq!((stats.rendered, stats.skipped), (0, 0));

        playback.step();
        assert_eq!(shared.stats.snapshot().rendered, 1);
    }

    #[test]
    fn test_transient_errors_are_counted_and_skipped() {
        let (mut playback, shared, _) = fixture(&["synthetic://a?corrupt_every=2"]);
        playback.initialize(false).unwrap();
        for _ in 0..4 {
            assert_eq!(playback.step(), LoopControl::Continue);
        }
        assert_eq!(shared.stats.snapshot().decode_errors, 2);
    }

    #[test]
    fn test_end_of_stream_ends_or_repeats() {
        let (mut playback, _, _) = fixture(&["synthetic://a?audio=0&duration=200"]);
        playback.initialize(false).unwrap();
        assert_eq!(run_until_exit(&mut playback, 100), Some(Status::Ended));

        let (mut playback, shared_repeat, probe) = fixture(&["synthetic://a?audio=0&duration=200"]);
        shared_repeat.repeat.store(true, Ordering::Release);
        playback.initialize(false).unwrap();
        for _ in 0..6 {
            playback.step();
        }
        assert_eq!(playback.internal_seek, Some(0));
        playback.step();
        assert_eq!(probe.snapshot().seeks, vec![(0, SeekBias::Backward)]);
        assert!(shared_repeat.clock.now_ms() < 100);
    }

    #[test]
    fn test_repeat_reopens_unseekable_source() {
        let (mut playback, shared, probe) =
            fixture(&["synthetic://a?audio=0&duration=120&seekable=0&start=7000"]);
        shared.repeat.store(true, Ordering::Release);
        playback.initialize(false).unwrap();
        for _ in 0..4 {
            playback.step();
        }
        let log = probe.snapshot();
        assert_eq!((log.opens.len(), log.closes), (2, 1));
        assert!(log.seeks.is_empty());
        assert!(playback.awaiting_first_frame);

        playback.step();
        let now = shared.clock.now_ms();
        assert!((7_000..7_100).contains(&now), "时钟位置: {}", now);
    }

    #[test]
    fn test_fault_exits_with_error_and_cleanup_closes() {
        let (mut playback, shared, probe) = fixture(&["synthetic://a?fault_at_ms=0"]);
        playback.initialize(false).unwrap();
        assert_eq!(playback.step(), LoopControl::Exit(Status::Error));
        playback.cleanup(Status::Error);
        assert_eq!(shared.status.load(), Status::Error);
        assert_eq!(probe.snapshot().closes, 1);
        assert!(shared.clock.is_paused());
    }
}
