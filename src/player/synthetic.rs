//! 测试图案解码器
//!
//! 地址格式：`synthetic://<名字>?fps=25&duration=10000&audio=1`，
//! 不依赖任何媒体文件即可驱动完整的播放引擎，并且可以注入各种故障。
//!
//! | 参数 | 默认值 | 说明 |
//! |------|--------|------|
//! | `fps` | 25 | 视频帧率 |
//! | `duration` | 10000 | 时长（毫秒），`live` 表示直播 |
//! | `video` / `audio` | 1 / 1 | 是否包含视频 / 音频流 |
//! | `sample_rate` / `channels` | 48000 / 2 | 音频参数 |
//! | `gop` | 1 秒的帧数 | 关键帧间隔（帧） |
//! | `start` | 0 | 首帧 PTS（毫秒） |
//! | `seekable` | 非直播为 1 | 是否支持 Seek |
//! | `fps_hint` | 1 | 是否在会话信息里给出帧率 |
//! | `width` / `height` | 64 / 36 | 画面尺寸 |
//! | `fail_open` | 0 | 打开失败 |
//! | `open_delay_ms` | 0 | 打开耗时 |
//! | `corrupt_every` | 0 | 每 N 个单元产生一次可恢复的解码错误 |
//! | `fault_at_ms` | - | 到达该时间点后解码器致命故障 |
//! | `fail_seek` | 0 | 所有 Seek 都返回错误 |

use crate::core::{
    AudioFrame, FrameUnit, PixelFormat, PlayerError, Result, SampleFormat, SeekBias, SessionInfo,
    VideoFrame,
};
use crate::player::decoder_source::{DecodedUnit, Decoder, DecoderFactory};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const SYNTHETIC_SCHEME: &str = "synthetic://";

/// 每个音频单元的采样数（每声道）
const AUDIO_CHUNK_SAMPLES: u64 = 1024;
const TONE_HZ: f32 = 440.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub name: String,
    pub fps: f64,
    pub duration_ms: Option<i64>,
    pub video: bool,
    pub audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub gop: u64,
    pub start_ms: i64,
    pub seekable: bool,
    pub fps_hint: bool,
    pub width: u32,
    pub height: u32,
    pub fail_open: bool,
    pub open_delay_ms: u64,
    pub corrupt_every: u64,
    pub fault_at_ms: Option<i64>,
    pub fail_seek: bool,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            fps: 25.0,
            duration_ms: Some(10_000),
            video: true,
            audio: true,
            sample_rate: 48_000,
            channels: 2,
            gop: 25,
            start_ms: 0,
            seekable: true,
            fps_hint: true,
            width: 64,
            height: 36,
            fail_open: false,
            open_delay_ms: 0,
            corrupt_every: 0,
            fault_at_ms: None,
            fail_seek: false,
        }
    }
}

impl SyntheticParams {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(SYNTHETIC_SCHEME)
            .ok_or_else(|| PlayerError::OpenError(format!("不是测试图案地址: {}", url)))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut params = Self { name: name.to_string(), ..Self::default() };
        let mut gop = None;
        let mut seekable = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
            match key {
                "fps" => params.fps = parse_value(key, value)?,
                "duration" => {
                    params.duration_ms = if value == "live" {
                        None
                    } else {
                        Some(parse_value(key, value)?)
                    }
                }
                "video" => params.video = parse_flag(key, value)?,
                "audio" => params.audio = parse_flag(key, value)?,
                "sample_rate" => params.sample_rate = parse_value(key, value)?,
                "channels" => params.channels = parse_value(key, value)?,
                "gop" => gop = Some(parse_value(key, value)?),
                "start" => params.start_ms = parse_value(key, value)?,
                "seekable" => seekable = Some(parse_flag(key, value)?),
                "fps_hint" => params.fps_hint = parse_flag(key, value)?,
                "width" => params.width = parse_value(key, value)?,
                "height" => params.height = parse_value(key, value)?,
                "fail_open" => params.fail_open = parse_flag(key, value)?,
                "open_delay_ms" => params.open_delay_ms = parse_value(key, value)?,
                "corrupt_every" => params.corrupt_every = parse_value(key, value)?,
                "fault_at_ms" => params.fault_at_ms = Some(parse_value(key, value)?),
                "fail_seek" => params.fail_seek = parse_flag(key, value)?,
                other => warn!("⚠️ 未知的测试图案参数: {}", other),
            }
        }

        if !(params.fps.is_finite() && params.fps > 0.0) {
            return Err(PlayerError::OpenError(format!("帧率无效: {}", params.fps)));
        }
        if params.sample_rate == 0 || params.channels == 0 {
            return Err(PlayerError::OpenError("音频参数无效".to_string()));
        }
        if params.width == 0 || params.height == 0 {
            return Err(PlayerError::OpenError("画面尺寸无效".to_string()));
        }
        params.gop = gop.unwrap_or(params.fps.round() as u64).max(1);
        params.seekable = seekable.unwrap_or(params.duration_ms.is_some());
        Ok(params)
    }

    fn frame_duration(&self) -> f64 {
        1.0 / self.fps
    }

    fn chunk_duration(&self) -> f64 {
        AUDIO_CHUNK_SAMPLES as f64 / self.sample_rate as f64
    }

    fn start(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    fn end(&self) -> Option<f64> {
        self.duration_ms.map(|d| self.start() + d as f64 / 1000.0)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PlayerError::OpenError(format!("参数 {} 的值无效: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(PlayerError::OpenError(format!("参数 {} 的值无效: {}", key, value))),
    }
}

/// 记录解码器生命周期事件，供测试断言
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProbeLog {
    pub opens: Vec<String>,
    pub seeks: Vec<(i64, SeekBias)>,
    pub flushes: usize,
    pub closes: usize,
    pub units: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticProbe {
    inner: Arc<Mutex<ProbeLog>>,
}

impl SyntheticProbe {
    pub fn snapshot(&self) -> ProbeLog {
        self.inner.lock().clone()
    }

    fn record(&self, f: impl FnOnce(&mut ProbeLog)) {
        f(&mut self.inner.lock());
    }
}

/// 测试图案解码器：按 PTS 交错产出视频帧和音频块
pub struct SyntheticDecoder {
    probe: SyntheticProbe,
    params: Option<SyntheticParams>,
    next_video: u64,
    next_audio: u64,
    units: u64,
}

impl SyntheticDecoder {
    pub fn new(probe: SyntheticProbe) -> Self {
        Self { probe, params: None, next_video: 0, next_audio: 0, units: 0 }
    }

    fn params(&self) -> Result<&SyntheticParams> {
        self.params
            .as_ref()
            .ok_or_else(|| PlayerError::DecoderFault("解码器尚未打开".to_string()))
    }

    fn video_pts(params: &SyntheticParams, index: u64) -> f64 {
        params.start() + index as f64 * params.frame_duration()
    }

    fn audio_pts(params: &SyntheticParams, index: u64) -> f64 {
        params.start() + index as f64 * params.chunk_duration()
    }

    fn render_video(params: &SyntheticParams, index: u64) -> VideoFrame {
        let (width, height) = (params.width as usize, params.height as usize);
        let mut data = vec![0u8; width * height * 4];
        let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut data);
        // 背景色随帧号渐变，一条白色竖线从左向右移动
        let shade = (index % 256) as u8;
        let bar = (index as usize) % width;
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = if i % width == bar {
                [255, 255, 255, 255]
            } else {
                [shade, 64, 255 - shade, 255]
            };
        }
        VideoFrame {
            width: params.width,
            height: params.height,
            stride: width * 4,
            format: PixelFormat::RGBA,
            duration: params.frame_duration(),
            data,
        }
    }

    fn render_audio(params: &SyntheticParams, index: u64) -> AudioFrame {
        let channels = params.channels as usize;
        let first = index * AUDIO_CHUNK_SAMPLES;
        let mut data = Vec::with_capacity(AUDIO_CHUNK_SAMPLES as usize * channels);
        for n in 0..AUDIO_CHUNK_SAMPLES {
            let t = (first + n) as f32 / params.sample_rate as f32;
            let sample = (t * TONE_HZ * std::f32::consts::TAU).sin() * 0.2;
            data.extend(std::iter::repeat(sample).take(channels));
        }
        AudioFrame {
            sample_rate: params.sample_rate,
            channels: params.channels,
            format: SampleFormat::F32,
            data,
        }
    }
}

impl Decoder for SyntheticDecoder {
    fn open(&mut self, url: &str) -> Result<SessionInfo> {
        self.probe.record(|log| log.opens.push(url.to_string()));
        let params = SyntheticParams::parse(url)?;

        if params.open_delay_ms > 0 {
            thread::sleep(Duration::from_millis(params.open_delay_ms));
        }
        if params.fail_open {
            return Err(PlayerError::OpenError(format!("无法连接: {}", url)));
        }

        let mut info = match params.duration_ms {
            Some(duration) => SessionInfo::finite(duration),
            None => SessionInfo::live(),
        }
        .with_seekable(params.seekable);
        if params.video {
            info = info.with_video(params.fps_hint.then_some(params.fps));
        }
        if params.audio {
            info = info.with_audio();
        }

        self.next_video = 0;
        self.next_audio = 0;
        self.units = 0;
        self.params = Some(params);
        Ok(info)
    }

    fn next_unit(&mut self) -> Result<DecodedUnit> {
        let params = self.params()?.clone();
        let end = params.end();
        let due = |pts: f64| end.map(|end| pts < end - 1e-9).unwrap_or(true);

        let video = params
            .video
            .then(|| Self::video_pts(&params, self.next_video))
            .filter(|pts| due(*pts));
        let audio = params
            .audio
            .then(|| Self::audio_pts(&params, self.next_audio))
            .filter(|pts| due(*pts));

        let take_video = match (video, audio) {
            (None, None) => return Ok(DecodedUnit::EndOfStream),
            (Some(v), Some(a)) => v <= a,
            (Some(_), None) => true,
            (None, Some(_)) => false,
        };
        let pts = (if take_video { video } else { audio }).unwrap_or_default();

        if let Some(fault) = params.fault_at_ms {
            if pts * 1000.0 >= fault as f64 {
                return Err(PlayerError::DecoderFault(format!("模拟解码器故障 @{}ms", fault)));
            }
        }

        self.units += 1;
        self.probe.record(|log| log.units += 1);

        let unit = if take_video {
            let index = self.next_video;
            self.next_video += 1;
            FrameUnit::video(pts, Self::render_video(&params, index))
        } else {
            let index = self.next_audio;
            self.next_audio += 1;
            FrameUnit::audio(pts, Self::render_audio(&params, index))
        };

        if params.corrupt_every > 0 && self.units % params.corrupt_every == 0 {
            return Err(PlayerError::DecodeError(format!("模拟损坏数据包 @{:.3}s", pts)));
        }
        Ok(DecodedUnit::Frames(vec![unit]))
    }

    fn seek(&mut self, target_ms: i64, bias: SeekBias) -> Result<()> {
        self.probe.record(|log| log.seeks.push((target_ms, bias)));
        let params = self.params()?.clone();
        if !params.seekable {
            return Err(PlayerError::SeekError("直播流不支持 Seek".to_string()));
        }
        if params.fail_seek {
            return Err(PlayerError::SeekError(format!("模拟 Seek 失败 @{}ms", target_ms)));
        }

        let relative = (target_ms - params.start_ms).max(0) as f64 / 1000.0;
        let video_index = if params.video {
            let frame = (relative / params.frame_duration() + 1e-9).floor() as u64;
            let before = frame / params.gop * params.gop;
            let after = frame.div_ceil(params.gop) * params.gop;
            let after_due = params
                .end()
                .map(|end| Self::video_pts(&params, after) < end)
                .unwrap_or(true);
            if bias == SeekBias::Forward && after_due {
                after
            } else {
                before
            }
        } else {
            0
        };

        // 音频从落点（关键帧位置或目标位置）开始
        let landing = if params.video {
            video_index as f64 * params.frame_duration()
        } else {
            relative
        };
        self.next_video = video_index;
        self.next_audio = (landing / params.chunk_duration()).floor() as u64;
        debug!(
            "🎯 测试图案 Seek: 目标={}ms, 落点={:.3}s ({:?})",
            target_ms,
            params.start() + landing,
            bias
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.probe.record(|log| log.flushes += 1);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.probe.record(|log| log.closes += 1);
        self.params = None;
        Ok(())
    }

    fn description(&self) -> String {
        match &self.params {
            Some(p) => format!("synthetic:{} {}x{}@{}fps", p.name, p.width, p.height, p.fps),
            None => "synthetic (closed)".to_string(),
        }
    }
}

/// 每次会话创建一个新的测试图案解码器，共享同一个探针
#[derive(Debug, Clone, Default)]
pub struct SyntheticFactory {
    probe: SyntheticProbe,
}

impl SyntheticFactory {
    pub fn new(probe: SyntheticProbe) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> &SyntheticProbe {
        &self.probe
    }
}

impl DecoderFactory for SyntheticFactory {
    fn create(&self) -> Box<dyn Decoder> {
        Box::new(SyntheticDecoder::new(self.probe.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaKind;

    fn open(url: &str) -> (SyntheticDecoder, SessionInfo, SyntheticProbe) {
        let probe = SyntheticProbe::default();
        let mut decoder = SyntheticDecoder::new(probe.clone());
        let info = decoder.open(url).unwrap();
        (decoder, info, probe)
    }

    fn drain(decoder: &mut SyntheticDecoder) -> Vec<FrameUnit> {
        let mut units = Vec::new();
        loop {
            match decoder.next_unit().unwrap() {
                DecodedUnit::Frames(frames) => units.extend(frames),
                DecodedUnit::EndOfStream => return units,
            }
        }
    }

    #[test]
    fn test_parse_defaults_and_live() {
        let params = SyntheticParams::parse("synthetic://clip").unwrap();
        assert_eq!(params.name, "clip");
        assert_eq!(params.duration_ms, Some(10_000));
        assert!(params.seekable);
        assert_eq!(params.gop, 25);

        let live = SyntheticParams::parse("synthetic://cam?duration=live&fps=30").unwrap();
        assert_eq!(live.duration_ms, None);
        assert!(!live.seekable);
        assert_eq!(live.gop, 30);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(SyntheticParams::parse("file:///a.mp4").is_err());
        assert!(SyntheticParams::parse("synthetic://a?fps=0").is_err());
        assert!(SyntheticParams::parse("synthetic://a?audio=maybe").is_err());
    }

    #[test]
    fn test_session_info_reflects_streams() {
        let (_, info, probe) = open("synthetic://a?audio=0&fps_hint=0&duration=2000");
        assert_eq!(info.duration_ms, Some(2000));
        assert!(info.has_video && !info.has_audio);
        assert_eq!(info.frame_rate_hint, None);
        assert_eq!(probe.snapshot().opens.len(), 1);
    }

    #[test]
    fn test_units_are_interleaved_by_pts() {
        let (mut decoder, _, _) = open("synthetic://a?duration=1000");
        let units = drain(&mut decoder);
        let video = units.iter().filter(|u| u.kind() == MediaKind::Video).count();
        let audio = units.iter().filter(|u| u.kind() == MediaKind::Audio).count();
        assert_eq!(video, 25);
        assert_eq!(audio, 47);
        assert!(units.windows(2).all(|w| w[0].pts <= w[1].pts));
        assert!(units.iter().all(|u| u.pts < 1.0));
    }

    #[test]
    fn test_video_frame_layout() {
        let (mut decoder, _, _) = open("synthetic://a?audio=0&width=8&height=4");
        let DecodedUnit::Frames(frames) = decoder.next_unit().unwrap() else {
            panic!("应该产出帧");
        };
        let crate::core::FramePayload::Video(frame) = &frames[0].payload else {
            panic!("应该是视频帧");
        };
        assert_eq!(frame.stride, 32);
        assert_eq!(frame.data.len(), 8 * 4 * 4);
        assert_eq!(&frame.data[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_seek_lands_on_keyframes() {
        let (mut decoder, _, probe) = open("synthetic://a?audio=0&gop=10");
        decoder.seek(1_000, SeekBias::Backward).unwrap();
        let DecodedUnit::Frames(frames) = decoder.next_unit().unwrap() else {
            panic!("应该产出帧");
        };
        assert!((frames[0].pts - 0.8).abs() < 1e-9);

        decoder.seek(1_000, SeekBias::Forward).unwrap();
        let DecodedUnit::Frames(frames) = decoder.next_unit().unwrap() else {
            panic!("应该产出帧");
        };
        assert!((frames[0].pts - 1.2).abs() < 1e-9);
        assert_eq!(
            probe.snapshot().seeks,
            vec![(1_000, SeekBias::Backward), (1_000, SeekBias::Forward)]
        );
    }

    #[test]
    fn test_live_source_refuses_seek_and_never_ends() {
        let (mut decoder, info, _) = open("synthetic://cam?duration=live&fps=50");
        assert!(info.is_live());
        assert!(decoder.seek(0, SeekBias::Backward).is_err());
        for _ in 0..500 {
            assert!(matches!(decoder.next_unit().unwrap(), DecodedUnit::Frames(_)));
        }
    }

    #[test]
    fn test_fault_injection() {
        let (mut decoder, _, _) = open("synthetic://a?audio=0&corrupt_every=3");
        let results: Vec<_> = (0..6).map(|_| decoder.next_unit()).collect();
        let transient = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_transient()))
            .count();
        assert_eq!(transient, 2);

        let (mut decoder, _, _) = open("synthetic://a?audio=0&fault_at_ms=100");
        let mut outcome = Ok(DecodedUnit::EndOfStream);
        for _ in 0..10 {
            outcome = decoder.next_unit();
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(PlayerError::DecoderFault(_))));
    }

    #[test]
    fn test_fail_open_and_closed_decoder() {
        let probe = SyntheticProbe::default();
        let mut decoder = SyntheticDecoder::new(probe);
        assert!(matches!(
            decoder.open("synthetic://a?fail_open=1"),
            Err(PlayerError::OpenError(_))
        ));
        assert!(matches!(decoder.next_unit(), Err(PlayerError::DecoderFault(_))));
    }
}
