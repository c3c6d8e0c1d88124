use crate::core::config::DEFAULT_MAX_WAIT_MS;
use crate::core::{FrameUnit, PixelFormat, PlayerError, Result, SeekBias, SessionInfo, VideoFrame};
use crate::player::decoder_source::{DecodedUnit, Decoder, DecoderFactory};
use log::debug;
use std::sync::Arc;

/// 静态图片 / 动图的一帧
#[derive(Debug, Clone)]
pub struct StillFrame {
    pub rgba: Vec<u8>,
    pub delay_ms: u64,
}

/// 预先解码好的图片：所有帧尺寸相同，每帧附带显示时长
#[derive(Debug, Clone)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<StillFrame>,
}

impl StillImage {
    /// 纯色帧序列，`frames` 为 (RGBA 颜色, 显示时长毫秒)
    pub fn solid(width: u32, height: u32, frames: &[([u8; 4], u64)]) -> Self {
        let pixels = width as usize * height as usize;
        let frames = frames
            .iter()
            .map(|(color, delay_ms)| StillFrame {
                rgba: color.repeat(pixels),
                delay_ms: *delay_ms,
            })
            .collect();
        Self { width, height, frames }
    }

    fn validate(&self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(PlayerError::OpenError("图片没有任何帧".to_string()));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if expected == 0 {
            return Err(PlayerError::OpenError("图片尺寸无效".to_string()));
        }
        if let Some((i, _)) = self.frames.iter().enumerate().find(|(_, f)| f.rgba.len() != expected) {
            return Err(PlayerError::OpenError(format!("第 {} 帧数据长度不匹配", i)));
        }
        if self.frames.iter().any(|f| f.delay_ms == 0) {
            return Err(PlayerError::OpenError("帧显示时长不能为 0".to_string()));
        }
        Ok(())
    }
}

/// 单个输出单元的最长时长，不超过播放线程单次等待上限，长时间停留的帧会被重复送出
const SEGMENT_MS: u64 = DEFAULT_MAX_WAIT_MS;

/// 一个输出单元：某一帧在 [start_ms, start_ms + duration_ms) 内的一段
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    frame: usize,
    start_ms: i64,
    duration_ms: u64,
}

/// 图片播放：把帧时长表当成一条有限、可 Seek 的纯视频流
pub struct StillImageDecoder {
    image: Arc<StillImage>,
    segments: Vec<Segment>,
    cursor: usize,
    opened: bool,
}

impl StillImageDecoder {
    pub fn new(image: Arc<StillImage>) -> Self {
        Self { image, segments: Vec::new(), cursor: 0, opened: false }
    }

    fn build_segments(image: &StillImage) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut start = 0i64;
        for (frame, f) in image.frames.iter().enumerate() {
            let mut left = f.delay_ms;
            while left > 0 {
                let duration_ms = left.min(SEGMENT_MS);
                segments.push(Segment { frame, start_ms: start, duration_ms });
                start += duration_ms as i64;
                left -= duration_ms;
            }
        }
        segments
    }

    fn total_ms(&self) -> i64 {
        self.image.frames.iter().map(|f| f.delay_ms as i64).sum()
    }
}

impl Decoder for StillImageDecoder {
    fn open(&mut self, url: &str) -> Result<SessionInfo> {
        self.image.validate()?;

        self.segments = Self::build_segments(&self.image);
        self.cursor = 0;
        self.opened = true;

        let total = self.total_ms();
        let fps = self.segments.len() as f64 * 1000.0 / total as f64;
        debug!(
            "🖼️ 打开图片 {}: {} 帧 ({} 段), 共 {}ms",
            url,
            self.image.frames.len(),
            self.segments.len(),
            total
        );
        Ok(SessionInfo::finite(total).with_video(Some(fps)))
    }

    fn next_unit(&mut self) -> Result<DecodedUnit> {
        if !self.opened {
            return Err(PlayerError::DecoderFault("图片尚未打开".to_string()));
        }
        let Some(segment) = self.segments.get(self.cursor).copied() else {
            return Ok(DecodedUnit::EndOfStream);
        };
        self.cursor += 1;

        let video = VideoFrame {
            width: self.image.width,
            height: self.image.height,
            stride: self.image.width as usize * 4,
            format: PixelFormat::RGBA,
            duration: segment.duration_ms as f64 / 1000.0,
            data: self.image.frames[segment.frame].rgba.clone(),
        };
        let pts = segment.start_ms as f64 / 1000.0;
        Ok(DecodedUnit::Frames(vec![FrameUnit::video(pts, video)]))
    }

    /// 定位到覆盖目标时间的那一段（每段都是关键帧，方向无关）
    fn seek(&mut self, target_ms: i64, _bias: SeekBias) -> Result<()> {
        if !self.opened {
            return Err(PlayerError::SeekError("图片尚未打开".to_string()));
        }
        self.cursor = self
            .segments
            .iter()
            .rposition(|s| s.start_ms <= target_ms.max(0))
            .unwrap_or(0);
        if target_ms >= self.total_ms() {
            self.cursor = self.segments.len();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn description(&self) -> String {
        format!(
            "still-image {}x{} ({} 帧)",
            self.image.width,
            self.image.height,
            self.image.frames.len()
        )
    }
}

/// 每次会话共享同一份已解码的图片
#[derive(Debug, Clone)]
pub struct StillImageFactory {
    image: Arc<StillImage>,
}

impl StillImageFactory {
    pub fn new(image: StillImage) -> Self {
        Self { image: Arc::new(image) }
    }
}

impl DecoderFactory for StillImageFactory {
    fn create(&self) -> Box<dyn Decoder> {
        Box::new(StillImageDecoder::new(self.image.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Arc<StillImage> {
        Arc::new(StillImage::solid(
            2,
            2,
            &[([255, 0, 0, 255], 100), ([0, 255, 0, 255], 300), ([0, 0, 255, 255], 100)],
        ))
    }

    fn pts_of(unit: DecodedUnit) -> f64 {
        timing_of(unit).0
    }

    /// (pts, 时长, 首像素颜色)
    fn timing_of(unit: DecodedUnit) -> (f64, f64, [u8; 4]) {
        let DecodedUnit::Frames(frames) = unit else {
            panic!("不应结束");
        };
        let crate::core::FramePayload::Video(frame) = &frames[0].payload else {
            panic!("应该是视频帧");
        };
        let mut color = [0u8; 4];
        color.copy_from_slice(&frame.data[0..4]);
        (frames[0].pts, frame.duration, color)
    }

    #[test]
    fn test_frames_follow_delay_table() {
        let mut decoder = StillImageDecoder::new(image());
        let info = decoder.open("image://a").unwrap();
        assert_eq!(info.duration_ms, Some(500));
        assert!(info.seekable && info.has_video && !info.has_audio);
        assert_eq!(info.frame_rate_hint, Some(6.0));

        let starts: Vec<f64> = (0..3).map(|_| pts_of(decoder.next_unit().unwrap())).collect();
        assert_eq!(starts, vec![0.0, 0.1, 0.4]);
        assert!(matches!(decoder.next_unit().unwrap(), DecodedUnit::EndOfStream));
    }

    #[test]
    fn test_seek_picks_covering_frame() {
        let mut decoder = StillImageDecoder::new(image());
        decoder.open("image://a").unwrap();
        decoder.seek(250, SeekBias::Forward).unwrap();
        assert_eq!(pts_of(decoder.next_unit().unwrap()), 0.1);
        decoder.seek(0, SeekBias::Backward).unwrap();
        assert_eq!(pts_of(decoder.next_unit().unwrap()), 0.0);
        decoder.seek(500, SeekBias::Backward).unwrap();
        assert!(matches!(decoder.next_unit().unwrap(), DecodedUnit::EndOfStream));
    }

    #[test]
    fn test_rejects_malformed_image() {
        let mut broken = StillImage::solid(2, 2, &[([0, 0, 0, 255], 100)]);
        broken.frames[0].rgba.pop();
        let mut decoder = StillImageDecoder::new(Arc::new(broken));
        assert!(matches!(decoder.open("image://x"), Err(PlayerError::OpenError(_))));

        let empty = StillImage { width: 2, height: 2, frames: Vec::new() };
        let mut decoder = StillImageDecoder::new(Arc::new(empty));
        assert!(decoder.open("image://x").is_err());
    }

    #[test]
    fn test_long_frames_are_split_into_segments() {
        let red = [255, 0, 0, 255];
        let green = [0, 255, 0, 255];
        let image = StillImage::solid(1, 1, &[(red, 2500), (green, 100)]);
        let mut decoder = StillImageDecoder::new(Arc::new(image));
        let info = decoder.open("image://long").unwrap();
        assert_eq!(info.duration_ms, Some(2600));
        assert_eq!(info.frame_rate_hint, Some(4.0 * 1000.0 / 2600.0));

        let units: Vec<_> = (0..4).map(|_| timing_of(decoder.next_unit().unwrap())).collect();
        assert_eq!(
            units,
            vec![(0.0, 1.0, red), (1.0, 1.0, red), (2.0, 0.5, red), (2.5, 0.1, green)]
        );
        assert!(matches!(decoder.next_unit().unwrap(), DecodedUnit::EndOfStream));

        // 落在长帧中间的 Seek 从覆盖目标的那一段开始，颜色不变
        decoder.seek(1_800, SeekBias::Forward).unwrap();
        assert_eq!(timing_of(decoder.next_unit().unwrap()), (1.0, 1.0, red));
    }
}
