use crate::core::{
    AudioFrame, FrameUnit, PixelFormat, PlayerError, Result, SampleFormat, SeekBias, SessionInfo,
    VideoFrame,
};
use crate::player::decoder_source::{DecodedUnit, Decoder, DecoderFactory};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};

/// 解码输出的音频统一为 48kHz 立体声 packed f32
const TARGET_SAMPLE_RATE: u32 = 48000;
const TARGET_CHANNELS: u16 = 2;

fn is_network_url(url: &str) -> bool {
    url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("rtsp://")
        || url.starts_with("rtmp://")
        || url.contains(".m3u8")
}

fn rational_to_f64(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

struct VideoTrack {
    index: usize,
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    time_base: f64,
    frame_duration: f64,
}

struct AudioTrack {
    index: usize,
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
}

struct OpenedInput {
    input: format::context::Input,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    draining: bool,
    finished: bool,
}

/// FFmpeg 解封装 + 软件解码
///
/// 每次 `next_unit` 读取一个数据包并解码，视频转换为 RGBA，音频重采样为 packed f32。
pub struct FfmpegDecoder {
    url: String,
    opened: Option<OpenedInput>,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self { url: String::new(), opened: None }
    }

    fn open_input(url: &str) -> Result<format::context::Input> {
        if !is_network_url(url) {
            return format::input(&url)
                .map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)));
        }

        info!("🌐 检测到网络流，应用网络选项");
        let mut options = ffmpeg::Dictionary::new();
        options.set("fflags", "+discardcorrupt+genpts");
        options.set("analyzeduration", "5000000");
        options.set("probesize", "10000000");
        options.set("timeout", "15000000");
        options.set("rw_timeout", "8000000");
        options.set("reconnect", "1");
        options.set("reconnect_streamed", "1");
        options.set("reconnect_delay_max", "4");
        if url.contains(".m3u8") {
            options.set("live_start_index", "-1");
            options.set("http_persistent", "1");
        }
        format::input_with_dictionary(&url, options)
            .map_err(|e| PlayerError::OpenError(format!("无法打开网络流: {}", e)))
    }

    fn video_track(stream: &format::stream::Stream) -> Result<VideoTrack> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;
        let fps = rational_to_f64(stream.avg_frame_rate());
        debug!(
            "视频解码器: {}x{}, 格式: {:?}, 帧率: {:.3}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            fps
        );
        Ok(VideoTrack {
            index: stream.index(),
            decoder,
            scaler: None,
            time_base: rational_to_f64(stream.time_base()),
            frame_duration: if fps > 0.0 { 1.0 / fps } else { 0.0 },
        })
    }

    fn audio_track(stream: &format::stream::Stream) -> Result<AudioTrack> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;
        debug!(
            "音频解码器: {} Hz, {} 声道 → {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            TARGET_SAMPLE_RATE,
            TARGET_CHANNELS
        );
        Ok(AudioTrack {
            index: stream.index(),
            decoder,
            resampler: None,
            time_base: rational_to_f64(stream.time_base()),
        })
    }

    fn opened(&mut self) -> Result<&mut OpenedInput> {
        self.opened
            .as_mut()
            .ok_or_else(|| PlayerError::DecoderFault("解码器尚未打开".to_string()))
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoTrack {
    fn receive(&mut self, out: &mut Vec<FrameUnit>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => out.push(self.convert(&decoded)?),
                Err(e) if is_again(&e) => return Ok(()),
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(format!("视频帧解码失败: {}", e))),
            }
        }
    }

    fn convert(&mut self, frame: &util::frame::Video) -> Result<FrameUnit> {
        let (width, height) = (frame.width(), frame.height());
        let rebuild = self
            .scaler
            .as_ref()
            .map(|s| s.input().width != width || s.input().height != height || s.input().format != frame.format())
            .unwrap_or(true);
        if rebuild {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }

        let mut rgba = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba)?;
        }

        // 去掉行尾填充，复制到连续内存
        let row = width as usize * 4;
        let stride = rgba.stride(0);
        let src = rgba.data(0);
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&src[y * stride..y * stride + row]);
        }

        let pts = frame.timestamp().unwrap_or(0) as f64 * self.time_base;
        Ok(FrameUnit::video(
            pts,
            VideoFrame {
                width,
                height,
                stride: row,
                format: PixelFormat::RGBA,
                duration: self.frame_duration,
                data,
            },
        ))
    }
}

impl AudioTrack {
    fn receive(&mut self, out: &mut Vec<FrameUnit>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => out.push(self.convert(&decoded)?),
                Err(e) if is_again(&e) => return Ok(()),
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(format!("音频帧解码失败: {}", e))),
            }
        }
    }

    fn convert(&mut self, frame: &util::frame::Audio) -> Result<FrameUnit> {
        if self.resampler.is_none() {
            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                util::channel_layout::ChannelLayout::STEREO,
                TARGET_SAMPLE_RATE,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        let len = resampled.samples() * TARGET_CHANNELS as usize * std::mem::size_of::<f32>();
        let bytes = &resampled.data(0)[..len];
        let data: Vec<f32> = bytes
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        let pts = frame.timestamp().unwrap_or(0) as f64 * self.time_base;
        Ok(FrameUnit::audio(
            pts,
            AudioFrame {
                sample_rate: TARGET_SAMPLE_RATE,
                channels: TARGET_CHANNELS,
                format: SampleFormat::F32,
                data,
            },
        ))
    }
}

impl Decoder for FfmpegDecoder {
    fn open(&mut self, url: &str) -> Result<SessionInfo> {
        ffmpeg::init()?;
        info!("📂 正在打开: {}", url);
        let input = Self::open_input(url)?;

        let video = match input.streams().best(media::Type::Video) {
            Some(stream) => Some(Self::video_track(&stream)?),
            None => None,
        };
        let audio = match input.streams().best(media::Type::Audio) {
            Some(stream) => match Self::audio_track(&stream) {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("⚠️ 音频解码器创建失败，继续播放（无声音）: {}", e);
                    None
                }
            },
            None => None,
        };

        let duration_us = input.duration();
        let live = duration_us <= 0 || (is_network_url(url) && url.contains(".m3u8"));
        let mut info = if live {
            SessionInfo::live()
        } else {
            SessionInfo::finite(duration_us / 1000)
        };
        if let Some(track) = &video {
            let fps = (track.frame_duration > 0.0).then(|| 1.0 / track.frame_duration);
            info = info.with_video(fps);
        }
        if audio.is_some() {
            info = info.with_audio();
        }

        self.url = url.to_string();
        self.opened = Some(OpenedInput { input, video, audio, draining: false, finished: false });
        Ok(info)
    }

    fn next_unit(&mut self) -> Result<DecodedUnit> {
        let opened = self.opened()?;
        if opened.finished {
            return Ok(DecodedUnit::EndOfStream);
        }

        let mut frames = Vec::new();
        if opened.draining {
            // 读完所有数据包后取出解码器里缓冲的帧
            if let Some(track) = opened.video.as_mut() {
                track.decoder.send_eof()?;
                track.receive(&mut frames)?;
            }
            if let Some(track) = opened.audio.as_mut() {
                track.decoder.send_eof()?;
                track.receive(&mut frames)?;
            }
            opened.finished = true;
            return Ok(DecodedUnit::Frames(frames));
        }

        let Some((stream, packet)) = opened.input.packets().next() else {
            debug!("文件读取完毕，开始排空解码器");
            opened.draining = true;
            return Ok(DecodedUnit::Frames(frames));
        };
        let index = stream.index();

        if let Some(track) = opened.video.as_mut().filter(|t| t.index == index) {
            match track.decoder.send_packet(&packet) {
                Ok(()) => track.receive(&mut frames)?,
                Err(e) if is_again(&e) => {}
                Err(e) => return Err(PlayerError::DecodeError(format!("视频包解码失败: {}", e))),
            }
        } else if let Some(track) = opened.audio.as_mut().filter(|t| t.index == index) {
            match track.decoder.send_packet(&packet) {
                Ok(()) => track.receive(&mut frames)?,
                Err(e) if is_again(&e) => {}
                Err(e) => return Err(PlayerError::DecodeError(format!("音频包解码失败: {}", e))),
            }
        }
        Ok(DecodedUnit::Frames(frames))
    }

    fn seek(&mut self, target_ms: i64, bias: SeekBias) -> Result<()> {
        let opened = self.opened()?;
        let ts = target_ms.saturating_mul(1000);
        let result = match bias {
            SeekBias::Backward => opened.input.seek(ts, ..ts),
            SeekBias::Forward => opened.input.seek(ts, ts..),
        };
        result.map_err(|e| PlayerError::SeekError(format!("{}ms: {}", target_ms, e)))?;
        opened.draining = false;
        opened.finished = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let opened = self.opened()?;
        if let Some(track) = opened.video.as_mut() {
            track.decoder.flush();
        }
        if let Some(track) = opened.audio.as_mut() {
            track.decoder.flush();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.opened.take().is_some() {
            debug!("关闭 FFmpeg 输入: {}", self.url);
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("ffmpeg:{}", self.url)
    }
}

/// 为每个会话创建新的 FFmpeg 解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegDecoderFactory;

impl DecoderFactory for FfmpegDecoderFactory {
    fn create(&self) -> Box<dyn Decoder> {
        Box::new(FfmpegDecoder::new())
    }
}
