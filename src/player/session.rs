use crate::core::{PlayerError, QualityLevel, Result, SessionInfo};
use crate::player::decoder_source::{Decoder, DecoderFactory};
use crate::player::log_ctx;
use log::{info, warn};

/// 一次解码会话：从打开某档清晰度的地址到关闭
///
/// 会话由播放线程独占。`teardown` 或 Drop 时保证解码器被关闭且只关闭一次。
pub struct PlaybackSession {
    decoder: Box<dyn Decoder>,
    info: SessionInfo,
    label: String,
    closed: bool,
}

impl PlaybackSession {
    /// 创建解码器并打开指定清晰度
    pub fn open(factory: &dyn DecoderFactory, quality: &QualityLevel) -> Result<Self> {
        info!("{} 📂 打开媒体源 [{}]: {}", log_ctx(), quality.label, quality.url);
        let mut decoder = factory.create();

        let info = match decoder.open(&quality.url) {
            Ok(info) => info,
            Err(e) => {
                if let Err(close_err) = decoder.close() {
                    warn!("{} ⚠️ 打开失败后关闭解码器出错: {}", log_ctx(), close_err);
                }
                return Err(e);
            }
        };

        if !info.has_video && !info.has_audio {
            if let Err(close_err) = decoder.close() {
                warn!("{} ⚠️ 关闭解码器出错: {}", log_ctx(), close_err);
            }
            return Err(PlayerError::NoDecodableStreams);
        }

        info!(
            "{} ✅ 媒体源已打开 ({}): 时长={:?}ms, 可Seek={}, 视频={}, 音频={}, 帧率={:?}",
            log_ctx(),
            decoder.description(),
            info.duration_ms,
            info.seekable,
            info.has_video,
            info.has_audio,
            info.frame_rate_hint
        );

        Ok(Self { decoder, info, label: quality.label.clone(), closed: false })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn decoder(&mut self) -> &mut dyn Decoder {
        self.decoder.as_mut()
    }

    /// 关闭会话；关闭出错只记录日志
    pub fn teardown(mut self) {
        self.close_decoder();
    }

    fn close_decoder(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.decoder.close() {
            Ok(()) => info!("{} 🔒 会话 [{}] 已关闭", log_ctx(), self.label),
            Err(e) => warn!("{} ⚠️ 关闭会话 [{}] 出错: {}", log_ctx(), self.label, e),
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close_decoder();
    }
}
