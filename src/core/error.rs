use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开媒体源: {0}")]
    OpenError(String),

    #[error("找不到可解码的音视频流")]
    NoDecodableStreams,

    /// 单个数据单元解码失败（可恢复：跳过该单元继续播放）
    #[error("解码错误: {0}")]
    DecodeError(String),

    /// 解码器致命故障（会话级错误）
    #[error("解码器故障: {0}")]
    DecoderFault(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("当前媒体源不支持 Seek")]
    NotSeekable,

    #[error("播放速率超出范围 (0, 4]: {0}")]
    InvalidSpeed(f32),

    #[error("清晰度索引越界: {index}（共 {available} 档）")]
    InvalidQuality { index: usize, available: usize },

    #[error("播放线程已在运行")]
    AlreadyRunning,

    #[error("输出错误: {0}")]
    SinkError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置无效: {0}")]
    ConfigError(String),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 是否为可恢复的单元级错误（记录日志后跳过，不终止会话）
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayerError::DecodeError(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_decode_errors_are_transient() {
        assert!(PlayerError::DecodeError("bad packet".into()).is_transient());
        assert!(!PlayerError::DecoderFault("device lost".into()).is_transient());
        assert!(!PlayerError::OpenError("404".into()).is_transient());
        assert!(!PlayerError::NoDecodableStreams.is_transient());
    }
}
