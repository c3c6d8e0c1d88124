//! 播放同步引擎
//!
//! 单个播放线程驱动解码器，按共享时钟调度音视频帧，并通过执行器把帧投递给输出端。
//! 外部线程只通过命令槽控制播放（停止、清晰度、Seek、暂停、速率），永不阻塞。

pub mod core;
pub mod player;

pub use crate::core::{
    EngineConfig, MediaKind, PlaybackClock, PlayerError, PlayerState, QualityLevel, Result,
    SessionInfo, Status,
};
pub use crate::player::{
    AudioSink, ChannelExecutor, Decoder, DecoderFactory, Executor, InlineExecutor, MediaPlayer,
    PlaybackEngine, RenderQueue, Sinks, VideoSink,
};
