// 播放器核心模块

pub mod command;
pub mod pacing;
pub mod backpressure;
pub mod decoder_source;  // Decoder 抽象接口
pub mod sink;            // 输出端 + 执行器
pub mod session;
pub mod playback_loop;   // 播放线程状态机
pub mod engine;
pub mod synthetic;       // 测试图案解码器
pub mod still_image;     // 图片播放
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_decoder;
#[cfg(feature = "cpal-output")]
pub mod audio_output;

pub use command::{CommandSlot, CommandSlots};
pub use pacing::{PacingDecision, PacingPolicy};
pub use backpressure::BackpressureGate;
pub use decoder_source::{DecodedUnit, Decoder, DecoderFactory};
pub use sink::{AudioSink, ChannelExecutor, DiscardSink, Executor, InlineExecutor, RenderQueue, Sinks, Task, VideoSink};
pub use session::PlaybackSession;
pub use engine::{MediaPlayer, PlaybackEngine};
pub use synthetic::{ProbeLog, SyntheticDecoder, SyntheticFactory, SyntheticProbe};
pub use still_image::{StillFrame, StillImage, StillImageDecoder, StillImageFactory};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_decoder::{FfmpegDecoder, FfmpegDecoderFactory};
#[cfg(feature = "cpal-output")]
pub use audio_output::CpalAudioSink;

use std::{process, thread};

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
