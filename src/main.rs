use anyhow::{Context, Result};
use log::info;
use myy_playback::core::{EngineConfig, QualityLevel, SampleFormat};
use myy_playback::player::{
    AudioSink, ChannelExecutor, DecoderFactory, MediaPlayer, PlaybackEngine, RenderQueue, Sinks,
    SyntheticFactory, SyntheticProbe, VideoSink,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 只统计帧数的视频输出（演示用，代替 GPU 纹理上传）
#[derive(Default)]
struct CountingVideoSink {
    frames: u64,
}

impl VideoSink for CountingVideoSink {
    fn upload(
        &mut self,
        _buffer: &[u8],
        width: u32,
        height: u32,
        _stride_bytes: usize,
        is_first_frame: bool,
    ) -> myy_playback::Result<()> {
        self.frames += 1;
        if is_first_frame {
            info!("🖼️ 首帧 {}x{}", width, height);
        } else if self.frames % 100 == 0 {
            info!("🖼️ 已上传 {} 帧", self.frames);
        }
        Ok(())
    }
}

#[derive(Default)]
struct CountingAudioSink {
    samples: u64,
}

impl AudioSink for CountingAudioSink {
    fn enqueue(&mut self, buffer: &[f32], _: u32, _: u16, _: SampleFormat) -> myy_playback::Result<()> {
        self.samples += buffer.len() as u64;
        Ok(())
    }
}

/// `--ffmpeg <url>` 时使用 FFmpeg 解码（需启用 ffmpeg feature），否则播放测试图案
fn source(args: &[String]) -> Result<(Arc<dyn DecoderFactory>, Vec<QualityLevel>)> {
    if let Some(pos) = args.iter().position(|a| a == "--ffmpeg") {
        let url = args.get(pos + 1).context("--ffmpeg 需要一个 URL")?;
        return ffmpeg_source(url);
    }
    let factory: Arc<dyn DecoderFactory> = Arc::new(SyntheticFactory::new(SyntheticProbe::default()));
    Ok((
        factory,
        vec![
            QualityLevel::new("720p", "synthetic://demo?fps=30&duration=20000&width=128&height=72"),
            QualityLevel::new("360p", "synthetic://demo?fps=30&duration=20000&width=64&height=36"),
        ],
    ))
}

#[cfg(feature = "ffmpeg")]
fn ffmpeg_source(url: &str) -> Result<(Arc<dyn DecoderFactory>, Vec<QualityLevel>)> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");
    let factory: Arc<dyn DecoderFactory> = Arc::new(myy_playback::player::FfmpegDecoderFactory);
    Ok((factory, vec![QualityLevel::new("source", url)]))
}

#[cfg(not(feature = "ffmpeg"))]
fn ffmpeg_source(_url: &str) -> Result<(Arc<dyn DecoderFactory>, Vec<QualityLevel>)> {
    anyhow::bail!("未启用 ffmpeg feature")
}

/// 在当前线程（充当渲染线程）上执行输出任务一段时间
fn pump(queue: &RenderQueue, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        queue.run_for(Duration::from_millis(10));
    }
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playback 演示启动");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.iter().position(|a| a == "--config") {
        Some(pos) => {
            let path = args.get(pos + 1).context("--config 需要一个文件路径")?;
            EngineConfig::from_file(path).with_context(|| format!("读取配置失败: {}", path))?
        }
        None => EngineConfig::default(),
    };

    let (factory, qualities) = source(&args)?;
    let (executor, queue) = ChannelExecutor::new();
    let sinks = Sinks::with_executor(
        Box::new(CountingVideoSink::default()),
        Box::new(CountingAudioSink::default()),
        Arc::new(executor),
    );
    let engine = PlaybackEngine::new(config, qualities, factory, sinks)?;

    engine.start()?;
    pump(&queue, Duration::from_secs(2));

    if engine.can_seek() {
        info!("⏩ 跳转到 10s");
        engine.seek(10_000);
        pump(&queue, Duration::from_secs(1));
    }

    if engine.qualities().len() > 1 {
        info!("🔀 切换到第二档清晰度");
        engine.set_quality(1);
        pump(&queue, Duration::from_secs(1));
    }

    engine.set_speed(2.0);
    pump(&queue, Duration::from_secs(1));

    let snapshot = serde_json::to_string_pretty(&engine.snapshot())?;
    println!("{}", snapshot);

    engine.stop();
    // 处理残留任务，确保在途计数归零
    queue.run_pending();
    info!("✅ 演示结束，状态: {:?}", engine.status());
    Ok(())
}
