use crate::core::{AudioFrame, Result, SampleFormat, VideoFrame};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 一次性任务：把一次输出调用投递到渲染线程
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 视频输出（GPU 纹理上传等）
pub trait VideoSink: Send {
    fn upload(
        &mut self,
        buffer: &[u8],
        width: u32,
        height: u32,
        stride_bytes: usize,
        is_first_frame: bool,
    ) -> Result<()>;
}

/// 音频输出（设备缓冲队列）
pub trait AudioSink: Send {
    fn enqueue(
        &mut self,
        buffer: &[f32],
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
    ) -> Result<()>;

    /// 丢弃已排队但未播放的音频（Seek / 暂停 / 停止时调用）
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 执行器：保证输出调用发生在调用方指定的线程上
pub trait Executor: Send + Sync {
    fn submit(&self, task: Task);
}

/// 直接在播放线程上执行（输出设备允许在任意线程访问时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, task: Task) {
        task();
    }
}

/// 通过通道把任务投递给渲染线程，由渲染线程调用 `RenderQueue::run_pending`
#[derive(Clone)]
pub struct ChannelExecutor {
    tx: Sender<Task>,
}

/// 渲染线程持有的接收端
pub struct RenderQueue {
    rx: Receiver<Task>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, RenderQueue) {
        let (tx, rx) = unbounded::<Task>();
        (Self { tx }, RenderQueue { rx })
    }
}

impl Executor for ChannelExecutor {
    fn submit(&self, task: Task) {
        if self.tx.send(task).is_err() {
            // 任务随 SendError 一起被丢弃，在途计数由守卫回收
            warn!("⚠️ 渲染队列已关闭，丢弃输出任务");
        }
    }
}

impl RenderQueue {
    /// 执行当前所有待处理任务，返回执行数量
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// 最多等待 `timeout` 直到有任务，然后执行所有待处理任务
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// 一组输出端
pub struct Sinks {
    pub video: Box<dyn VideoSink>,
    pub audio: Box<dyn AudioSink>,
    pub executor: Arc<dyn Executor>,
}

impl Sinks {
    pub fn inline(video: Box<dyn VideoSink>, audio: Box<dyn AudioSink>) -> Self {
        Self { video, audio, executor: Arc::new(InlineExecutor) }
    }

    pub fn with_executor(
        video: Box<dyn VideoSink>,
        audio: Box<dyn AudioSink>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self { video, audio, executor }
    }
}

/// 丢弃所有数据的输出端（无音频设备 / 无画面时使用）
#[derive(Debug, Default)]
pub struct DiscardSink {
    pub frames: u64,
}

impl VideoSink for DiscardSink {
    fn upload(&mut self, _: &[u8], _: u32, _: u32, _: usize, _: bool) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

impl AudioSink for DiscardSink {
    fn enqueue(&mut self, _: &[f32], _: u32, _: u16, _: SampleFormat) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

/// 在途计数守卫：任务执行完或被丢弃时计数减一
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 输出调度：把帧包装成一次性任务交给执行器，同时统计各类型在途数量
///
/// 在途数量就是背压闸门看到的队列深度。
pub struct SinkDispatcher {
    video: Arc<Mutex<Box<dyn VideoSink>>>,
    audio: Arc<Mutex<Box<dyn AudioSink>>>,
    executor: Arc<dyn Executor>,
    video_in_flight: Arc<AtomicUsize>,
    audio_in_flight: Arc<AtomicUsize>,
    first_video: AtomicBool,
}

impl SinkDispatcher {
    pub fn new(sinks: Sinks) -> Self {
        Self {
            video: Arc::new(Mutex::new(sinks.video)),
            audio: Arc::new(Mutex::new(sinks.audio)),
            executor: sinks.executor,
            video_in_flight: Arc::new(AtomicUsize::new(0)),
            audio_in_flight: Arc::new(AtomicUsize::new(0)),
            first_video: AtomicBool::new(true),
        }
    }

    /// 新会话开始：下一帧视频标记为首帧（输出端可据此重建纹理）
    pub fn begin_session(&self) {
        self.first_video.store(true, Ordering::Release);
    }

    pub fn dispatch_video(&self, frame: VideoFrame) {
        let is_first = self.first_video.swap(false, Ordering::AcqRel);
        let guard = InFlightGuard::new(&self.video_in_flight);
        let sink = self.video.clone();
        self.executor.submit(Box::new(move || {
            let _guard = guard;
            let mut sink = sink.lock();
            if let Err(e) = sink.upload(&frame.data, frame.width, frame.height, frame.stride, is_first) {
                warn!("⚠️ 视频帧上传失败: {}", e);
            }
        }));
    }

    pub fn dispatch_audio(&self, frame: AudioFrame) {
        let guard = InFlightGuard::new(&self.audio_in_flight);
        let sink = self.audio.clone();
        self.executor.submit(Box::new(move || {
            let _guard = guard;
            let mut sink = sink.lock();
            if let Err(e) = sink.enqueue(&frame.data, frame.sample_rate, frame.channels, frame.format) {
                warn!("⚠️ 音频帧写入失败: {}", e);
            }
        }));
    }

    /// 清空音频输出缓冲区，立即停止播放旧音频
    pub fn flush_audio(&self) {
        let sink = self.audio.clone();
        self.executor.submit(Box::new(move || {
            if let Err(e) = sink.lock().flush() {
                warn!("⚠️ 清空音频输出缓冲区失败: {}", e);
            } else {
                debug!("✓ 清空音频输出缓冲区");
            }
        }));
    }

    pub fn video_in_flight(&self) -> usize {
        self.video_in_flight.load(Ordering::Acquire)
    }

    pub fn audio_in_flight(&self) -> usize {
        self.audio_in_flight.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.video_in_flight() + self.audio_in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PixelFormat, PlayerError};

    #[derive(Default)]
    struct Log {
        uploads: Vec<(u32, u32, usize, bool)>,
        samples: usize,
        flushes: usize,
    }

    struct SharedVideo(Arc<Mutex<Log>>);
    struct SharedAudio(Arc<Mutex<Log>>);

    impl VideoSink for SharedVideo {
        fn upload(&mut self, buffer: &[u8], w: u32, h: u32, stride: usize, first: bool) -> Result<()> {
            assert_eq!(buffer.len(), stride * h as usize);
            self.0.lock().uploads.push((w, h, stride, first));
            Ok(())
        }
    }

    impl AudioSink for SharedAudio {
        fn enqueue(&mut self, buffer: &[f32], _: u32, _: u16, _: SampleFormat) -> Result<()> {
            self.0.lock().samples += buffer.len();
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.0.lock().flushes += 1;
            Err(PlayerError::SinkError("device already closed".into()))
        }
    }

    fn video_frame() -> VideoFrame {
        VideoFrame {
            width: 2,
            height: 2,
            stride: 8,
            format: PixelFormat::RGBA,
            duration: 0.04,
            data: vec![0; 16],
        }
    }

    fn audio_frame() -> AudioFrame {
        AudioFrame { sample_rate: 48000, channels: 2, format: SampleFormat::F32, data: vec![0.0; 64] }
    }

    fn dispatcher(executor: Arc<dyn Executor>) -> (SinkDispatcher, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let sinks = Sinks::with_executor(
            Box::new(SharedVideo(log.clone())),
            Box::new(SharedAudio(log.clone())),
            executor,
        );
        (SinkDispatcher::new(sinks), log)
    }

    #[test]
    fn test_inline_dispatch_marks_first_frame_per_session() {
        let (dispatcher, log) = dispatcher(Arc::new(InlineExecutor));
        dispatcher.dispatch_video(video_frame());
        dispatcher.dispatch_video(video_frame());
        dispatcher.begin_session();
        dispatcher.dispatch_video(video_frame());
        let flags: Vec<bool> = log.lock().uploads.iter().map(|u| u.3).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_channel_executor_counts_in_flight_until_run() {
        let (executor, queue) = ChannelExecutor::new();
        let (dispatcher, log) = dispatcher(Arc::new(executor));
        for _ in 0..3 {
            dispatcher.dispatch_video(video_frame());
        }
        dispatcher.dispatch_audio(audio_frame());
        assert_eq!(dispatcher.video_in_flight(), 3);
        assert_eq!(dispatcher.audio_in_flight(), 1);
        assert!(log.lock().uploads.is_empty());

        assert_eq!(queue.run_pending(), 4);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(log.lock().uploads.len(), 3);
        assert_eq!(log.lock().samples, 64);
    }

    #[test]
    fn test_dropped_tasks_release_in_flight() {
        let (executor, queue) = ChannelExecutor::new();
        let (dispatcher, log) = dispatcher(Arc::new(executor));
        dispatcher.dispatch_video(video_frame());
        dispatcher.dispatch_audio(audio_frame());
        drop(queue);
        assert_eq!(dispatcher.in_flight(), 0);

        // 接收端关闭后继续投递也不会泄漏计数
        dispatcher.dispatch_video(video_frame());
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(log.lock().uploads.is_empty());
    }

    #[test]
    fn test_flush_error_is_swallowed() {
        let (dispatcher, log) = dispatcher(Arc::new(InlineExecutor));
        dispatcher.flush_audio();
        dispatcher.flush_audio();
        assert_eq!(log.lock().flushes, 2);
    }

    #[test]
    fn test_run_for_times_out_when_idle() {
        let (_executor, queue) = ChannelExecutor::new();
        assert_eq!(queue.run_for(Duration::from_millis(5)), 0);
        assert_eq!(queue.pending(), 0);
    }
}
