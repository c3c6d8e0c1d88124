use crate::core::{FrameUnit, Result, SeekBias, SessionInfo};

/// 拉取一个编码单元并解码后的结果
#[derive(Debug)]
pub enum DecodedUnit {
    /// 本单元产出的帧（可能为空，例如解码器还在攒参考帧）
    Frames(Vec<FrameUnit>),
    /// 到达流末尾
    EndOfStream,
}

/// 解码器抽象接口
///
/// 具体的解封装/解码实现（FFmpeg、测试图案、静态图片……）都实现这个 trait。
/// 解码器只在播放线程内创建和使用，因此不要求 `Send`。
pub trait Decoder {
    /// 打开媒体地址，返回会话信息
    fn open(&mut self, url: &str) -> Result<SessionInfo>;

    /// 拉取下一个编码单元并解码
    ///
    /// 返回：
    /// - Ok(Frames(..)): 成功解码（可能没有产出帧）
    /// - Ok(EndOfStream): 到达流末尾
    /// - Err(e): `e.is_transient()` 为真时只丢弃该单元，否则整个会话出错
    fn next_unit(&mut self) -> Result<DecodedUnit>;

    /// 容器级 Seek（毫秒）
    fn seek(&mut self, target_ms: i64, bias: SeekBias) -> Result<()>;

    /// 清空解码器内部缓冲（Seek 前调用，防止旧参考帧混入）
    fn flush(&mut self) -> Result<()>;

    /// 释放解码句柄
    fn close(&mut self) -> Result<()>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String {
        "decoder".to_string()
    }
}

/// 解码器工厂：每次初始化会话（启动、清晰度切换、循环重开）创建一个新解码器
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn Decoder>;
}

impl<F> DecoderFactory for F
where
    F: Fn() -> Box<dyn Decoder> + Send + Sync,
{
    fn create(&self) -> Box<dyn Decoder> {
        self()
    }
}
