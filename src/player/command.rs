use crossbeam::atomic::AtomicCell;

/// 单值命令槽："最后一次写入生效"
///
/// 外部线程随时 `request` 覆盖，播放线程用 `take_if_present` 取走并清空。
/// 没有队列，连续多次 Seek 只会留下最后一个目标。
pub struct CommandSlot<T> {
    cell: AtomicCell<Option<T>>,
}

impl<T: Copy> CommandSlot<T> {
    pub const fn new() -> Self {
        Self { cell: AtomicCell::new(None) }
    }

    /// 写入请求（覆盖旧值，永不阻塞）
    pub fn request(&self, value: T) {
        self.cell.store(Some(value));
    }

    /// 取出并清空（单消费者）
    pub fn take_if_present(&self) -> Option<T> {
        self.cell.swap(None)
    }

    /// 查看但不取走
    pub fn peek(&self) -> Option<T> {
        self.cell.load()
    }

    pub fn is_pending(&self) -> bool {
        self.peek().is_some()
    }

    pub fn clear(&self) {
        self.cell.store(None);
    }
}

impl<T: Copy> Default for CommandSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 外部调用方影响播放线程的唯一通道
#[derive(Default)]
pub struct CommandSlots {
    pub stop: CommandSlot<()>,
    pub quality: CommandSlot<usize>,
    pub seek: CommandSlot<i64>,        // 目标位置（毫秒）
    pub pause: CommandSlot<bool>,      // 期望的暂停状态
    pub speed: CommandSlot<f32>,
}

impl CommandSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// 停止 / 清晰度切换 / Seek 任一待处理时，阻塞中的播放线程应当尽快返回主循环
    pub fn interrupt_pending(&self) -> bool {
        self.stop.is_pending() || self.quality.is_pending() || self.seek.is_pending()
    }

    pub fn clear_all(&self) {
        self.stop.clear();
        self.quality.clear();
        self.seek.clear();
        self.pause.clear();
        self.speed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_last_write_wins() {
        let slot = CommandSlot::new();
        slot.request(1000i64);
        slot.request(2000);
        slot.request(3000);
        assert_eq!(slot.take_if_present(), Some(3000));
        assert_eq!(slot.take_if_present(), None);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let slot = CommandSlot::new();
        assert!(!slot.is_pending());
        slot.request(true);
        assert_eq!(slot.peek(), Some(true));
        assert!(slot.is_pending());
        assert_eq!(slot.take_if_present(), Some(true));
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_concurrent_writers_leave_one_value() {
        let slot = Arc::new(CommandSlot::new());
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let slot = slot.clone();
                thread::spawn(move || {
                    for j in 0..1000 {
                        slot.request(i * 1000 + j);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        let value = slot.take_if_present().unwrap();
        assert_eq!(value % 1000, 999);
        assert_eq!(slot.take_if_present(), None);
    }

    #[test]
    fn test_interrupt_pending_ignores_soft_commands() {
        let slots = CommandSlots::new();
        slots.pause.request(true);
        slots.speed.request(2.0);
        assert!(!slots.interrupt_pending());
        slots.seek.request(10);
        assert!(slots.interrupt_pending());
        slots.clear_all();
        assert!(!slots.interrupt_pending());
        assert!(!slots.pause.is_pending());
    }
}
