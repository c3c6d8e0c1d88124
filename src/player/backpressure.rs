use crate::core::config::Watermarks;

/// 背压闸门：双水位滞回，避免在阈值附近反复切换
///
/// - 未限流时：任一队列超过高水位 → 开始限流
/// - 限流中：两个队列都回落到低水位及以下 → 解除限流
#[derive(Debug, Clone)]
pub struct BackpressureGate {
    marks: Watermarks,
    throttling: bool,
}

impl BackpressureGate {
    pub fn new(marks: Watermarks) -> Self {
        Self { marks, throttling: false }
    }

    /// 根据当前队列深度更新状态，返回是否处于限流
    pub fn update(&mut self, video_depth: usize, audio_depth: usize) -> bool {
        if self.throttling {
            if video_depth <= self.marks.video_low && audio_depth <= self.marks.audio_low {
                self.throttling = false;
            }
        } else if video_depth > self.marks.video_high || audio_depth > self.marks.audio_high {
            self.throttling = true;
        }
        self.throttling
    }

    pub fn is_throttling(&self) -> bool {
        self.throttling
    }

    pub fn reset(&mut self) {
        self.throttling = false;
    }

    pub fn watermarks(&self) -> Watermarks {
        self.marks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks() -> Watermarks {
        Watermarks { video_high: 10, video_low: 4, audio_high: 30, audio_low: 12 }
    }

    fn count_toggles(gate: &mut BackpressureGate, depths: &[(usize, usize)]) -> usize {
        let mut toggles = 0;
        let mut last = gate.is_throttling();
        for &(video, audio) in depths {
            let now = gate.update(video, audio);
            if now != last {
                toggles += 1;
                last = now;
            }
        }
        toggles
    }

    #[test]
    fn test_no_chatter_between_watermarks() {
        let m = marks();
        let mut gate = BackpressureGate::new(m);
        let depths: Vec<_> = (0..100)
            .map(|i| {
                if i % 2 == 0 {
                    (m.video_low + 1, m.audio_low + 1)
                } else {
                    (m.video_high - 1, m.audio_high - 1)
                }
            })
            .collect();
        assert_eq!(count_toggles(&mut gate, &depths), 0);
        assert!(!gate.is_throttling());

        // 先进入限流，再在两个水位之间震荡也不会解除
        gate.update(m.video_high + 1, 0);
        assert!(gate.is_throttling());
        assert_eq!(count_toggles(&mut gate, &depths), 0);
        assert!(gate.is_throttling());
    }

    #[test]
    fn test_crossing_high_then_low_toggles_once_each_way() {
        let m = marks();
        let mut gate = BackpressureGate::new(m);
        let mut depths = Vec::new();
        for v in 0..=m.video_high + 1 {
            depths.push((v, 0));
        }
        for v in (m.video_low..=m.video_high + 1).rev() {
            depths.push((v, 0));
        }
        assert_eq!(count_toggles(&mut gate, &depths), 2);
        assert!(!gate.is_throttling());
    }

    #[test]
    fn test_exit_requires_both_queues_low() {
        let m = marks();
        let mut gate = BackpressureGate::new(m);
        assert!(gate.update(0, m.audio_high + 1));
        assert!(gate.update(0, m.audio_low + 1));
        assert!(gate.update(m.video_low + 1, m.audio_low));
        assert!(!gate.update(m.video_low, m.audio_low));
    }

    #[test]
    fn test_exact_high_watermark_does_not_throttle() {
        let m = marks();
        let mut gate = BackpressureGate::new(m);
        assert!(!gate.update(m.video_high, m.audio_high));
        assert!(gate.update(m.video_high + 1, 0));
        gate.reset();
        assert!(!gate.is_throttling());
    }
}
