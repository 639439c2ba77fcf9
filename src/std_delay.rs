use std::{thread, time::Duration};

use embedded_hal::delay::DelayNs;

/// 基于线程休眠的阻塞延时
///
/// - 加载overlay后等待内核生成文件用，精度要求不高，直接挂起当前线程即可
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay {}

impl StdDelay {
    pub fn new() -> Self {
        Self {}
    }
}

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::{mock::CountingDelay, *};

    #[test]
    fn delay_ms_blocks_at_least_requested_time() {
        let mut delay = StdDelay::new();
        let start = Instant::now();
        delay.delay_ms(20);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn counting_delay_accumulates_without_sleeping() {
        let mut delay = CountingDelay::new();
        let observer = delay.clone();
        let start = Instant::now();
        delay.delay_ms(1_000);
        delay.delay_ns(500_000_000);
        assert_eq!(observer.total_ms(), 1_500);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
