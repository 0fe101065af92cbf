//! 调用耗时格式化

use std::time::{Duration, Instant};

const SECOND: Duration = Duration::from_secs(1);
const MILLISECOND: Duration = Duration::from_millis(1);

/// 计算耗时，结束时间早于开始时间时为 0
pub fn elapsed(start: Instant, end: Instant) -> Duration {
    end.saturating_duration_since(start)
}

/// 按量级格式化耗时
///
/// - 超过 1 秒：截断到毫秒，如 `1.5s`
/// - 超过 1 毫秒：三位小数的毫秒，如 `2.345ms`
/// - 其余：原始表示，如 `500µs`
pub fn format_duration(elapsed: Duration) -> String {
    if elapsed > SECOND {
        format!("{:?}", truncate_to_millis(elapsed))
    } else if elapsed > MILLISECOND {
        format!("{:.3}ms", elapsed.as_nanos() as f64 / 1_000_000.0)
    } else {
        format!("{:?}", elapsed)
    }
}

pub fn format_elapsed(start: Instant, end: Instant) -> String {
    format_duration(elapsed(start, end))
}

fn truncate_to_millis(d: Duration) -> Duration {
    Duration::new(d.as_secs(), d.subsec_millis() * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_millisecond_is_raw() {
        assert_eq!(format_duration(Duration::from_micros(500)), "500µs");
        assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
        assert_eq!(format_duration(MILLISECOND), "1ms");
    }

    #[test]
    fn test_milliseconds_have_three_decimals() {
        assert_eq!(format_duration(Duration::from_micros(2345)), "2.345ms");
        assert_eq!(format_duration(Duration::from_millis(50)), "50.000ms");
        assert_eq!(format_duration(Duration::from_nanos(1_000_001)), "1.000ms");
        assert_eq!(format_duration(SECOND), "1000.000ms");
    }

    #[test]
    fn test_seconds_are_truncated_to_millis() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_micros(2_345_678)), "2.345s");
        assert_eq!(format_duration(Duration::from_secs(61)), "61s");
    }

    #[test]
    fn test_elapsed_never_negative() {
        let start = Instant::now();
        let later = start + Duration::from_millis(5);
        assert_eq!(elapsed(later, start), Duration::ZERO);
        assert_eq!(format_elapsed(start, later), "5.000ms");
    }
}
