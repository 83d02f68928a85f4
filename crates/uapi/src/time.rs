//! 时间相关的用户态结构体

/// 对应 Linux 的 `struct timespec`
///
/// 字段顺序决定了派生的比较语义：先比较秒，再比较纳秒。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSpec {
    /// 秒
    pub tv_sec: i64,
    /// 纳秒，范围 [0, 1_000_000_000)
    pub tv_nsec: i64,
}

pub const NSEC_PER_SEC: i64 = 1_000_000_000;

impl TimeSpec {
    /// 构造时间值，纳秒部分会被规范化进秒
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self {
            tv_sec: sec + nsec.div_euclid(NSEC_PER_SEC),
            tv_nsec: nsec.rem_euclid(NSEC_PER_SEC),
        }
    }

    /// 零时刻
    pub const fn zero() -> Self {
        Self {
            tv_sec: 0,
            tv_nsec: 0,
        }
    }

    /// 从纳秒计数构造
    pub const fn from_nanos(nanos: i64) -> Self {
        Self::new(0, nanos)
    }

    pub fn is_zero(&self) -> bool {
        self.tv_sec == 0 && self.tv_nsec == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_nanos() {
        let t = TimeSpec::new(1, 1_500_000_000);
        assert_eq!(t, TimeSpec::new(2, 500_000_000));
        assert_eq!(TimeSpec::from_nanos(-1), TimeSpec::new(-1, 999_999_999));
    }

    #[test]
    fn test_ordering() {
        assert!(TimeSpec::new(1, 0) > TimeSpec::new(0, 999_999_999));
        assert!(TimeSpec::zero().is_zero());
    }
}
