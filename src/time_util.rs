use chrono::{Local, Timelike};

/// 交易时段（按本地时间 HHMMSS 划分）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// 盘前 (< 09:15)
    PreOpen,
    /// 集合竞价 [09:15, 09:30)
    OpenAuction,
    /// 上午连续竞价 [09:30, 11:30)
    ContinuousAm,
    /// 午间休市 [11:30, 13:00)
    Lunch,
    /// 下午连续竞价 [13:00, 14:57)
    ContinuousPm,
    /// 收盘集合竞价 [14:57, 15:00)
    CloseAuction,
    /// 盘后 [15:00, 15:30)
    PostMarket,
    /// 闭市
    Closed,
}

/// 把 HHMMSS 映射到交易时段，纯函数
pub fn session_of(hhmmss: u32) -> Session {
    match hhmmss {
        t if t < 91500 => Session::PreOpen,
        t if t < 93000 => Session::OpenAuction,
        t if t < 113000 => Session::ContinuousAm,
        t if t < 130000 => Session::Lunch,
        t if t < 145700 => Session::ContinuousPm,
        t if t < 150000 => Session::CloseAuction,
        t if t < 153000 => Session::PostMarket,
        _ => Session::Closed,
    }
}

/// 当前本地时间，HHMMSS 整数（如 93015 表示 09:30:15）
pub fn now_hhmmss() -> u32 {
    let now = Local::now();
    now.hour() * 10000 + now.minute() * 100 + now.second()
}

/// 当前本地日期 YYYYMMDD
pub fn now_yyyymmdd() -> u32 {
    let now = Local::now().date_naive();
    use chrono::Datelike;
    now.year() as u32 * 10000 + now.month() * 100 + now.day()
}

/// 半开区间判断 [start, end)
pub fn time_in_range(now: u32, start: u32, end: u32) -> bool {
    now >= start && now < end
}

/// HHMMSSmmm -> HHMMSS；已经是 HHMMSS 的原样返回
pub fn normalize_hhmmss(raw: u32) -> u32 {
    if raw > 235959 {
        raw / 1000
    } else {
        raw
    }
}

/// 把 "HHMMSS" 或 "HHMMSSmmm" 字符串解析为 HHMMSS
pub fn parse_hhmmss(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let mut value: u64 = digits.parse().ok()?;
    if digits.len() > 6 {
        value /= 1000;
    }
    if value == 0 || value > 235959 {
        return None;
    }
    Some(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_boundaries() {
        assert_eq!(session_of(91459), Session::PreOpen);
        assert_eq!(session_of(91500), Session::OpenAuction);
        assert_eq!(session_of(92959), Session::OpenAuction);
        assert_eq!(session_of(93000), Session::ContinuousAm);
        assert_eq!(session_of(113000), Session::Lunch);
        assert_eq!(session_of(130000), Session::ContinuousPm);
        assert_eq!(session_of(145700), Session::CloseAuction);
        assert_eq!(session_of(150000), Session::PostMarket);
        assert_eq!(session_of(153000), Session::Closed);
    }

    #[test]
    fn parse_time_strings() {
        assert_eq!(parse_hhmmss("092700"), Some(92700));
        assert_eq!(parse_hhmmss("092700000"), Some(92700));
        assert_eq!(parse_hhmmss("09:27:00"), Some(92700));
        assert_eq!(parse_hhmmss(""), None);
        assert_eq!(parse_hhmmss("999999"), None);
    }

    #[test]
    fn half_open_windows() {
        assert!(time_in_range(92330, 92330, 92500));
        assert!(!time_in_range(92500, 92330, 92500));
    }
}
