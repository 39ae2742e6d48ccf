use crate::strategy::Condition;

/// 盘中卖出时间窗
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    /// HHMMSS
    pub start: u32,
    /// HHMMSS
    pub end: u32,
    /// 窗口结束前要保留的仓位比例 [0,1]；0 = 全部清完
    pub keep_position: f64,
}

impl TimeWindow {
    const fn new(start: u32, end: u32, keep_position: f64) -> Self {
        Self {
            start,
            end,
            keep_position,
        }
    }

    pub fn contains(&self, now: u32) -> bool {
        now >= self.start && now < self.end
    }
}

/// 一条策略规则：jjamt 阈值 + 开盘比阈值 -> 窗口表
struct Rule {
    condition: Condition,
    jjamt_min: f64,
    open_ratio_min: f64,
    windows: &'static [TimeWindow],
}

const fn w(start: u32, end: u32, keep_position: f64) -> TimeWindow {
    TimeWindow::new(start, end, keep_position)
}

/// 盘中卖出窗口表。匹配规则：同条件内先取最大的 jjamt 阈值 ≤ jjamt，
/// 再取最大的开盘比阈值 ≤ open/昨收；条目按该序排列。
static RULES: &[Rule] = &[
    // fb 封板未炸
    Rule {
        condition: Condition::Fb,
        jjamt_min: 1.5e7,
        open_ratio_min: 1.04,
        windows: &[w(112800, 130200, 0.0), w(103800, 104200, 0.0)],
    },
    Rule {
        condition: Condition::Fb,
        jjamt_min: 0.0,
        open_ratio_min: 1.015,
        windows: &[w(93000, 93000, 0.0)],
    },
    Rule {
        condition: Condition::Fb,
        jjamt_min: 0.0,
        open_ratio_min: 0.0,
        windows: &[
            w(105920, 110040, 0.66),
            w(142920, 143040, 0.33),
            w(150000, 150000, 0.0),
        ],
    },
    // hf 回封
    Rule {
        condition: Condition::Hf,
        jjamt_min: 2.0e7,
        open_ratio_min: 1.03,
        windows: &[w(112800, 130200, 0.0), w(104800, 105200, 0.0)],
    },
    Rule {
        condition: Condition::Hf,
        jjamt_min: 0.0,
        open_ratio_min: 1.03,
        windows: &[w(102900, 103100, 0.5), w(131400, 131600, 0.0)],
    },
    Rule {
        condition: Condition::Hf,
        jjamt_min: 0.0,
        open_ratio_min: 0.0,
        windows: &[w(142900, 143100, 0.5), w(143900, 144100, 0.0)],
    },
    // zb 炸板
    Rule {
        condition: Condition::Zb,
        jjamt_min: 3e6,
        open_ratio_min: 1.04,
        windows: &[w(93000, 93400, 0.0)],
    },
    Rule {
        condition: Condition::Zb,
        jjamt_min: 3e6,
        open_ratio_min: 1.0,
        windows: &[w(150000, 150000, 0.0)],
    },
    Rule {
        condition: Condition::Zb,
        jjamt_min: 3e6,
        open_ratio_min: 0.97,
        windows: &[w(93900, 94100, 0.5), w(112900, 130100, 0.0)],
    },
    Rule {
        condition: Condition::Zb,
        jjamt_min: 3e6,
        open_ratio_min: 0.0,
        windows: &[w(142800, 143200, 0.0)],
    },
    Rule {
        condition: Condition::Zb,
        jjamt_min: 0.0,
        open_ratio_min: 1.01,
        windows: &[w(93000, 93000, 0.0)],
    },
    Rule {
        condition: Condition::Zb,
        jjamt_min: 0.0,
        open_ratio_min: 0.97,
        windows: &[
            w(105920, 110040, 0.66),
            w(144420, 144540, 0.33),
            w(150000, 150000, 0.0),
        ],
    },
    Rule {
        condition: Condition::Zb,
        jjamt_min: 0.0,
        open_ratio_min: 0.0,
        windows: &[w(93030, 93230, 0.5), w(102400, 102600, 0.0)],
    },
    // lb 连板
    Rule {
        condition: Condition::Lb,
        jjamt_min: 0.0,
        open_ratio_min: 1.07,
        windows: &[w(93000, 93000, 0.0)],
    },
    Rule {
        condition: Condition::Lb,
        jjamt_min: 0.0,
        open_ratio_min: 0.0,
        windows: &[w(150000, 150000, 0.0)],
    },
];

/// 取指定条件下的卖出窗口。
/// 条目按 jjamt 档位降序、档内开盘比降序排列，线性扫描取第一条
/// 两个下限都满足的规则；高档位开盘比都不满足时自然落到低档位。
pub fn sell_windows(condition: Condition, jjamt: f64, open_ratio: f64) -> &'static [TimeWindow] {
    for rule in RULES.iter().filter(|r| r.condition == condition) {
        if jjamt >= rule.jjamt_min && open_ratio >= rule.open_ratio_min {
            return rule.windows;
        }
    }
    &[]
}
