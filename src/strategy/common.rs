use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// 向上取到两位小数（竞价/盘中挂价统一用这个口径）。
/// 距离整分不到 1e-6 分的值按整分算，抵消浮点乘法的抖动。
pub fn ceil_round(value: f64) -> f64 {
    let scaled = value * 100.0;
    let nearest = scaled.round();
    if (scaled - nearest).abs() < 1e-6 {
        nearest / 100.0
    } else {
        scaled.ceil() / 100.0
    }
}

pub fn round_price(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 向下取整到整手（100 股）
pub fn to_lot(qty: i64) -> i64 {
    if qty <= 0 {
        return 0;
    }
    (qty / 100) * 100
}

/// 买一是否贴着涨停（两个口径差 1 分钱以内算贴停）
pub fn at_limit_up(bid1: f64, zt_price: f64) -> bool {
    zt_price > 0.0 && (bid1 - zt_price).abs() < 0.01
}

/// 盘口中间价，贴着两位小数向下（ceil(x-ε) 等价于业务上的"不过半分"）
pub fn mid_price(bid1: f64, ask1: f64) -> f64 {
    ceil_round((bid1 + ask1) / 2.0 - 1e-6)
}

/// 可卖余量：min(可用, 持仓) 各自先扣底仓
pub fn sell_surplus(available: i64, total: i64, hold_vol: i64) -> i64 {
    let avail = (available - hold_vol).max(0);
    let held = (total - hold_vol).max(0);
    avail.min(held)
}

/// 单笔节奏参数
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub single_amt: f64,
    pub rand_amt1: f64,
    pub rand_amt2: f64,
}

impl Pacing {
    /// 盘中：由 input_amt 推导
    pub fn intraday_from_input(input_amt: f64) -> Self {
        Self {
            single_amt: input_amt * 0.025,
            rand_amt1: input_amt * 0.02,
            rand_amt2: 5000.0,
        }
    }

    /// 竞价：同样由 input_amt 推导；input_amt=600000 时
    /// 等于老的 20000/40000 档
    pub fn auction_from_input(input_amt: f64) -> Self {
        Self {
            single_amt: input_amt / 30.0,
            rand_amt1: input_amt / 15.0,
            rand_amt2: 5000.0,
        }
    }

    /// 收盘：比竞价更大的出货档；input_amt=600000 时
    /// 等于老的 30000/50000 档
    pub fn close_from_input(input_amt: f64) -> Self {
        Self {
            single_amt: input_amt / 20.0,
            rand_amt1: input_amt / 12.0,
            rand_amt2: 5000.0,
        }
    }
}

/// 模块私有的可播种随机源
pub struct SellRng {
    rng: StdRng,
}

impl SellRng {
    /// seed=0 用系统熵；单测给固定种子保证可重复
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// [0,1) 均匀
    pub fn uni(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// N(0,1)
    pub fn normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}

/// 采样金额换成整手股数。高价股一手的金额就可能超过整个包络，
/// 正金额至少放行一手，否则贵价票永远出不了货。
fn amount_to_lots(amt: f64, bid1: f64, vol: i64) -> i64 {
    if amt <= 0.0 {
        return 0;
    }
    let mut sampled = ((amt / bid1 / 100.0) as i64) * 100;
    if sampled == 0 && vol >= 100 {
        sampled = 100;
    }
    vol.min(sampled)
}

/// 随机单笔量：金额按 single_amt − rand_amt1/2 + rand_amt1·U + N·rand_amt2
/// 采样，负值截为 0，按买一价换成股数后向下取整到整手，再与余量取小。
/// 余量金额本身不足 single_amt 时不拆单，直接返回余量。
pub fn randomized_volume(rng: &mut SellRng, pacing: &Pacing, bid1: f64, vol: i64) -> i64 {
    if vol <= 0 || bid1 <= 0.0 {
        return 0;
    }
    if pacing.single_amt >= bid1 * vol as f64 {
        return vol;
    }
    let amt = pacing.single_amt - pacing.rand_amt1 / 2.0
        + pacing.rand_amt1 * rng.uni()
        + rng.normal() * pacing.rand_amt2;
    amount_to_lots(amt, bid1, vol)
}

/// 开盘跟卖用的放大包络：single_amt×5 − rand_amt1×2 + rand_amt1×4·U + N·rand_amt2
pub fn randomized_volume_wide(rng: &mut SellRng, pacing: &Pacing, bid1: f64, vol: i64) -> i64 {
    if vol <= 0 || bid1 <= 0.0 {
        return 0;
    }
    if pacing.single_amt >= bid1 * vol as f64 {
        return vol;
    }
    let amt = pacing.single_amt * 5.0 - pacing.rand_amt1 * 2.0
        + pacing.rand_amt1 * 4.0 * rng.uni()
        + rng.normal() * pacing.rand_amt2;
    amount_to_lots(amt, bid1, vol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_round_up_to_fen() {
        // 浮点噪声不改变落在整分上的乘积
        assert_eq!(ceil_round(1800.0 * 1.015), 1827.0);
        assert_eq!(ceil_round(200.0 * 1.07), 214.0);
        assert_eq!(ceil_round(50.0 * 1.01), 50.5);
        assert_eq!(ceil_round(10.001), 10.01);
        assert_eq!(ceil_round(10.0), 10.0);
    }

    #[test]
    fn mid_price_stays_inside_spread() {
        let mid = mid_price(10.00, 10.02);
        assert!(mid >= 10.00 && mid <= 10.02);
        assert_eq!(mid, 10.01);
        // 奇数价差不跨过卖一
        assert_eq!(mid_price(10.00, 10.01), 10.01);
        assert_eq!(mid_price(48.00, 48.02), 48.01);
    }

    #[test]
    fn surplus_with_floor() {
        assert_eq!(sell_surplus(600, 600, 300), 300);
        assert_eq!(sell_surplus(100, 600, 300), 0);
        assert_eq!(sell_surplus(600, 200, 300), 0);
    }

    #[test]
    fn randomized_volume_respects_caps() {
        let mut rng = SellRng::new(42);
        let pacing = Pacing::auction_from_input(600_000.0);
        // 余量金额小于 single_amt：整量卖出
        assert_eq!(randomized_volume(&mut rng, &pacing, 10.0, 1000), 1000);
        // 大余量：出来的是整手且不超过余量
        for _ in 0..200 {
            let v = randomized_volume(&mut rng, &pacing, 10.0, 100_000);
            assert!(v >= 0 && v <= 100_000);
            assert_eq!(v % 100, 0);
        }
    }

    #[test]
    fn derived_pacing_matches_legacy_at_default_input() {
        let auction = Pacing::auction_from_input(600_000.0);
        assert_eq!(auction.single_amt, 20_000.0);
        assert_eq!(auction.rand_amt1, 40_000.0);
        let close = Pacing::close_from_input(600_000.0);
        assert_eq!(close.single_amt, 30_000.0);
        assert_eq!(close.rand_amt1, 50_000.0);
    }

    #[test]
    fn high_priced_stock_still_clears_one_lot() {
        // 一手 18 万多，包络采样不到，也要能放行一手
        let mut rng = SellRng::new(42);
        let pacing = Pacing::auction_from_input(600_000.0);
        for _ in 0..200 {
            let v = randomized_volume(&mut rng, &pacing, 1827.05, 300);
            assert!(v == 0 || v == 100, "v={v}");
        }
        let hits = (0..200)
            .filter(|_| randomized_volume(&mut rng, &pacing, 1827.05, 300) == 100)
            .count();
        assert!(hits > 0, "包络从未放行一手");
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let mut a = SellRng::new(7);
        let mut b = SellRng::new(7);
        for _ in 0..10 {
            assert_eq!(a.uni(), b.uni());
            assert_eq!(a.normal(), b.normal());
        }
    }

    #[test]
    fn lot_floor() {
        assert_eq!(to_lot(199), 100);
        assert_eq!(to_lot(100), 100);
        assert_eq!(to_lot(99), 0);
        assert_eq!(to_lot(-5), 0);
    }
}
