//! Exchange tick-size rounding and percentage math.
//!
//! Binance rejects prices and quantities that are not a multiple of the
//! symbol's `tickSize` / `stepSize`. Every price the engine sends goes through
//! [`floor_to_tick`] or [`ceil_to_tick`].

/// Guards against `0.3 / 0.1 = 2.9999999999999996` style artifacts.
const EPSILON: f64 = 1e-7;

/// Number of decimal places implied by a tick size (`0.01` → 2, `1.0` → 0).
pub fn tick_precision(tick: f64) -> u32 {
    if tick <= 0.0 || tick >= 1.0 {
        return 0;
    }
    (-tick.log10() - EPSILON).ceil().max(0.0) as u32
}

/// Round `value` to `decimals` places, removing binary noise.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Largest multiple of `tick` that is `<= value`.
///
/// A non-positive tick returns `value` unchanged.
pub fn floor_to_tick(value: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    let steps = (value / tick + EPSILON).floor();
    round_to(steps * tick, tick_precision(tick))
}

/// Smallest multiple of `tick` that is `>= value`.
pub fn ceil_to_tick(value: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    let steps = (value / tick - EPSILON).ceil();
    round_to(steps * tick, tick_precision(tick))
}

/// Percentage change from `from` to `to`, e.g. `100 → 101` is `1.0`.
///
/// Returns `0.0` when `from` is zero.
pub fn percent_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        return 0.0;
    }
    (to / from - 1.0) * 100.0
}

/// `value` increased by `percent` percent.
pub fn add_percent(value: f64, percent: f64) -> f64 {
    value * (1.0 + percent / 100.0)
}

/// Round a percentage to two decimals.
pub fn round_percent(percent: f64) -> f64 {
    round_to(percent, 2)
}
