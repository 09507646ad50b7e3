//! Assembles the 16-input feature vector and evaluates the inlier scoring
//! gate ahead of MLP scoring (spec 4.I step 6, 4.G feature order).
use crate::model::scaler::Scalers;

pub struct TradeContext {
    pub time_of_day_ns: i64,
    pub price: f64,
    pub size: i64,
    pub dt_seconds: f64,
    pub dp: f64,
    pub rolling_vsum: i64,
    pub rolling_trade_count: usize,
}

/// Builds the 16-feature vector in the fixed order spec 4.G names, raw
/// (pre-scaling) values first.
#[allow(clippy::too_many_arguments)]
pub fn raw_features(
    time_of_day_ns: i64,
    relative_volume: f64,
    n: i64,
    mean: f64,
    dp: f64,
    std: f64,
    dt_seconds: f64,
    vsum: i64,
    average_volume: f64,
    previous_days_close: f64,
    rolling_csum: usize,
    rolling_vsum: i64,
    p_minus_dx: f64,
    size: i64,
    p_plus_dx: f64,
    lambda: f64,
) -> [f64; 16] {
    [
        time_of_day_ns as f64,
        relative_volume,
        n as f64,
        mean,
        dp,
        std,
        dt_seconds,
        vsum as f64,
        average_volume,
        previous_days_close,
        rolling_csum as f64,
        rolling_vsum as f64,
        p_minus_dx,
        size as f64,
        p_plus_dx,
        lambda,
    ]
}

/// All 16 raw values must fall within their feature's inlier range for the
/// scoring gate to pass (spec 4.I step 6). Returns the list of feature
/// names that failed, empty if all passed.
pub fn failing_inlier_features(scalers: &Scalers, raw: &[f64; 16]) -> Vec<&'static str> {
    let mut failing = Vec::new();
    for (idx, name) in crate::model::scaler::FEATURE_NAMES.iter().enumerate() {
        if !scalers.is_inlier(idx, raw[idx]) {
            failing.push(*name);
        }
    }
    failing
}

/// Standardizes every raw feature into the 16-element vector the MLP
/// consumes.
pub fn standardize_all(scalers: &Scalers, raw: &[f64; 16]) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for (idx, value) in raw.iter().enumerate() {
        out[idx] = scalers.standardize(idx, *value) as f32;
    }
    out
}

/// Extra gate beyond the per-feature inlier bounds (spec 4.I step 6):
/// notional traded in the rolling window must clear $10,000, and the
/// rolling window must contain at least `rolling_period_min_trades`.
pub fn passes_notional_and_count_gate(
    scalers: &Scalers,
    ctx: &TradeContext,
) -> bool {
    let notional = ctx.rolling_vsum as f64 * ctx.price;
    let min_trades = scalers.by_index[Scalers::index_of("rolling_csum")].min;
    notional >= 10_000.0 && ctx.rolling_trade_count as f64 >= min_trades
}
