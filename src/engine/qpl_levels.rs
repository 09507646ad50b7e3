//! Quantum price level math shared between the per-day preparation
//! pipeline (ground-state energy at n=0) and the realtime engine (price
//! levels at arbitrary offsets). Grounded on
//! `original_source/trading_bot/workspace/tradingBot.h`'s `K0` macro and
//! `tradingBot.cpp`'s `symbol::getPriceLevel`.
/// `K0(n) = (1.1924 + 33.2383n + 56.2169n^2) / (1 + 43.6196n)`.
pub fn k0(n: f64) -> f64 {
    (1.1924 + 33.2383 * n + 56.2169 * n * n) / (1.0 + 43.6196 * n)
}

/// Solves the depressed cubic `x^3 + C0*x - 1/27 = 0` at the given `c0`,
/// returning `x = cbrt(-C0/2 + C1) + cbrt(-C0/2 - C1)` with
/// `C1 = sqrt(C0^2/4 - 1/27)`. Returns `None` if the discriminant is
/// negative (not expected for valid `lambda`, per spec 4.H).
fn solve_cubic_root(c0: f64) -> Option<f64> {
    let discriminant = c0 * c0 / 4.0 - 1.0 / 27.0;
    if discriminant < 0.0 {
        return None;
    }
    let c1 = discriminant.sqrt();
    Some(cbrt(-c0 / 2.0 + c1) + cbrt(-c0 / 2.0 - c1))
}

fn cbrt(x: f64) -> f64 {
    x.cbrt()
}

/// Ground-state energy E0 (spec 4.H): `C0 = -lambda * K0(0)`, then the
/// cubic root above.
pub fn ground_state_energy(lambda: f64) -> Option<f64> {
    let c0 = -lambda * k0(0.0);
    solve_cubic_root(c0)
}

/// `E(m)` for `m = |n|`: `(2m + 1) * cuberoot_sum / E0`, where
/// `cuberoot_sum` solves the same cubic at `C0 = -lambda * K0(m)`.
fn e_of_m(lambda: f64, e0: f64, abs_n: i64) -> Option<f64> {
    let m = abs_n as f64;
    let c0 = -lambda * k0(m);
    let root = solve_cubic_root(c0)?;
    Some((2.0 * m + 1.0) * root / e0)
}

/// `price_level(n_diff)` relative to `new_n` (spec 4.I step 4):
/// `P0 * f(|new_n + n_diff|)` above the previous close when
/// `new_n + n_diff >= 0`, else `P0 / f(...)`.
/// `f(m) = 1 + 0.21 * sigma * E(m)`.
#[allow(clippy::too_many_arguments)]
pub fn price_level(
    previous_close: f64,
    sigma: f64,
    lambda: f64,
    e0: f64,
    new_n: i64,
    n_diff: i64,
) -> Option<f64> {
    let signed_n = new_n + n_diff;
    let abs_n = signed_n.unsigned_abs() as i64;
    let e = e_of_m(lambda, e0, abs_n)?;
    let f = 1.0 + 0.21 * sigma * e;
    if signed_n >= 0 {
        Some(previous_close * f)
    } else {
        Some(previous_close / f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k0_matches_closed_form_at_zero() {
        assert!((k0(0.0) - 1.1924).abs() < 1e-9);
    }

    #[test]
    fn ground_state_energy_is_finite_for_valid_lambda() {
        let e0 = ground_state_energy(0.2).unwrap();
        assert!(e0.is_finite());
    }

    #[test]
    fn price_level_increases_away_from_previous_close_for_positive_n() {
        let e0 = ground_state_energy(0.2).unwrap();
        let p0 = price_level(100.0, 0.02, 0.2, e0, 0, 1).unwrap();
        assert!(p0 > 100.0);
        let m0 = price_level(100.0, 0.02, 0.2, e0, 0, -1).unwrap();
        assert!(m0 < 100.0);
    }
}
