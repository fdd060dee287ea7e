/// Expected value and Kelly sizing for decimal-odds bets.
///
/// With decimal price `P` the net odds are `b = P − 1` (profit per unit
/// staked). For a win probability `p` and `q = 1 − p`:
///
///   EV  = p·b − q
///   f*  = (b·p − q) / b
///
/// A fractional multiplier scales `f*` down to trade growth for variance.

/// Expected profit per unit staked. `None` when the price carries no payout.
pub fn expected_value(win_prob: f64, decimal_price: f64) -> Option<f64> {
    if !decimal_price.is_finite() || decimal_price <= 1.0 {
        return None;
    }
    Some(win_prob * (decimal_price - 1.0) - (1.0 - win_prob))
}

/// Unclamped full-Kelly fraction. Negative means the bet has no edge.
pub fn kelly_fraction_raw(win_prob: f64, decimal_price: f64) -> f64 {
    let b = decimal_price - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    (b * win_prob - (1.0 - win_prob)) / b
}

/// Fraction of bankroll to stake after clamping at zero and applying the
/// fractional multiplier.
pub fn kelly_stake(win_prob: f64, decimal_price: f64, kelly_fraction: f64) -> f64 {
    kelly_fraction * kelly_fraction_raw(win_prob, decimal_price).max(0.0)
}

/// Probability edge over the price's implied probability.
pub fn edge(win_prob: f64, decimal_price: f64) -> f64 {
    if decimal_price <= 0.0 {
        return 0.0;
    }
    win_prob - 1.0 / decimal_price
}
