//! Glicko-2 rating math on the internal scale.
//!
//! Pure functions only; the engine owns all state. Formulas follow the
//! standard Glicko-2 description: ratings are converted to the internal
//! (mu, phi) scale, updated from a batch of game results, and converted
//! back. The volatility step solves f(x) = 0 with the Illinois variant of
//! regula falsi, capped at [`SOLVER_MAX_ITERATIONS`] iterations with
//! convergence epsilon [`SOLVER_EPSILON`].

use std::f64::consts::PI;

pub const GLICKO_SCALE: f64 = 173.7178;
pub const DEFAULT_RATING: f64 = 1500.0;
pub const DEFAULT_RD: f64 = 350.0;
pub const DEFAULT_VOLATILITY: f64 = 0.06;

pub const RATING_MIN: f64 = 800.0;
pub const RATING_MAX: f64 = 2200.0;
pub const RD_MIN: f64 = 50.0;
pub const RD_MAX: f64 = 350.0;
pub const VOLATILITY_MIN: f64 = 0.001;
pub const VOLATILITY_MAX: f64 = 0.5;

/// System constant constraining volatility change per period.
pub const TAU: f64 = 0.5;

const SOLVER_MAX_ITERATIONS: usize = 100;
const SOLVER_EPSILON: f64 = 1e-6;

/// Exponent arguments are clamped to this range before `exp` so a wild
/// delta or variance cannot produce an infinite intermediate.
const EXP_ARG_BOUND: f64 = 10.0;

/// One game result against an opponent, captured on the internal scale at
/// observation time (period-start values).
#[derive(Debug, Clone, Copy)]
pub struct GameResult {
    pub opponent_mu: f64,
    pub opponent_phi: f64,
    pub score: f64,
}

/// Converts display-scale (rating, RD) to internal (mu, phi).
#[must_use]
pub fn to_internal_scale(rating: f64, rd: f64) -> (f64, f64) {
    ((rating - DEFAULT_RATING) / GLICKO_SCALE, rd / GLICKO_SCALE)
}

/// Converts internal (mu, phi) back to display-scale (rating, RD).
#[must_use]
pub fn from_internal_scale(mu: f64, phi: f64) -> (f64, f64) {
    (mu * GLICKO_SCALE + DEFAULT_RATING, phi * GLICKO_SCALE)
}

fn bounded_exp(x: f64) -> f64 {
    x.clamp(-EXP_ARG_BOUND, EXP_ARG_BOUND).exp()
}

/// Deviation weighting factor g(phi).
#[must_use]
pub fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt()
}

/// Expected score E against an opponent at (mu_j, phi_j).
#[must_use]
pub fn expected_score(mu: f64, opponent_mu: f64, opponent_phi: f64) -> f64 {
    1.0 / (1.0 + bounded_exp(-g(opponent_phi) * (mu - opponent_mu)))
}

/// Solves for the new volatility sigma' via the Illinois algorithm.
///
/// Domain: `delta` and `v` from the current update, `phi` the current
/// deviation, `sigma` the prior volatility. Returns `None` when any
/// intermediate goes non-finite or the bracket cannot be established, in
/// which case the caller keeps the prior sigma.
#[must_use]
pub fn solve_volatility(delta: f64, phi: f64, v: f64, sigma: f64) -> Option<f64> {
    if !delta.is_finite() || !v.is_finite() || v <= 0.0 {
        return None;
    }

    let a = (sigma * sigma).ln();
    let delta_sq = delta * delta;
    let phi_sq = phi * phi;

    let f = |x: f64| -> f64 {
        let ex = bounded_exp(x);
        let num = ex * (delta_sq - phi_sq - v - ex);
        let den = 2.0 * (phi_sq + v + ex) * (phi_sq + v + ex);
        num / den - (x - a) / (TAU * TAU)
    };

    let mut lower = a;
    let mut upper = if delta_sq > phi_sq + v {
        (delta_sq - phi_sq - v).ln()
    } else {
        let mut k = 1.0;
        while f(a - k * TAU) < 0.0 {
            k += 1.0;
            if k > SOLVER_MAX_ITERATIONS as f64 {
                return None;
            }
        }
        a - k * TAU
    };

    let mut f_lower = f(lower);
    let mut f_upper = f(upper);
    if !f_lower.is_finite() || !f_upper.is_finite() {
        return None;
    }

    let mut iterations = 0;
    while (upper - lower).abs() > SOLVER_EPSILON {
        iterations += 1;
        if iterations > SOLVER_MAX_ITERATIONS {
            break;
        }

        let candidate = lower + (lower - upper) * f_lower / (f_upper - f_lower);
        let f_candidate = f(candidate);
        if !candidate.is_finite() || !f_candidate.is_finite() {
            return None;
        }

        if f_candidate * f_upper <= 0.0 {
            lower = upper;
            f_lower = f_upper;
        } else {
            // Illinois modification: halve the retained side's value so the
            // bracket cannot stagnate.
            f_lower /= 2.0;
        }
        upper = candidate;
        f_upper = f_candidate;
    }

    let sigma_prime = bounded_exp(lower / 2.0);
    if sigma_prime.is_finite() {
        Some(sigma_prime)
    } else {
        None
    }
}

/// Applies a batch of games to one asset on the internal scale.
///
/// Returns the new (mu, phi, sigma), or `None` when the update produced a
/// non-finite intermediate — the caller then retains the prior state.
/// Non-finite per-game terms contribute zero rather than poisoning the sum.
#[must_use]
pub fn rate(mu: f64, phi: f64, sigma: f64, games: &[GameResult]) -> Option<(f64, f64, f64)> {
    if games.is_empty() {
        return Some((mu, phi, sigma));
    }

    let mut v_inv = 0.0;
    let mut delta_sum = 0.0;
    for game in games {
        let g_j = g(game.opponent_phi);
        let e_j = expected_score(mu, game.opponent_mu, game.opponent_phi);
        let v_term = g_j * g_j * e_j * (1.0 - e_j);
        let d_term = g_j * (game.score - e_j);
        if v_term.is_finite() && d_term.is_finite() {
            v_inv += v_term;
            delta_sum += d_term;
        }
    }

    if v_inv <= 0.0 {
        return None;
    }
    let v = 1.0 / v_inv;
    let delta = v * delta_sum;

    let sigma_prime = solve_volatility(delta, phi, v, sigma).unwrap_or(sigma);

    let phi_star = (phi * phi + sigma_prime * sigma_prime).sqrt();
    let phi_prime = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / v).sqrt();
    let mu_prime = mu + phi_prime * phi_prime * delta_sum;

    if mu_prime.is_finite() && phi_prime.is_finite() && sigma_prime.is_finite() {
        Some((mu_prime, phi_prime, sigma_prime))
    } else {
        None
    }
}

/// Deviation inflation for an asset that played no games this period.
#[must_use]
pub fn inflate_deviation(phi: f64, sigma: f64) -> f64 {
    (phi * phi + sigma * sigma).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_round_trip_is_identity() {
        for (rating, rd) in [(1500.0, 350.0), (1234.5, 120.0), (2100.0, 50.0)] {
            let (mu, phi) = to_internal_scale(rating, rd);
            let (back_rating, back_rd) = from_internal_scale(mu, phi);
            assert!((back_rating - rating).abs() < 1e-9);
            assert!((back_rd - rd).abs() < 1e-9);
        }
    }

    #[test]
    fn default_rating_maps_to_zero_mu() {
        let (mu, phi) = to_internal_scale(DEFAULT_RATING, DEFAULT_RD);
        assert!(mu.abs() < 1e-12);
        assert!((phi - DEFAULT_RD / GLICKO_SCALE).abs() < 1e-12);
    }

    #[test]
    fn g_decreases_with_phi() {
        assert!(g(0.0) > g(1.0));
        assert!(g(1.0) > g(2.0));
        assert!((g(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn expected_score_is_half_for_equal_opponents() {
        let e = expected_score(0.0, 0.0, 1.0);
        assert!((e - 0.5).abs() < 1e-12);
    }

    #[test]
    fn win_raises_rating_loss_lowers_it() {
        let (mu, phi) = to_internal_scale(1500.0, 200.0);
        let opponent = GameResult {
            opponent_mu: 0.0,
            opponent_phi: 200.0 / GLICKO_SCALE,
            score: 1.0,
        };
        let (mu_after_win, _, _) = rate(mu, phi, DEFAULT_VOLATILITY, &[opponent]).unwrap();
        assert!(mu_after_win > mu);

        let loss = GameResult {
            score: 0.0,
            ..opponent
        };
        let (mu_after_loss, _, _) = rate(mu, phi, DEFAULT_VOLATILITY, &[loss]).unwrap();
        assert!(mu_after_loss < mu);
    }

    #[test]
    fn games_shrink_deviation() {
        let (mu, phi) = to_internal_scale(1500.0, 350.0);
        let games: Vec<GameResult> = (0..10)
            .map(|_| GameResult {
                opponent_mu: 0.0,
                opponent_phi: 1.0,
                score: 0.5,
            })
            .collect();
        let (_, phi_prime, _) = rate(mu, phi, DEFAULT_VOLATILITY, &games).unwrap();
        assert!(phi_prime < phi);
    }

    #[test]
    fn solver_converges_on_glickman_example() {
        // Glickman's worked example: r=1500 RD=200, three games against
        // (1400,30,win), (1550,100,loss), (1700,300,loss).
        let (mu, phi) = to_internal_scale(1500.0, 200.0);
        let games = [
            GameResult {
                opponent_mu: to_internal_scale(1400.0, 30.0).0,
                opponent_phi: to_internal_scale(1400.0, 30.0).1,
                score: 1.0,
            },
            GameResult {
                opponent_mu: to_internal_scale(1550.0, 100.0).0,
                opponent_phi: to_internal_scale(1550.0, 100.0).1,
                score: 0.0,
            },
            GameResult {
                opponent_mu: to_internal_scale(1700.0, 300.0).0,
                opponent_phi: to_internal_scale(1700.0, 300.0).1,
                score: 0.0,
            },
        ];
        let (mu_prime, phi_prime, sigma_prime) = rate(mu, phi, 0.06, &games).unwrap();
        let (rating, rd) = from_internal_scale(mu_prime, phi_prime);

        assert!((rating - 1464.06).abs() < 0.5);
        assert!((rd - 151.52).abs() < 0.5);
        assert!((sigma_prime - 0.05999).abs() < 0.001);
    }

    #[test]
    fn solver_handles_tiny_delta() {
        let sigma = solve_volatility(1e-12, 1.0, 1.0, DEFAULT_VOLATILITY).unwrap();
        assert!(sigma.is_finite());
        assert!(sigma > 0.0);
    }

    #[test]
    fn solver_handles_huge_delta() {
        let sigma = solve_volatility(50.0, 0.5, 2.0, DEFAULT_VOLATILITY).unwrap();
        assert!(sigma.is_finite());
        assert!(sigma > DEFAULT_VOLATILITY);
    }

    #[test]
    fn solver_rejects_zero_variance() {
        assert!(solve_volatility(0.1, 1.0, 0.0, DEFAULT_VOLATILITY).is_none());
    }

    #[test]
    fn solver_handles_boundary_phi() {
        for phi in [RD_MIN / GLICKO_SCALE, RD_MAX / GLICKO_SCALE] {
            let sigma = solve_volatility(0.5, phi, 1.5, DEFAULT_VOLATILITY).unwrap();
            assert!(sigma.is_finite());
        }
    }

    #[test]
    fn solver_rejects_non_finite_inputs() {
        assert!(solve_volatility(f64::NAN, 1.0, 1.0, 0.06).is_none());
        assert!(solve_volatility(f64::INFINITY, 1.0, 1.0, 0.06).is_none());
    }

    #[test]
    fn inflate_deviation_grows_phi() {
        let phi = 1.0;
        assert!(inflate_deviation(phi, 0.06) > phi);
    }
}
