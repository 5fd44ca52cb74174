// =============================================================================
// Black-Scholes pricing — synthetic option premium when no real chain exists
// =============================================================================
//
// brapi.dev (and B3 generally, for a retail feed) exposes underlying quotes
// but no options chain, so external/hybrid providers price options
// synthetically off the underlying using a plain European Black-Scholes
// model with fixed risk-free-rate and volatility proxies for the Brazilian
// market. This is explicitly an approximation, not a real market price.
//
// Grounded on `_black_scholes` in `app/services/market_data/brapi_provider.py`.
// =============================================================================

use crate::types::OptionSide;

/// Annualized risk-free rate proxy for Brazil.
pub const R_ANNUAL: f64 = 0.11;
/// Annualized volatility proxy.
pub const SIGMA_ANNUAL: f64 = 0.35;

#[derive(Debug, Clone, Copy, Default)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PricingResult {
    pub premium: f64,
    pub greeks: Greeks,
}

fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Abramowitz & Stegun 7.1.26 approximation (max error ~1.5e-7), avoiding a
/// dependency on `libm` for a single special function.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Prices a European option via Black-Scholes. `years_to_expiration` should
/// already be clamped to a sane positive value by the caller (the original
/// floors DTE at 1 day before converting to years).
pub fn price(
    underlying: f64,
    strike: f64,
    years_to_expiration: f64,
    option_type: OptionSide,
) -> PricingResult {
    if years_to_expiration <= 0.0 || underlying <= 0.0 || strike <= 0.0 {
        let intrinsic = match option_type {
            OptionSide::Call => (underlying - strike).max(0.0),
            OptionSide::Put => (strike - underlying).max(0.0),
        };
        return PricingResult {
            premium: intrinsic,
            greeks: Greeks::default(),
        };
    }

    let (s, k, t) = (underlying, strike, years_to_expiration);
    let r = R_ANNUAL;
    let sigma = SIGMA_ANNUAL;

    let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt());
    let d2 = d1 - sigma * t.sqrt();
    let n_d1 = norm_cdf(d1);
    let n_d2 = norm_cdf(d2);
    let pdf_d1 = norm_pdf(d1);
    let df = (-r * t).exp();

    let (premium, delta) = match option_type {
        OptionSide::Call => (s * n_d1 - k * df * n_d2, n_d1),
        OptionSide::Put => (k * df * (1.0 - n_d2) - s * (1.0 - n_d1), n_d1 - 1.0),
    };

    let gamma = pdf_d1 / (s * sigma * t.sqrt());
    let vega = s * pdf_d1 * t.sqrt() / 100.0;
    let theta_call = (-(s * pdf_d1 * sigma) / (2.0 * t.sqrt()) - r * k * df * n_d2) / 365.0;
    let theta_put = (-(s * pdf_d1 * sigma) / (2.0 * t.sqrt()) + r * k * df * (1.0 - n_d2)) / 365.0;
    let theta = match option_type {
        OptionSide::Call => theta_call,
        OptionSide::Put => theta_put,
    };
    let rho = match option_type {
        OptionSide::Call => k * t * df * n_d2 / 100.0,
        OptionSide::Put => -k * t * df * (1.0 - n_d2) / 100.0,
    };

    PricingResult {
        premium,
        greeks: Greeks {
            delta,
            gamma,
            theta,
            vega,
            rho,
        },
    }
}

/// Converts a days-to-expiration count to years using a 252-trading-day
/// year, flooring at 1 day as the original does to avoid division by zero.
pub fn years_to_expiration(dte_days: i64) -> f64 {
    dte_days.max(1) as f64 / 252.0
}
