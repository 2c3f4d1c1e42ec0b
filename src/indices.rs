//! # Agronomic indices
//! Selyaninov hydrothermal coefficient (GTK) and the standardised
//! precipitation index (SPI), plus the special functions SPI needs.
//!
//! SPI follows the usual recipe: rolling precipitation sums, a two-parameter
//! gamma fit (location fixed at 0) over the non-zero sums, then the latest
//! sum's gamma CDF mapped through the standard normal quantile.

use std::fmt;

use serde::Serialize;

/// Days whose mean temperature exceeds this count as active for GTK.
pub const ACTIVE_TEMP_BASE: f64 = 10.0;
/// Rolling window (days) of the precipitation sums fed to SPI.
pub const SPI_WINDOW: usize = 3;
/// Shortest daily series SPI is computed for.
pub const SPI_MIN_DAYS: usize = 12;
/// Fewer non-zero rolling sums than this and the gamma fit is not attempted.
const SPI_MIN_NONZERO: usize = 10;
/// CDF clamp, so completely dry or record-wet windows stay finite.
const SPI_CDF_CLAMP: (f64, f64) = (0.001, 0.999);

/// GTK = total precipitation / (0.1 · Σ(T − 10) over days with T > 10 °C).
/// `None` when no day was warmer than the base.
pub fn gtk(daily_mean_temps: &[f64], precipitation_total: f64) -> Option<f64> {
    let active: f64 = daily_mean_temps
        .iter()
        .filter(|t| **t > ACTIVE_TEMP_BASE)
        .map(|t| t - ACTIVE_TEMP_BASE)
        .sum();
    (active > 0.0 && precipitation_total.is_finite())
        .then(|| precipitation_total / (0.1 * active))
}

/// SPI of the latest [`SPI_WINDOW`]-day window of `daily_precipitation`.
pub fn spi(daily_precipitation: &[f64]) -> Option<f64> {
    if daily_precipitation.len() < SPI_MIN_DAYS {
        return None;
    }
    let sums: Vec<f64> = daily_precipitation
        .windows(SPI_WINDOW)
        .map(|w| w.iter().sum())
        .collect();
    let wet: Vec<f64> = sums.iter().copied().filter(|s| *s > 0.0).collect();
    if wet.len() < SPI_MIN_NONZERO {
        return None;
    }
    let (shape, scale) = fit_gamma(&wet)?;
    let latest = *sums.last()?;
    let cdf = if latest > 0.0 {
        regularized_gamma_p(shape, latest / scale)
    } else {
        0.0
    };
    let (lo, hi) = SPI_CDF_CLAMP;
    Some(normal_quantile(cdf.clamp(lo, hi)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiClass {
    ExtremelyWet,
    VeryWet,
    ModeratelyWet,
    Normal,
    ModerateDrought,
    SevereDrought,
    ExtremeDrought,
}

impl SpiClass {
    pub fn from_value(spi: f64) -> Self {
        if spi >= 2.0 {
            SpiClass::ExtremelyWet
        } else if spi >= 1.5 {
            SpiClass::VeryWet
        } else if spi >= 1.0 {
            SpiClass::ModeratelyWet
        } else if spi >= -1.0 {
            SpiClass::Normal
        } else if spi >= -1.5 {
            SpiClass::ModerateDrought
        } else if spi >= -2.0 {
            SpiClass::SevereDrought
        } else {
            SpiClass::ExtremeDrought
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpiClass::ExtremelyWet => "extremely wet",
            SpiClass::VeryWet => "very wet",
            SpiClass::ModeratelyWet => "moderately wet",
            SpiClass::Normal => "normal",
            SpiClass::ModerateDrought => "moderate drought",
            SpiClass::SevereDrought => "severe drought",
            SpiClass::ExtremeDrought => "extreme drought",
        }
    }
}

impl fmt::Display for SpiClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GtkClass {
    Excessive,
    Elevated,
    Optimal,
    Insufficient,
    Dry,
    SevereDrought,
}

impl GtkClass {
    pub fn from_value(gtk: f64) -> Self {
        if gtk > 1.6 {
            GtkClass::Excessive
        } else if gtk >= 1.3 {
            GtkClass::Elevated
        } else if gtk >= 1.0 {
            GtkClass::Optimal
        } else if gtk >= 0.7 {
            GtkClass::Insufficient
        } else if gtk >= 0.5 {
            GtkClass::Dry
        } else {
            GtkClass::SevereDrought
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GtkClass::Excessive => "excessive moisture",
            GtkClass::Elevated => "elevated moisture",
            GtkClass::Optimal => "optimal moisture",
            GtkClass::Insufficient => "insufficient moisture",
            GtkClass::Dry => "dry conditions",
            GtkClass::SevereDrought => "severe drought",
        }
    }
}

impl fmt::Display for GtkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maximum-likelihood gamma fit with location 0: `(shape, scale)`.
/// Minka's closed-form start, then Newton on `ln k − ψ(k) = s`.
fn fit_gamma(xs: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let mean_ln = xs.iter().map(|x| x.ln()).sum::<f64>() / n;
    let s = mean.ln() - mean_ln;
    // Identical samples: the likelihood has no finite maximum.
    if s.is_nan() || s <= 1e-12 {
        return None;
    }

    let mut k = (3.0 - s + ((s - 3.0).powi(2) + 24.0 * s).sqrt()) / (12.0 * s);
    for _ in 0..50 {
        let step = (k.ln() - digamma(k) - s) / (1.0 / k - trigamma(k));
        k -= step;
        if !k.is_finite() || k <= 0.0 {
            return None;
        }
        if step.abs() < 1e-12 * k {
            break;
        }
    }
    Some((k, mean / k))
}

fn digamma(mut x: f64) -> f64 {
    let mut acc = 0.0;
    while x < 10.0 {
        acc -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    acc + x.ln() - 0.5 / x - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f / 252.0))
}

fn trigamma(mut x: f64) -> f64 {
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    acc + 1.0 / x + f / 2.0 + (f / x) * (1.0 / 6.0 - f * (1.0 / 30.0 - f / 42.0))
}

/// ln Γ(x) for x > 0 (Lanczos, g = 7).
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + G + 0.5;
    let series = COEF[1..]
        .iter()
        .enumerate()
        .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64 + 1.0));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularised lower incomplete gamma P(a, x).
fn regularized_gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let prefix = (-x + a * x.ln() - ln_gamma(a)).exp();
    if x < a + 1.0 {
        let (mut ap, mut sum) = (a, 1.0 / a);
        let mut term = sum;
        for _ in 0..500 {
            ap += 1.0;
            term *= x / ap;
            sum += term;
            if term.abs() < sum.abs() * 1e-15 {
                break;
            }
        }
        (sum * prefix).clamp(0.0, 1.0)
    } else {
        // Continued fraction for Q(a, x), modified Lentz.
        const TINY: f64 = 1e-300;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / TINY;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..500 {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < TINY {
                d = TINY;
            }
            c = b + an / c;
            if c.abs() < TINY {
                c = TINY;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < 1e-15 {
                break;
            }
        }
        (1.0 - prefix * h).clamp(0.0, 1.0)
    }
}

/// Standard normal quantile (Acklam's rational approximation).
fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}
