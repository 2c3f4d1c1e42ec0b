//! Response curves: map a feature value to a suitability response in [0, 1].

use serde::{Deserialize, Serialize};

use crate::features::TextureClass;

fn default_width() -> f64 {
    0.3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    /// 1 inside `[low, high]`, linear fall-off to 0 over `falloff` outside it.
    Band { low: f64, high: f64, falloff: f64 },
    /// Gaussian around `optimum` (sigma = `width * optimum`) at or above
    /// `minimum`; below it, linear from 0 up to 0.5.
    Optimum {
        minimum: f64,
        optimum: f64,
        #[serde(default = "default_width")]
        width: f64,
    },
    /// Saturating ratio `value / target`.
    AtLeast { target: f64 },
    /// 1 at or above `limit`, linear fall-off to 0 over `falloff` below it.
    Floor { limit: f64, falloff: f64 },
    /// Categorical match on a texture class code.
    OneOf {
        classes: Vec<TextureClass>,
        otherwise: f64,
    },
}

impl Curve {
    pub fn response(&self, x: f64) -> f64 {
        let r = match self {
            Curve::Band { low, high, falloff } => {
                if (*low..=*high).contains(&x) {
                    1.0
                } else {
                    let dev = if x < *low { low - x } else { x - high };
                    1.0 - dev / falloff
                }
            }
            Curve::Optimum {
                minimum,
                optimum,
                width,
            } => {
                if x >= *minimum {
                    let z = (x - optimum) / (width * optimum);
                    (-z * z).exp()
                } else {
                    x / minimum * 0.5
                }
            }
            Curve::AtLeast { target } => x / target,
            Curve::Floor { limit, falloff } => {
                if x >= *limit {
                    1.0
                } else {
                    1.0 - (limit - x) / falloff
                }
            }
            Curve::OneOf { classes, otherwise } => match TextureClass::from_code(x) {
                Some(c) if classes.contains(&c) => 1.0,
                _ => *otherwise,
            },
        };
        if r.is_finite() {
            r.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Parameter sanity; returns a reason on failure.
    pub fn check(&self) -> Result<(), String> {
        let ok = |cond: bool, why: &str| if cond { Ok(()) } else { Err(why.to_string()) };
        match self {
            Curve::Band { low, high, falloff } => {
                ok(low <= high, "band: low must not exceed high")?;
                ok(*falloff > 0.0, "band: falloff must be positive")
            }
            Curve::Optimum {
                minimum,
                optimum,
                width,
            } => {
                ok(*minimum > 0.0, "optimum: minimum must be positive")?;
                ok(*optimum > 0.0, "optimum: optimum must be positive")?;
                ok(*width > 0.0, "optimum: width must be positive")
            }
            Curve::AtLeast { target } => ok(*target > 0.0, "at_least: target must be positive"),
            Curve::Floor { falloff, .. } => ok(*falloff > 0.0, "floor: falloff must be positive"),
            Curve::OneOf { classes, otherwise } => {
                ok(!classes.is_empty(), "one_of: classes must not be empty")?;
                ok(
                    (0.0..=1.0).contains(otherwise),
                    "one_of: otherwise must be within [0, 1]",
                )
            }
        }
    }
}
