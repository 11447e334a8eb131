use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const CLOSE_DELTA_E: f64 = 2.0;
pub const APPROXIMATE_DELTA_E: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Exact,
    Close,
    Approximate,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfidenceTier::Exact => "exact",
            ConfidenceTier::Close => "close",
            ConfidenceTier::Approximate => "approximate",
        };
        f.write_str(label)
    }
}

fn default_alpha() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "default_alpha")]
    pub a: f64,
}

fn channel_to_byte(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl Rgba {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn opaque(r: f64, g: f64, b: f64) -> Self {
        Self::new(r, g, b, 1.0)
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            r: f64::from(bytes[0]) / 255.0,
            g: f64::from(bytes[1]) / 255.0,
            b: f64::from(bytes[2]) / 255.0,
            a: f64::from(bytes[3]) / 255.0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            channel_to_byte(self.r),
            channel_to_byte(self.g),
            channel_to_byte(self.b),
            channel_to_byte(self.a),
        ]
    }

    /// Lowercase hex key. Opaque colours render as `#rrggbb`, anything with
    /// alpha below 255 as `#rrggbbaa`, so an opaque and a translucent colour
    /// with the same RGB never share a key.
    pub fn to_hex(&self) -> String {
        let bytes = self.to_bytes();
        if bytes[3] == 255 {
            format!("#{}", hex::encode(&bytes[..3]))
        } else {
            format!("#{}", hex::encode(bytes))
        }
    }

    /// Parses `#rgb`, `#rgba`, `#rrggbb` and `#rrggbbaa` (leading `#` optional).
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let expanded: String = match digits.len() {
            3 | 4 => digits.chars().flat_map(|c| [c, c]).collect(),
            6 | 8 => digits.to_string(),
            _ => return Err(anyhow!("invalid hex colour: {input}")),
        };
        let decoded =
            hex::decode(&expanded).map_err(|err| anyhow!("invalid hex colour {input}: {err}"))?;
        let alpha = decoded.get(3).copied().unwrap_or(255);
        Ok(Self::from_bytes([decoded[0], decoded[1], decoded[2], alpha]))
    }

    /// Parses hex notation as well as `rgb(r, g, b)` / `rgba(r, g, b, a)` with
    /// 0-255 channels and a unit alpha.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();
        let body = lower
            .strip_prefix("rgba(")
            .or_else(|| lower.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'));
        let Some(body) = body else {
            return Self::from_hex(trimmed);
        };
        let parts: Vec<f64> = body
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| anyhow!("invalid colour {input}: {err}"))?;
        match parts.as_slice() {
            [r, g, b] => Ok(Self::opaque(r / 255.0, g / 255.0, b / 255.0)),
            [r, g, b, a] => Ok(Self::new(r / 255.0, g / 255.0, b / 255.0, *a)),
            _ => Err(anyhow!("invalid colour {input}: expected 3 or 4 channels")),
        }
    }

    pub fn same_hex(&self, other: &Rgba) -> bool {
        self.to_bytes() == other.to_bytes()
    }

    pub fn to_lab(&self) -> Lab {
        let [r, g, b, _] = self.to_bytes();
        let lr = srgb_to_linear(f64::from(r) / 255.0);
        let lg = srgb_to_linear(f64::from(g) / 255.0);
        let lb = srgb_to_linear(f64::from(b) / 255.0);

        // D65 reference white
        let x = (lr * 0.4124 + lg * 0.3576 + lb * 0.1805) / 0.95047;
        let y = lr * 0.2126 + lg * 0.7152 + lb * 0.0722;
        let z = (lr * 0.0193 + lg * 0.1192 + lb * 0.9505) / 1.08883;

        let fx = lab_f(x);
        let fy = lab_f(y);
        let fz = lab_f(z);
        Lab {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn srgb_to_linear(channel: f64) -> f64 {
    if channel <= 0.04045 {
        channel / 12.92
    } else {
        ((channel + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f64) -> f64 {
    const EPSILON: f64 = 216.0 / 24389.0;
    const KAPPA: f64 = 24389.0 / 27.0;
    if t > EPSILON {
        t.cbrt()
    } else {
        (KAPPA * t + 16.0) / 116.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

pub fn delta_e2000(lab1: Lab, lab2: Lab) -> f64 {
    let c1 = (lab1.a.powi(2) + lab1.b.powi(2)).sqrt();
    let c2 = (lab2.a.powi(2) + lab2.b.powi(2)).sqrt();
    let c_bar = (c1 + c2) / 2.0;
    let c_bar7 = c_bar.powi(7);
    let g = 0.5 * (1.0 - (c_bar7 / (c_bar7 + 25f64.powi(7))).sqrt());

    let a1p = lab1.a * (1.0 + g);
    let a2p = lab2.a * (1.0 + g);
    let c1p = (a1p.powi(2) + lab1.b.powi(2)).sqrt();
    let c2p = (a2p.powi(2) + lab2.b.powi(2)).sqrt();
    let h1p = hue_degrees(lab1.b, a1p);
    let h2p = hue_degrees(lab2.b, a2p);

    let dl = lab2.l - lab1.l;
    let dc = c2p - c1p;
    let dh_angle = if c1p * c2p == 0.0 {
        0.0
    } else if (h2p - h1p).abs() <= 180.0 {
        h2p - h1p
    } else if h2p - h1p > 180.0 {
        h2p - h1p - 360.0
    } else {
        h2p - h1p + 360.0
    };
    let dh = 2.0 * (c1p * c2p).sqrt() * (dh_angle.to_radians() / 2.0).sin();

    let l_bar = (lab1.l + lab2.l) / 2.0;
    let cp_bar = (c1p + c2p) / 2.0;
    let hp_bar = if c1p * c2p == 0.0 {
        h1p + h2p
    } else if (h1p - h2p).abs() <= 180.0 {
        (h1p + h2p) / 2.0
    } else if h1p + h2p < 360.0 {
        (h1p + h2p + 360.0) / 2.0
    } else {
        (h1p + h2p - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * (hp_bar - 30.0).to_radians().cos()
        + 0.24 * (2.0 * hp_bar).to_radians().cos()
        + 0.32 * (3.0 * hp_bar + 6.0).to_radians().cos()
        - 0.20 * (4.0 * hp_bar - 63.0).to_radians().cos();
    let delta_theta = 30.0 * (-((hp_bar - 275.0) / 25.0).powi(2)).exp();
    let cp_bar7 = cp_bar.powi(7);
    let rc = 2.0 * (cp_bar7 / (cp_bar7 + 25f64.powi(7))).sqrt();
    let l_term = (l_bar - 50.0).powi(2);
    let sl = 1.0 + (0.015 * l_term) / (20.0 + l_term).sqrt();
    let sc = 1.0 + 0.045 * cp_bar;
    let sh = 1.0 + 0.015 * cp_bar * t;
    let rt = -(2.0 * delta_theta).to_radians().sin() * rc;

    let l_part = dl / sl;
    let c_part = dc / sc;
    let h_part = dh / sh;
    (l_part.powi(2) + c_part.powi(2) + h_part.powi(2) + rt * c_part * h_part).sqrt()
}

fn hue_degrees(b: f64, a_prime: f64) -> f64 {
    if b == 0.0 && a_prime == 0.0 {
        return 0.0;
    }
    let angle = b.atan2(a_prime).to_degrees();
    if angle < 0.0 {
        angle + 360.0
    } else {
        angle
    }
}

/// Perceptual distance between two colours. Alpha differences are folded in
/// linearly (a fully transparent vs opaque pair scores 100).
pub fn color_distance(left: &Rgba, right: &Rgba) -> f64 {
    let base = delta_e2000(left.to_lab(), right.to_lab());
    let alpha = (f64::from(left.to_bytes()[3]) - f64::from(right.to_bytes()[3])).abs() / 255.0;
    base + alpha * 100.0
}

/// Tier for a colour pair, or `None` when the colours are too far apart to
/// be suggested at all.
pub fn classify_color(current: &Rgba, candidate: &Rgba) -> Option<ConfidenceTier> {
    if current.same_hex(candidate) {
        return Some(ConfidenceTier::Exact);
    }
    let distance = color_distance(current, candidate);
    if distance <= CLOSE_DELTA_E {
        Some(ConfidenceTier::Close)
    } else if distance <= APPROXIMATE_DELTA_E {
        Some(ConfidenceTier::Approximate)
    } else {
        None
    }
}
