//! Piecewise interpolation of binned laws

use std::fmt;

use crate::RadsimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Zero-order hold from the left bin edge
    Rect,
    /// Value of the closest edge
    Nearest,
    Linear,
    /// Monotone piecewise cubic (Fritsch-Carlson derivatives)
    Pchip,
}

impl Interpolation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rect" | "zero" => Some(Self::Rect),
            "nearest" => Some(Self::Nearest),
            "linear" => Some(Self::Linear),
            "pchip" | "cubic" => Some(Self::Pchip),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rect => "rect",
            Self::Nearest => "nearest",
            Self::Linear => "linear",
            Self::Pchip => "pchip",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tabulated law evaluated by interpolation between `(edge, value)` pairs.
/// Outside `[edges[0], edges[n-1]]` the law is zero.
#[derive(Debug, Clone)]
pub struct BinnedLaw {
    edges: Vec<f64>,
    values: Vec<f64>,
    method: Interpolation,
    slopes: Vec<f64>,
}

impl BinnedLaw {
    pub fn new(edges: Vec<f64>, values: Vec<f64>, method: Interpolation) -> Result<Self, RadsimError> {
        let invalid = |reason: String| RadsimError::InvalidModel {
            kind: "binned PSD",
            reason,
        };
        if edges.len() != values.len() {
            return Err(invalid(format!(
                "{} bin edges but {} bin values",
                edges.len(),
                values.len()
            )));
        }
        if edges.len() < 2 {
            return Err(invalid("at least two bin edges are required".to_string()));
        }
        if edges.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(invalid("bin edges must be strictly increasing".to_string()));
        }
        if edges.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err(invalid("bin edges and values must be finite".to_string()));
        }

        let slopes = if method == Interpolation::Pchip {
            pchip_slopes(&edges, &values)
        } else {
            Vec::new()
        };

        Ok(Self {
            edges,
            values,
            method,
            slopes,
        })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn method(&self) -> Interpolation {
        self.method
    }

    pub fn dmin(&self) -> f64 {
        self.edges[0]
    }

    pub fn dmax(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    pub fn canonical(&self) -> String {
        format!(
            "binned({};{:?};{:?})",
            self.method.name(),
            self.edges,
            self.values
        )
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.edges.len();
        if !(x >= self.edges[0] && x <= self.edges[n - 1]) {
            return 0.0;
        }
        if x == self.edges[n - 1] {
            return self.values[n - 1];
        }

        // index of the interval [edges[k], edges[k+1]) containing x
        let k = self.edges.partition_point(|&e| e <= x) - 1;
        let (x0, x1) = (self.edges[k], self.edges[k + 1]);
        let (y0, y1) = (self.values[k], self.values[k + 1]);
        let h = x1 - x0;
        let t = (x - x0) / h;

        match self.method {
            Interpolation::Rect => y0,
            Interpolation::Nearest => {
                if t <= 0.5 {
                    y0
                } else {
                    y1
                }
            }
            Interpolation::Linear => y0 + t * (y1 - y0),
            Interpolation::Pchip => {
                let (d0, d1) = (self.slopes[k], self.slopes[k + 1]);
                let t2 = t * t;
                let t3 = t2 * t;
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + t;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                h00 * y0 + h10 * h * d0 + h01 * y1 + h11 * h * d1
            }
        }
    }
}

fn pchip_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let m: Vec<f64> = (0..n - 1).map(|k| (y[k + 1] - y[k]) / h[k]).collect();

    if n == 2 {
        return vec![m[0], m[0]];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        let (m0, m1) = (m[k - 1], m[k]);
        if sign(m0) * sign(m1) <= 0.0 {
            continue;
        }
        let w1 = 2.0 * h[k] + h[k - 1];
        let w2 = h[k] + 2.0 * h[k - 1];
        d[k] = (w1 + w2) / (w1 / m0 + w2 / m1);
    }
    d[0] = pchip_edge(h[0], h[1], m[0], m[1]);
    d[n - 1] = pchip_edge(h[n - 2], h[n - 3], m[n - 2], m[n - 3]);
    d
}

fn pchip_edge(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
    if sign(d) != sign(m0) {
        0.0
    } else if sign(m0) != sign(m1) && d.abs() > 3.0 * m0.abs() {
        3.0 * m0
    } else {
        d
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
