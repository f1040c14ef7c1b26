//! Shared geometry for window-based detectors
//!
//! One extrema finder (parameterised by comparison direction) and the line /
//! parabola fitters every detector and the level clusterer build on.

use crate::OHLCV;

// ============================================================
// EXTREMA
// ============================================================

/// Which side of the candle an extremum is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    /// Swing high: `high` strictly above every neighbour
    High,
    /// Swing low: `low` strictly below every neighbour
    Low,
}

impl Extremum {
    #[inline]
    pub fn price<T: OHLCV>(self, bar: &T) -> f64 {
        match self {
            Extremum::High => bar.high(),
            Extremum::Low => bar.low(),
        }
    }

    /// `a` is strictly more extreme than `b`
    #[inline]
    pub fn beats(self, a: f64, b: f64) -> bool {
        match self {
            Extremum::High => a > b,
            Extremum::Low => a < b,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Extremum::High => Extremum::Low,
            Extremum::Low => Extremum::High,
        }
    }
}

/// A local extremum; `index` is absolute in the slice passed to [`find_swings`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
}

/// Swing points of `bars`: candle `i` qualifies when its price beats every
/// other candle within `±window`. Candles closer than `window` to either end
/// never qualify.
pub fn find_swings<T: OHLCV>(bars: &[T], kind: Extremum, window: usize) -> Vec<SwingPoint> {
    if window == 0 || bars.len() < 2 * window + 1 {
        return Vec::new();
    }

    (window..bars.len() - window)
        .filter_map(|i| {
            let price = kind.price(&bars[i]);
            let is_swing = (i - window..=i + window)
                .filter(|&j| j != i)
                .all(|j| kind.beats(price, kind.price(&bars[j])));
            is_swing.then_some(SwingPoint { index: i, price })
        })
        .collect()
}

/// Swings found inside `bars[start..end]`, with indices shifted back to
/// absolute positions.
pub fn swings_in<T: OHLCV>(
    bars: &[T],
    start: usize,
    end: usize,
    kind: Extremum,
    window: usize,
) -> Vec<SwingPoint> {
    let mut points = find_swings(&bars[start..end], kind, window);
    for p in &mut points {
        p.index += start;
    }
    points
}

/// Most extreme price of `kind` over `bars[start..end]`
pub fn extreme_price<T: OHLCV>(
    bars: &[T],
    start: usize,
    end: usize,
    kind: Extremum,
) -> Option<f64> {
    bars.get(start..end)?
        .iter()
        .map(|b| kind.price(b))
        .reduce(|acc, p| if kind.beats(p, acc) { p } else { acc })
}

// ============================================================
// FITTING
// ============================================================

/// `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}

impl Line {
    #[inline]
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Least-squares line through `(index, price)` points. Needs two distinct x.
pub fn fit_line(points: &[SwingPoint]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.index as f64).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.price).sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for p in points {
        let dx = p.index as f64 - mean_x;
        sxy += dx * (p.price - mean_y);
        sxx += dx * dx;
    }
    if sxx <= f64::EPSILON {
        return None;
    }
    let slope = sxy / sxx;
    let line = Line {
        slope,
        intercept: mean_y - slope * mean_x,
    };
    (line.slope.is_finite() && line.intercept.is_finite()).then_some(line)
}

/// Line through every candle's `kind` price over `bars[start..end]`
pub fn fit_window_line<T: OHLCV>(
    bars: &[T],
    start: usize,
    end: usize,
    kind: Extremum,
) -> Option<Line> {
    let points: Vec<SwingPoint> = bars
        .get(start..end)?
        .iter()
        .enumerate()
        .map(|(k, b)| SwingPoint {
            index: start + k,
            price: kind.price(b),
        })
        .collect();
    fit_line(&points)
}

/// `y = a x² + b x + c` with its coefficient of determination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadratic {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub r_squared: f64,
}

/// Least-squares parabola over `ys` with `x = 0, 1, 2, ...`. Needs three points
/// and a non-constant series.
pub fn fit_quadratic(ys: &[f64]) -> Option<Quadratic> {
    if ys.len() < 3 {
        return None;
    }
    let n = ys.len() as f64;
    let (mut s1, mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0, 0.0);
    let (mut t0, mut t1, mut t2) = (0.0, 0.0, 0.0);
    for (i, &y) in ys.iter().enumerate() {
        let x = i as f64;
        let x2 = x * x;
        s1 += x;
        s2 += x2;
        s3 += x2 * x;
        s4 += x2 * x2;
        t0 += y;
        t1 += x * y;
        t2 += x2 * y;
    }

    // Normal equations, solved by Cramer's rule:
    // | s4 s3 s2 | |a|   |t2|
    // | s3 s2 s1 | |b| = |t1|
    // | s2 s1 n  | |c|   |t0|
    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let m = [[s4, s3, s2], [s3, s2, s1], [s2, s1, n]];
    let det = det3(m);
    if det.abs() <= f64::EPSILON {
        return None;
    }
    let a = det3([[t2, s3, s2], [t1, s2, s1], [t0, s1, n]]) / det;
    let b = det3([[s4, t2, s2], [s3, t1, s1], [s2, t0, n]]) / det;
    let c = det3([[s4, s3, t2], [s3, s2, t1], [s2, s1, t0]]) / det;

    let mean = t0 / n;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (i, &y) in ys.iter().enumerate() {
        let x = i as f64;
        let fitted = a * x * x + b * x + c;
        ss_res += (y - fitted).powi(2);
        ss_tot += (y - mean).powi(2);
    }
    if ss_tot <= f64::EPSILON {
        return None;
    }
    let r_squared = 1.0 - ss_res / ss_tot;

    [a, b, c, r_squared]
        .iter()
        .all(|v| v.is_finite())
        .then_some(Quadratic { a, b, c, r_squared })
}

// ============================================================
// COMPARISONS
// ============================================================

/// `|a - b|` relative to their mean is within `tolerance` (a fraction)
#[inline]
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    let mean = (a + b) / 2.0;
    mean.abs() > f64::EPSILON && (a - b).abs() / mean.abs() <= tolerance
}

/// Every value lies within `tolerance` (a fraction) of the values' mean
pub fn all_near_mean(values: &[f64], tolerance: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean.abs() <= f64::EPSILON {
        return None;
    }
    values
        .iter()
        .all(|v| (v - mean).abs() / mean.abs() <= tolerance)
        .then_some(mean)
}

/// Close moved from at-or-below `prev_level` to strictly above `level`
#[inline]
pub fn crossed_above(prev_close: f64, close: f64, prev_level: f64, level: f64) -> bool {
    prev_close <= prev_level && close > level
}

/// Close moved from at-or-above `prev_level` to strictly below `level`
#[inline]
pub fn crossed_below(prev_close: f64, close: f64, prev_level: f64, level: f64) -> bool {
    prev_close >= prev_level && close < level
}

/// Map `value` in `[0, 1]` onto a strength band `[lo, hi]`
#[inline]
pub fn scale_strength(value: f64, lo: f64, hi: f64) -> f64 {
    (lo + (hi - lo) * value.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}
