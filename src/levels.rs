//! Support / resistance zones from clustered swing points
//!
//! Levels are derived on demand from a trailing window and never mutated.

use serde::{Deserialize, Serialize};

use crate::{
    detectors::helpers::{find_swings, Extremum},
    Error, Factor, Period, Result, OHLCV,
};

/// A clustered price zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Mean price of the zone's members
    pub price: f64,
    pub touches: usize,
    /// Grows with touch count; 2 is the minimum usable zone
    pub strength: usize,
}

/// Clusterer parameters. Percentages are in percent units (0.2 = 0.2%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Trailing window W
    pub lookback: Period,
    /// Swing neighbourhood K on each side
    pub swing_window: Period,
    pub cluster_tolerance_pct: Factor,
    /// Proximity used by `is_at_support` / `is_at_resistance`
    pub touch_tolerance_pct: Factor,
    pub min_strength: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(150),
            swing_window: Period::new_const(5),
            cluster_tolerance_pct: Factor::new_const(0.2),
            touch_tolerance_pct: Factor::new_const(0.3),
            min_strength: 2,
        }
    }
}

impl LevelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_strength < 2 {
            return Err(Error::InvalidConfig(format!(
                "min_strength must be >= 2, got {}",
                self.min_strength
            )));
        }
        if self.lookback.get() < 2 * self.swing_window.get() + 1 {
            return Err(Error::InvalidConfig(
                "lookback too short for swing_window".to_string(),
            ));
        }
        Ok(())
    }
}

/// Greedy clustering of unit-weight prices.
pub fn cluster_levels(prices: &[f64], tolerance_pct: f64) -> Vec<Level> {
    let points: Vec<(f64, usize)> = prices.iter().map(|&p| (p, 1)).collect();
    cluster_weighted(&points, tolerance_pct)
}

/// Greedy clustering of `(price, weight)` points.
///
/// Points are sorted by price; each joins the current zone while it lies
/// within `tolerance_pct` percent of the zone's running (weighted) mean.
/// Zones whose total weight is below 2 are discarded.
pub fn cluster_weighted(points: &[(f64, usize)], tolerance_pct: f64) -> Vec<Level> {
    let mut sorted: Vec<(f64, usize)> = points
        .iter()
        .copied()
        .filter(|(p, w)| p.is_finite() && *w > 0)
        .collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let tolerance = tolerance_pct / 100.0;
    let mut zones = Vec::new();
    let (mut sum, mut weight) = (sorted[0].0 * sorted[0].1 as f64, sorted[0].1);

    for &(price, w) in &sorted[1..] {
        let mean = sum / weight as f64;
        if mean.abs() > f64::EPSILON && (price - mean).abs() / mean.abs() <= tolerance {
            sum += price * w as f64;
            weight += w;
        } else {
            zones.push(zone(sum, weight));
            sum = price * w as f64;
            weight = w;
        }
    }
    zones.push(zone(sum, weight));

    zones.retain(|z| z.touches >= 2);
    zones
}

#[inline]
fn zone(sum: f64, weight: usize) -> Level {
    Level {
        price: sum / weight as f64,
        touches: weight,
        strength: weight,
    }
}

/// Nearest zone within `tolerance_pct` percent of `price`; ties go to the
/// lower-priced zone.
pub fn is_at_level(price: f64, zones: &[Level], tolerance_pct: f64) -> Option<&Level> {
    let tolerance = tolerance_pct / 100.0;
    zones
        .iter()
        .filter(|z| z.price.abs() > f64::EPSILON)
        .filter(|z| (price - z.price).abs() / z.price.abs() <= tolerance)
        .min_by(|a, b| {
            (price - a.price)
                .abs()
                .total_cmp(&(price - b.price).abs())
                .then(a.price.total_cmp(&b.price))
        })
}

/// Extracts swing points from a trailing window and clusters them into zones
#[derive(Debug, Clone, Default)]
pub struct LevelClusterer {
    config: LevelConfig,
}

impl LevelClusterer {
    pub fn new(config: LevelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    /// Zones from swing lows of the window ending at `at` (inclusive)
    pub fn support_levels<T: OHLCV>(&self, bars: &[T], at: usize) -> Vec<Level> {
        self.levels(bars, at, Extremum::Low)
    }

    /// Zones from swing highs of the window ending at `at` (inclusive)
    pub fn resistance_levels<T: OHLCV>(&self, bars: &[T], at: usize) -> Vec<Level> {
        self.levels(bars, at, Extremum::High)
    }

    pub fn is_at_support<T: OHLCV>(
        &self,
        bars: &[T],
        at: usize,
        price: f64,
    ) -> Option<Level> {
        let zones = self.support_levels(bars, at);
        self.usable(price, &zones)
    }

    pub fn is_at_resistance<T: OHLCV>(
        &self,
        bars: &[T],
        at: usize,
        price: f64,
    ) -> Option<Level> {
        let zones = self.resistance_levels(bars, at);
        self.usable(price, &zones)
    }

    fn usable(&self, price: f64, zones: &[Level]) -> Option<Level> {
        is_at_level(price, zones, self.config.touch_tolerance_pct.get())
            .filter(|z| z.strength >= self.config.min_strength)
            .copied()
    }

    fn levels<T: OHLCV>(&self, bars: &[T], at: usize, kind: Extremum) -> Vec<Level> {
        if at >= bars.len() {
            return Vec::new();
        }
        let start = (at + 1).saturating_sub(self.config.lookback.get());
        let swings = find_swings(&bars[start..=at], kind, self.config.swing_window.get());
        let prices: Vec<f64> = swings.iter().map(|s| s.price).collect();
        cluster_levels(&prices, self.config.cluster_tolerance_pct.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    #[test]
    fn test_cluster_groups_nearby_prices() {
        let zones = cluster_levels(&[100.0, 100.1, 105.0, 104.95, 110.0], 0.2);
        assert_eq!(zones.len(), 2);
        assert!((zones[0].price - 100.05).abs() < 1e-9);
        assert_eq!(zones[0].touches, 2);
        assert!((zones[1].price - 104.975).abs() < 1e-9);
        // 110.0 alone is discarded
        assert!(zones.iter().all(|z| z.strength >= 2));
    }

    #[test]
    fn test_cluster_empty() {
        assert!(cluster_levels(&[], 0.2).is_empty());
        assert!(cluster_levels(&[100.0], 0.2).is_empty());
    }

    #[test]
    fn test_is_at_level_prefers_nearest_then_lower() {
        let zones = vec![
            Level {
                price: 100.0,
                touches: 2,
                strength: 2,
            },
            Level {
                price: 100.2,
                touches: 3,
                strength: 3,
            },
        ];
        assert_eq!(is_at_level(100.15, &zones, 0.3).unwrap().price, 100.2);
        assert_eq!(is_at_level(100.1, &zones, 0.3).unwrap().price, 100.0);
        assert!(is_at_level(120.0, &zones, 0.3).is_none());
    }

    #[test]
    fn test_support_levels_from_trailing_window() {
        // Saw-tooth with troughs at 90 every 8 candles
        let bars: Vec<Candle> = (0..64)
            .map(|i| {
                let phase = (i % 8) as f64;
                let mid = 90.0 + (phase - 4.0).abs() * 2.0 + 1.0;
                Candle::new(i, mid, mid + 1.0, mid - 1.0, mid, 1.0)
            })
            .collect();
        let clusterer = LevelClusterer::default();
        let support = clusterer.support_levels(&bars, 63);
        assert_eq!(support.len(), 1);
        assert!((support[0].price - 90.0).abs() < 1e-9);
        assert!(support[0].strength >= 2);

        let hit = clusterer.is_at_support(&bars, 63, 90.2).unwrap();
        assert!((hit.price - 90.0).abs() < 1e-9);
        assert!(clusterer.is_at_support(&bars, 63, 95.0).is_none());
    }

    #[test]
    fn test_levels_out_of_range_is_empty() {
        let bars = vec![Candle::new(0, 1.0, 2.0, 0.5, 1.5, 1.0)];
        assert!(LevelClusterer::default().support_levels(&bars, 5).is_empty());
    }
}
