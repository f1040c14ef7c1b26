//! Chart-pattern detectors
//!
//! Every detector is a pure scan over candles (plus indicator rows) built on
//! the shared extrema finder and fitters in [`helpers`].
//!
//! # Pattern Families
//!
//! - **Engulfing**: two-candle body reversal
//! - **Trendlines**: triangles, wedges, flags
//! - **Reversal**: double top/bottom, head-and-shoulders (and inverse)
//! - **Curves**: rounded top/bottom, cup-and-handle
//! - **Staircase**: monotonic swing runs

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod curves;
pub mod engulfing;
pub mod reversal;
pub mod staircase;
pub mod trendlines;

// Re-export all detectors for convenience
pub use curves::*;
pub use engulfing::*;
pub use reversal::*;
pub use staircase::*;
pub use trendlines::*;
