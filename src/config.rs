//! Aggregate analysis configuration
//!
//! One TOML document configures the whole pipeline. Every section is
//! optional and falls back to its documented defaults:
//!
//! ```toml
//! [patterns]
//! enabled = ["double_top", "bullish_engulfing"]
//! min_strength = 0.5
//!
//! [patterns.detectors.engulfing]
//! min_body_ratio = 2.0
//!
//! [backtest]
//! initial_capital = 5000.0
//!
//! [directional]
//! trend_alignment = false
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    backtest::{BacktestConfig, TradePlanner},
    filter::{DirectionalFilters, QualityConfig, SignalQualityFilter},
    indicators::{IndicatorConfig, IndicatorEngine},
    scanner::LiveScanner,
    stats::ApprovalCriteria,
    BuiltinDetector, EngineBuilder, Error, PatternEngine, PatternKind, Ratio, Result,
    DETECTOR_FAMILIES,
};

/// Which detectors run and how
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    /// snake_case kind names; empty enables every kind
    pub enabled: Vec<String>,
    pub min_strength: Option<Ratio>,
    pub validate_data: bool,
    /// Per-family parameter overrides, keyed by family name
    pub detectors: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            min_strength: None,
            validate_data: true,
            detectors: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub indicators: IndicatorConfig,
    pub patterns: PatternSettings,
    pub quality: QualityConfig,
    /// Second-tier filters; absent means quality rules only
    pub directional: Option<DirectionalFilters>,
    pub planner: TradePlanner,
    pub backtest: BacktestConfig,
    pub approval: ApprovalCriteria,
}

impl AnalysisConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.indicators.validate()?;
        self.quality.validate()?;
        if let Some(d) = &self.directional {
            d.validate()?;
        }
        self.backtest.validate()?;
        self.approval.validate()?;
        self.pattern_kinds()?;
        for family in self.patterns.detectors.keys() {
            if !DETECTOR_FAMILIES.contains(&family.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "unknown detector family '{family}'"
                )));
            }
        }
        self.detectors().map(|_| ())
    }

    /// Enabled kinds, in declaration order; every kind when none are listed
    pub fn pattern_kinds(&self) -> Result<Vec<PatternKind>> {
        if self.patterns.enabled.is_empty() {
            return Ok(PatternKind::ALL.to_vec());
        }
        let mut kinds = Vec::with_capacity(self.patterns.enabled.len());
        for name in &self.patterns.enabled {
            let kind: PatternKind = name.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// One detector per family needed by the enabled kinds
    pub fn detectors(&self) -> Result<Vec<BuiltinDetector>> {
        let mut detectors: Vec<BuiltinDetector> = Vec::new();
        for kind in self.pattern_kinds()? {
            let default = BuiltinDetector::for_kind(kind);
            let family = default.family();
            if detectors.iter().any(|d| d.family() == family) {
                continue;
            }
            let detector = match self.patterns.detectors.get(family) {
                Some(overrides) => {
                    let params: HashMap<&str, f64> =
                        overrides.iter().map(|(k, v)| (k.as_str(), *v)).collect();
                    BuiltinDetector::from_params(family, &params)?
                },
                None => default,
            };
            detectors.push(detector);
        }
        Ok(detectors)
    }

    pub fn engine(&self) -> Result<PatternEngine> {
        let mut builder = EngineBuilder::new()
            .indicators(IndicatorEngine::new(self.indicators.clone())?)
            .validate_data(self.patterns.validate_data);
        for detector in self.detectors()? {
            builder = builder.add_checked(detector)?;
        }
        builder = builder.only_patterns(self.pattern_kinds()?);
        if let Some(min) = self.patterns.min_strength {
            builder = builder.min_strength(min.get());
        }
        builder.build()
    }

    pub fn filter(&self) -> Result<SignalQualityFilter> {
        let filter = SignalQualityFilter::new(self.quality.clone())?;
        match &self.directional {
            Some(d) => filter.with_directional(d.clone()),
            None => Ok(filter),
        }
    }

    pub fn scanner(&self) -> Result<LiveScanner> {
        Ok(LiveScanner::new(
            self.engine()?,
            self.filter()?,
            self.planner.clone(),
        ))
    }
}
