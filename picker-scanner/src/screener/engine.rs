//! Scanner/ranker engine.
//!
//! Turns a frozen [`MarketBatch`] into ranked buckets and scored
//! opportunities. Synchronous and pure: the same batch and settings always
//! produce the same outcome.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalyst::{CatalystClassifier, KeywordClassifier};
use crate::data::{Bar, MarketBatch, SymbolSnapshot};
use crate::error::ScanError;
use crate::indicators::{compute_atr, compute_relative_strength, rank_percentile, TechnicalIndicators};
use crate::result::{
    AtrEntry, CatalystEntry, DeviationEntry, ExcludedSymbol, Opportunity, ScanOutcome,
    StrengthEntry, VolumeEntry,
};

use super::config::ScanSettings;
use super::filter::{filter, filter_by_volatility, FilterCriteria, FilterStage, FilterStageResult};
use super::scoring::{score_candidate, Candidate};

/// Raw per-symbol indicator values before cross-sectional ranking.
struct RawIndicators {
    atr: f64,
    atr_pct: f64,
    relative_strength: f64,
}

/// Bucket entries produced for one candidate.
struct CandidateEntries {
    deviation: DeviationEntry,
    volume: Option<VolumeEntry>,
    atr: Option<AtrEntry>,
    strength: Option<StrengthEntry>,
    catalyst: Option<CatalystEntry>,
    opportunity: Option<Opportunity>,
}

/// Descending by metric, ties by symbol ascending.
fn by_metric_desc(a: (f64, &str), b: (f64, &str)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(b.1))
}

// ============================================================================
// Scanner Ranker
// ============================================================================

/// The ranking engine.
///
/// Runs, in order:
/// 1. Snapshot validation and the universe filter
/// 2. Indicators, ATR ratio, RS percentile, volatility filter
/// 3. Catalyst classification
/// 4. Buckets and composite scores
pub struct ScannerRanker {
    settings: ScanSettings,
    classifier: Arc<dyn CatalystClassifier>,
}

impl ScannerRanker {
    pub fn new(settings: ScanSettings) -> Self {
        Self::with_classifier(settings, Arc::new(KeywordClassifier::new()))
    }

    pub fn with_classifier(settings: ScanSettings, classifier: Arc<dyn CatalystClassifier>) -> Self {
        Self {
            settings,
            classifier,
        }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Rank a batch.
    pub fn scan(&self, batch: &MarketBatch, criteria: &FilterCriteria) -> ScanOutcome {
        let mut excluded = batch.excluded.clone();
        let mut filter_stages = Vec::with_capacity(3);

        // Phase 1: validation + universe filter
        let mut valid: Vec<SymbolSnapshot> = Vec::with_capacity(batch.len());
        for data in batch.symbols.values() {
            match data.snapshot.validate() {
                Ok(()) => valid.push(data.snapshot.clone()),
                Err(e) => {
                    warn!(symbol = %data.snapshot.symbol, error = %e, "Rejected snapshot");
                    excluded.push(ExcludedSymbol::from_error(
                        &data.snapshot.symbol,
                        "validation",
                        &e,
                    ));
                }
            }
        }
        filter_stages.push(FilterStageResult::new(
            FilterStage::Validation,
            batch.len(),
            valid.len(),
        ));

        let passed = filter(&valid, criteria);
        filter_stages.push(FilterStageResult::new(
            FilterStage::Universe,
            valid.len(),
            passed.len(),
        ));
        info!(
            passed = passed.len(),
            eliminated = valid.len() - passed.len(),
            "Phase 1 (Universe filter) complete"
        );

        // Phase 2: indicators
        let mut raw: BTreeMap<String, RawIndicators> = BTreeMap::new();
        for snapshot in &passed {
            let symbol = snapshot.symbol.as_str();
            let Some(data) = batch.get(symbol) else {
                continue;
            };
            match self.compute_raw(snapshot, &data.bars.bars) {
                Ok(values) => {
                    raw.insert(symbol.to_string(), values);
                }
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Indicators unavailable");
                    excluded.push(ExcludedSymbol::from_error(symbol, "indicators", &e));
                }
            }
        }

        let mean_atr_pct = if raw.is_empty() {
            0.0
        } else {
            raw.values().map(|r| r.atr_pct).sum::<f64>() / raw.len() as f64
        };
        let strengths: BTreeMap<String, f64> = raw
            .iter()
            .map(|(s, r)| (s.clone(), r.relative_strength))
            .collect();
        let percentiles = rank_percentile(&strengths);

        let candidates: Vec<Candidate> = passed
            .into_iter()
            .map(|snapshot| {
                let indicators = raw.get(&snapshot.symbol).and_then(|r| {
                    let rs_percentile = percentiles.get(&snapshot.symbol).copied()?;
                    Some(TechnicalIndicators {
                        atr: r.atr,
                        atr_pct: r.atr_pct,
                        atr_sector_ratio: if mean_atr_pct > 0.0 {
                            r.atr_pct / mean_atr_pct
                        } else {
                            1.0
                        },
                        relative_strength: r.relative_strength,
                        rs_percentile,
                    })
                });
                Candidate {
                    indicators,
                    ..Candidate::new(snapshot)
                }
            })
            .collect();

        let before_volatility = candidates.len();
        let candidates = filter_by_volatility(&candidates, criteria);
        filter_stages.push(FilterStageResult::new(
            FilterStage::Volatility,
            before_volatility,
            candidates.len(),
        ));
        info!(
            passed = candidates.len(),
            with_indicators = raw.len(),
            "Phase 2 (Indicators + volatility) complete"
        );

        // Phase 3: catalysts
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .map(|c| {
                let news = batch
                    .get(c.symbol())
                    .map(|d| d.news.as_slice())
                    .unwrap_or(&[]);
                let catalyst = self.classifier.classify(c.symbol(), news);
                Candidate { catalyst, ..c }
            })
            .collect();
        let with_catalyst = candidates.iter().filter(|c| c.catalyst.has_catalyst).count();
        info!(
            classifier = self.classifier.name(),
            with_catalyst,
            "Phase 3 (Catalysts) complete"
        );

        // Phase 4: buckets + scores
        let mut outcome = self.rank(&candidates, &mut excluded);
        outcome.candidates = candidates.len();
        outcome.indicators = candidates
            .iter()
            .filter_map(|c| {
                c.indicators
                    .clone()
                    .map(|ind| (c.symbol().to_string(), ind))
            })
            .collect();
        outcome.excluded = excluded;
        outcome.filter_stages = filter_stages;

        info!(
            opportunities = outcome.opportunities.len(),
            excluded = outcome.excluded.len(),
            "Phase 4 (Ranking) complete"
        );

        outcome
    }

    fn compute_raw(
        &self,
        snapshot: &SymbolSnapshot,
        bars: &[Bar],
    ) -> Result<RawIndicators, ScanError> {
        let atr = compute_atr(bars, self.settings.atr_period)?;
        let relative_strength =
            compute_relative_strength(bars, self.settings.rs_lookback_weeks, self.settings.rs_mode)?;
        let atr_pct = atr / snapshot.current_price * 100.0;

        if !atr_pct.is_finite() || !relative_strength.is_finite() {
            return Err(ScanError::DataUnavailable {
                symbol: snapshot.symbol.clone(),
                reason: "indicator value is not finite".into(),
            });
        }

        Ok(RawIndicators {
            atr,
            atr_pct,
            relative_strength,
        })
    }

    fn rank_one(&self, c: &Candidate) -> Result<CandidateEntries, ScanError> {
        let symbol = c.symbol();
        let snap = &c.snapshot;
        let price = snap.current_price;

        let volume = c
            .relative_volume()
            .filter(|rel| *rel >= self.settings.volume_bucket_min)
            .map(|rel| VolumeEntry::new(symbol, price, rel, snap.volume, snap.avg_volume_20d))
            .transpose()?;

        let atr = c
            .indicators
            .as_ref()
            .filter(|ind| ind.atr_sector_ratio >= self.settings.atr_bucket_min_ratio)
            .map(|ind| AtrEntry::new(symbol, price, ind.atr, ind.atr_pct, ind.atr_sector_ratio))
            .transpose()?;

        let strength = c
            .indicators
            .as_ref()
            .map(|ind| StrengthEntry::new(symbol, price, ind.relative_strength, ind.rs_percentile))
            .transpose()?;

        let catalyst = if c.catalyst.has_catalyst {
            Some(CatalystEntry::new(symbol, price, &c.catalyst)?)
        } else {
            None
        };

        let opportunity = if c.catalyst.is_disqualifying() {
            debug!(symbol = %symbol, "Merger activity, not an opportunity");
            None
        } else {
            Some(Opportunity::new(c, score_candidate(c, &self.settings))?)
        };

        Ok(CandidateEntries {
            deviation: DeviationEntry::new(symbol, price, c.deviation_pct())?,
            volume,
            atr,
            strength,
            catalyst,
            opportunity,
        })
    }

    fn rank(&self, candidates: &[Candidate], excluded: &mut Vec<ExcludedSymbol>) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        for c in candidates {
            match self.rank_one(c) {
                Ok(entries) => {
                    outcome.deviation_results.push(entries.deviation);
                    outcome.volume_results.extend(entries.volume);
                    outcome.atr_results.extend(entries.atr);
                    outcome.strength_results.extend(entries.strength);
                    outcome.catalyst_results.extend(entries.catalyst);
                    outcome.opportunities.extend(entries.opportunity);
                }
                Err(e) => {
                    warn!(symbol = %c.symbol(), error = %e, "Dropped from ranking");
                    excluded.push(ExcludedSymbol::from_error(c.symbol(), "ranking", &e));
                }
            }
        }

        outcome.deviation_results.sort_by(|a, b| {
            by_metric_desc(
                (a.deviation_pct.abs(), a.symbol.as_str()),
                (b.deviation_pct.abs(), b.symbol.as_str()),
            )
        });
        outcome.volume_results.sort_by(|a, b| {
            by_metric_desc(
                (a.relative_volume, a.symbol.as_str()),
                (b.relative_volume, b.symbol.as_str()),
            )
        });
        outcome.atr_results.sort_by(|a, b| {
            by_metric_desc((a.atr_pct, a.symbol.as_str()), (b.atr_pct, b.symbol.as_str()))
        });
        outcome.catalyst_results.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        outcome.strength_results.sort_by(|a, b| {
            by_metric_desc(
                (a.rs_percentile, a.symbol.as_str()),
                (b.rs_percentile, b.symbol.as_str()),
            )
        });
        outcome.opportunities.sort_by(|a, b| {
            by_metric_desc((a.score, a.symbol.as_str()), (b.score, b.symbol.as_str()))
        });

        outcome
    }
}

/// Rank a batch with the default keyword classifier.
pub fn scan(batch: &MarketBatch, criteria: &FilterCriteria, settings: &ScanSettings) -> ScanOutcome {
    ScannerRanker::new(settings.clone()).scan(batch, criteria)
}
