//! Report generation for scan results.
//!
//! Generates reports in two formats:
//! - Markdown (for humans)
//! - JSON (the `ScanResult` verbatim, for consumers)

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use picker_common::error::{Error, Result, ResultExt};

use crate::result::ScanResult;

/// Opportunities listed in the markdown table.
const MAX_MARKDOWN_ROWS: usize = 50;

/// Rows per bucket in the markdown report.
const MAX_BUCKET_ROWS: usize = 10;

// ============================================================================
// Report Format
// ============================================================================

/// Supported report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Markdown format (human-readable)
    Markdown,
    /// JSON format (machine-readable)
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

// ============================================================================
// Scan Report
// ============================================================================

/// Report generator for one scan result.
pub struct ScanReport {
    result: Arc<ScanResult>,
}

impl ScanReport {
    pub fn new(result: Arc<ScanResult>) -> Self {
        Self { result }
    }

    /// Generate report in the specified format.
    pub fn generate(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// Save report to file, adding the format's extension when `path` has none.
    pub fn save_to_file(&self, path: &Path, format: ReportFormat) -> Result<PathBuf> {
        let content = self.generate(format);

        let file_path = if path.extension().is_none() {
            path.with_extension(format.extension())
        } else {
            path.to_path_buf()
        };

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create report directory")?;
        }

        std::fs::write(&file_path, content)
            .context(format!("Failed to write report {}", file_path.display()))?;

        Ok(file_path)
    }

    /// Save one file per format into `dir`, named after the scan time.
    pub fn save_all(&self, dir: &Path, formats: &[ReportFormat]) -> Result<Vec<PathBuf>> {
        if formats.is_empty() {
            return Err(Error::InvalidInput("no report formats given".into()));
        }
        let stem = format!("scan_{}", self.result.timestamp.format("%Y%m%d_%H%M%S"));
        formats
            .iter()
            .map(|format| self.save_to_file(&dir.join(&stem), *format))
            .collect()
    }

    /// Generate markdown report.
    pub fn to_markdown(&self) -> String {
        let r = &self.result;
        let mut md = String::new();

        md.push_str(&format!(
            "# Scan Report\n\n**Scan ID**: {}\n**Version**: {}\n**Time**: {}\n**Duration**: {}ms\n\n",
            r.scan_id,
            r.version,
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.duration_ms
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Universe**: {} symbols\n", r.universe_size));
        md.push_str(&format!("- **Candidates**: {}\n", r.candidates));
        md.push_str(&format!("- **Opportunities**: {}\n", r.opportunities.len()));
        md.push_str(&format!("- **Excluded**: {}\n", r.excluded.len()));
        if r.plans_blocked {
            md.push_str("- **Trade plans**: withheld by daily risk limits\n");
        }
        md.push('\n');

        if !r.filter_stages.is_empty() {
            md.push_str("### Filter Funnel\n\n");
            md.push_str("| Stage | Input | Passed | Eliminated | Rate |\n");
            md.push_str("|-------|-------|--------|------------|------|\n");
            for fs in &r.filter_stages {
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {:.1}% |\n",
                    fs.stage, fs.input, fs.passed, fs.eliminated, fs.elimination_rate
                ));
            }
            md.push('\n');
        }

        md.push_str("## Opportunities\n\n");
        if r.opportunities.is_empty() {
            md.push_str("_None_\n\n");
        } else {
            md.push_str("| Symbol | Score | Price | Dev% | Dir | RelVol | ATR% | RS Pct | Catalyst |\n");
            md.push_str("|--------|-------|-------|------|-----|--------|------|--------|----------|\n");
            for opp in r.opportunities.iter().take(MAX_MARKDOWN_ROWS) {
                let catalyst = opp
                    .catalyst
                    .as_ref()
                    .map(|c| {
                        c.catalyst_types
                            .iter()
                            .map(|t| t.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| "-".to_string());
                md.push_str(&format!(
                    "| {} | {:.1} | {:.2} | {:+.2} | {} | {} | {} | {} | {} |\n",
                    opp.symbol,
                    opp.score,
                    opp.price,
                    opp.deviation_pct,
                    opp.direction,
                    fmt_opt(opp.relative_volume, 2),
                    fmt_opt(opp.atr_pct, 2),
                    fmt_opt(opp.rs_percentile, 0),
                    catalyst
                ));
            }
            md.push('\n');
        }

        let premarket: Vec<_> = r
            .opportunities
            .iter()
            .filter_map(|o| o.premarket_deviation_pct.map(|d| (o.symbol.as_str(), d)))
            .collect();
        if !premarket.is_empty() {
            md.push_str("## Pre-market Moves\n\n");
            for (symbol, dev) in premarket {
                md.push_str(&format!("- **{}**: {:+.2}%\n", symbol, dev));
            }
            md.push('\n');
        }

        let plans: Vec<_> = r
            .opportunities
            .iter()
            .filter_map(|o| o.trade_plan.as_ref())
            .collect();
        if !plans.is_empty() {
            md.push_str("## Trade Plans\n\n");
            md.push_str("| Symbol | Side | Entry | Stop | Target | Shares | Risk $ | Reward $ |\n");
            md.push_str("|--------|------|-------|------|--------|--------|--------|----------|\n");
            for plan in plans {
                md.push_str(&format!(
                    "| {} | {} | {:.2} | {:.2} | {:.2} | {} | {:.2} | {:.2} |\n",
                    plan.symbol,
                    plan.side,
                    plan.entry_price,
                    plan.stop_loss,
                    plan.take_profit,
                    plan.position_size,
                    plan.potential_loss,
                    plan.potential_profit
                ));
            }
            md.push('\n');
        }

        md.push_str("## Buckets\n\n");
        md.push_str(&bucket_line(
            "Deviation",
            r.deviation_results
                .iter()
                .map(|e| format!("{} ({:+.1}%)", e.symbol, e.deviation_pct)),
        ));
        md.push_str(&bucket_line(
            "Relative volume",
            r.volume_results
                .iter()
                .map(|e| format!("{} ({:.1}x)", e.symbol, e.relative_volume)),
        ));
        md.push_str(&bucket_line(
            "ATR",
            r.atr_results
                .iter()
                .map(|e| format!("{} ({:.1}%)", e.symbol, e.atr_pct)),
        ));
        md.push_str(&bucket_line(
            "Catalyst",
            r.catalyst_results.iter().map(|e| e.symbol.clone()),
        ));
        md.push_str(&bucket_line(
            "Strength",
            r.strength_results
                .iter()
                .map(|e| format!("{} ({:.0})", e.symbol, e.rs_percentile)),
        ));
        md.push('\n');

        if !r.excluded.is_empty() {
            md.push_str("## Excluded\n\n");
            for ex in &r.excluded {
                md.push_str(&format!("- {} [{}]: {}\n", ex.symbol, ex.stage, ex.reason));
            }
            md.push('\n');
        }

        md.push_str("---\n\n");
        md.push_str(&format!(
            "*Generated at {} UTC*\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        ));

        md
    }

    /// Generate JSON report.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self.result.as_ref()).unwrap_or_else(|_| "{}".to_string())
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn bucket_line(name: &str, items: impl Iterator<Item = String>) -> String {
    let items: Vec<String> = items.take(MAX_BUCKET_ROWS).collect();
    if items.is_empty() {
        format!("- **{}**: -\n", name)
    } else {
        format!("- **{}**: {}\n", name, items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalyst::{CatalystInfo, CatalystType};
    use crate::data::Direction;
    use crate::plan::{TradePlan, TradeSide};
    use crate::result::{DeviationEntry, ExcludedSymbol, Opportunity, ScanOutcome};
    use crate::screener::{FilterStage, FilterStageResult, ScoreComponents};

    fn create_test_result() -> Arc<ScanResult> {
        let mut catalyst = CatalystInfo::none();
        catalyst.has_catalyst = true;
        catalyst.catalyst_types.insert(CatalystType::Earnings);

        let outcome = ScanOutcome {
            candidates: 1,
            opportunities: vec![Opportunity {
                symbol: "AAA".into(),
                score: 82.5,
                components: ScoreComponents {
                    deviation_score: 40.0,
                    volume_score: 30.0,
                    technical_score: 2.5,
                    catalyst_score: 10.0,
                },
                price: 20.0,
                deviation_pct: 11.11,
                premarket_deviation_pct: Some(6.5),
                direction: Direction::Up,
                relative_volume: Some(4.0),
                atr_pct: Some(3.0),
                rs_percentile: Some(50.0),
                catalyst: Some(catalyst),
                trade_plan: Some(TradePlan {
                    symbol: "AAA".into(),
                    side: TradeSide::Long,
                    entry_price: 20.0,
                    stop_loss: 19.1,
                    take_profit: 21.8,
                    position_size: 55,
                    risk_per_share: 0.9,
                    risk_reward_ratio: 2.0,
                    potential_loss: 49.5,
                    potential_profit: 99.0,
                }),
            }],
            deviation_results: vec![DeviationEntry::new("AAA", 20.0, 11.11).unwrap()],
            excluded: vec![ExcludedSymbol::new("ZZZ", "fetch", "not found")],
            filter_stages: vec![FilterStageResult::new(FilterStage::Universe, 5, 1)],
            ..Default::default()
        };

        Arc::new(ScanResult::from_outcome("scan-1", 5, outcome, Utc::now(), 42))
    }

    #[test]
    fn test_markdown_generation() {
        let md = ScanReport::new(create_test_result()).to_markdown();

        assert!(md.contains("# Scan Report"));
        assert!(md.contains("| AAA | 82.5 | 20.00 | +11.11 | up |"));
        assert!(md.contains("Filter Funnel"));
        assert!(md.contains("## Trade Plans"));
        assert!(md.contains("- **AAA**: +6.50%"));
        assert!(md.contains("earnings"));
        assert!(md.contains("- ZZZ [fetch]: not found"));
        assert!(md.contains("- **ATR**: -"));
    }

    #[test]
    fn test_json_generation() {
        let json = ScanReport::new(create_test_result()).to_json();

        assert!(json.contains("\"scan_id\""));
        assert!(json.contains("\"opportunities\""));
        let parsed: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.opportunities[0].symbol, "AAA");
    }

    #[test]
    fn test_save_to_file_adds_extension() {
        let dir = tempfile::tempdir().unwrap();
        let report = ScanReport::new(create_test_result());

        let path = report
            .save_to_file(&dir.path().join("nested/report"), ReportFormat::Json)
            .unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));
        assert!(path.exists());

        let paths = report
            .save_all(dir.path(), &[ReportFormat::Markdown, ReportFormat::Json])
            .unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_save_all_requires_a_format() {
        let dir = tempfile::tempdir().unwrap();
        let report = ScanReport::new(create_test_result());

        let err = report.save_all(dir.path(), &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("markdown".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("telegram".parse::<ReportFormat>().is_err());
    }
}
