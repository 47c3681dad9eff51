//! Sector reference ranges for plausibility checks.
//!
//! Benchmarks never feed a calculation directly: ratio ranges drive the
//! ratio-bound validation layer, and the typical WACC range only annotates
//! the cost-of-capital breakdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::SnapshotCache;
use crate::analysis::RatioKind;
use crate::config::BenchmarkConfig;
use crate::error::ValuationError;
use crate::types::Rate;
use crate::CoreResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl BenchmarkRange {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: Decimal) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorBenchmark {
    pub industry_code: String,
    pub name: String,
    pub ratio_ranges: BTreeMap<RatioKind, BenchmarkRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wacc_range: Option<BenchmarkRange>,
}

impl SectorBenchmark {
    pub fn range(&self, kind: RatioKind) -> Option<BenchmarkRange> {
        self.ratio_ranges.get(&kind).copied()
    }

    pub fn wacc_contains(&self, wacc: Rate) -> Option<bool> {
        self.wacc_range.map(|r| r.contains(wacc))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BenchmarkLookup {
    Available(SectorBenchmark),
    Unavailable(String),
}

impl BenchmarkLookup {
    pub fn benchmark(&self) -> Option<&SectorBenchmark> {
        match self {
            BenchmarkLookup::Available(b) => Some(b),
            BenchmarkLookup::Unavailable(_) => None,
        }
    }
}

/// A full reference dataset, keyed by normalized industry code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDataset {
    sectors: BTreeMap<String, SectorBenchmark>,
}

fn normalize_code(code: &str) -> String {
    code.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

impl BenchmarkDataset {
    pub fn new(sectors: impl IntoIterator<Item = SectorBenchmark>) -> Self {
        let sectors = sectors
            .into_iter()
            .map(|s| (normalize_code(&s.industry_code), s))
            .collect();
        Self { sectors }
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Case- and separator-insensitive lookup ("Consumer Defensive" ==
    /// "consumer_defensive").
    pub fn get(&self, industry_code: &str) -> Option<&SectorBenchmark> {
        self.sectors.get(&normalize_code(industry_code))
    }

    /// Reference ranges for the common sectors.
    pub fn builtin() -> Self {
        use RatioKind::*;

        let sector = |code: &str,
                      name: &str,
                      wacc: (Decimal, Decimal),
                      ranges: &[(RatioKind, Decimal, Decimal)]| SectorBenchmark {
            industry_code: code.to_string(),
            name: name.to_string(),
            ratio_ranges: ranges
                .iter()
                .map(|(k, lo, hi)| (*k, BenchmarkRange::new(*lo, *hi)))
                .collect(),
            wacc_range: Some(BenchmarkRange::new(wacc.0, wacc.1)),
        };

        Self::new([
            sector(
                "technology",
                "Technology",
                (dec!(0.08), dec!(0.12)),
                &[
                    (GrossMargin, dec!(0.30), dec!(0.85)),
                    (OperatingMargin, dec!(-0.10), dec!(0.45)),
                    (NetMargin, dec!(-0.15), dec!(0.40)),
                    (ReturnOnEquity, dec!(-0.20), dec!(0.60)),
                    (DebtToEquity, dec!(0.10), dec!(2.50)),
                    (CurrentRatio, dec!(0.80), dec!(5.00)),
                    (CapexIntensity, dec!(0.01), dec!(0.15)),
                ],
            ),
            sector(
                "healthcare",
                "Healthcare",
                (dec!(0.07), dec!(0.11)),
                &[
                    (GrossMargin, dec!(0.25), dec!(0.85)),
                    (OperatingMargin, dec!(-0.20), dec!(0.40)),
                    (NetMargin, dec!(-0.25), dec!(0.35)),
                    (ReturnOnEquity, dec!(-0.30), dec!(0.50)),
                    (DebtToEquity, dec!(0.10), dec!(2.50)),
                    (CurrentRatio, dec!(0.80), dec!(5.00)),
                    (CapexIntensity, dec!(0.01), dec!(0.12)),
                ],
            ),
            sector(
                "financial_services",
                "Financial Services",
                (dec!(0.07), dec!(0.11)),
                &[
                    (NetMargin, dec!(0.00), dec!(0.45)),
                    (ReturnOnEquity, dec!(0.00), dec!(0.25)),
                    (ReturnOnAssets, dec!(0.00), dec!(0.05)),
                    (DebtToEquity, dec!(1.00), dec!(15.00)),
                ],
            ),
            sector(
                "consumer_cyclical",
                "Consumer Cyclical",
                (dec!(0.07), dec!(0.11)),
                &[
                    (GrossMargin, dec!(0.15), dec!(0.60)),
                    (OperatingMargin, dec!(-0.05), dec!(0.25)),
                    (NetMargin, dec!(-0.10), dec!(0.20)),
                    (ReturnOnEquity, dec!(-0.20), dec!(0.50)),
                    (DebtToEquity, dec!(0.20), dec!(4.00)),
                    (CurrentRatio, dec!(0.60), dec!(3.00)),
                    (CapexIntensity, dec!(0.01), dec!(0.15)),
                ],
            ),
            sector(
                "consumer_defensive",
                "Consumer Defensive",
                (dec!(0.06), dec!(0.09)),
                &[
                    (GrossMargin, dec!(0.15), dec!(0.65)),
                    (OperatingMargin, dec!(0.00), dec!(0.30)),
                    (NetMargin, dec!(-0.05), dec!(0.20)),
                    (ReturnOnEquity, dec!(0.00), dec!(0.60)),
                    (DebtToEquity, dec!(0.30), dec!(4.00)),
                    (CurrentRatio, dec!(0.50), dec!(2.50)),
                    (CapexIntensity, dec!(0.01), dec!(0.10)),
                ],
            ),
            sector(
                "industrials",
                "Industrials",
                (dec!(0.07), dec!(0.10)),
                &[
                    (GrossMargin, dec!(0.15), dec!(0.50)),
                    (OperatingMargin, dec!(0.00), dec!(0.25)),
                    (NetMargin, dec!(-0.05), dec!(0.18)),
                    (ReturnOnEquity, dec!(-0.10), dec!(0.40)),
                    (DebtToEquity, dec!(0.30), dec!(3.50)),
                    (CurrentRatio, dec!(0.80), dec!(3.00)),
                    (CapexIntensity, dec!(0.01), dec!(0.12)),
                ],
            ),
            sector(
                "energy",
                "Energy",
                (dec!(0.08), dec!(0.12)),
                &[
                    (GrossMargin, dec!(0.10), dec!(0.60)),
                    (OperatingMargin, dec!(-0.20), dec!(0.40)),
                    (NetMargin, dec!(-0.30), dec!(0.30)),
                    (ReturnOnEquity, dec!(-0.30), dec!(0.40)),
                    (DebtToEquity, dec!(0.20), dec!(3.00)),
                    (CurrentRatio, dec!(0.60), dec!(3.00)),
                    (CapexIntensity, dec!(0.03), dec!(0.40)),
                ],
            ),
            sector(
                "utilities",
                "Utilities",
                (dec!(0.05), dec!(0.08)),
                &[
                    (OperatingMargin, dec!(0.05), dec!(0.35)),
                    (NetMargin, dec!(0.00), dec!(0.25)),
                    (ReturnOnEquity, dec!(0.00), dec!(0.15)),
                    (DebtToEquity, dec!(1.00), dec!(5.00)),
                    (CurrentRatio, dec!(0.40), dec!(1.80)),
                    (CapexIntensity, dec!(0.10), dec!(0.60)),
                ],
            ),
            sector(
                "real_estate",
                "Real Estate",
                (dec!(0.06), dec!(0.09)),
                &[
                    (OperatingMargin, dec!(0.00), dec!(0.60)),
                    (NetMargin, dec!(-0.20), dec!(0.60)),
                    (ReturnOnEquity, dec!(-0.10), dec!(0.20)),
                    (DebtToEquity, dec!(0.50), dec!(5.00)),
                ],
            ),
            sector(
                "basic_materials",
                "Basic Materials",
                (dec!(0.07), dec!(0.11)),
                &[
                    (GrossMargin, dec!(0.10), dec!(0.50)),
                    (OperatingMargin, dec!(-0.10), dec!(0.35)),
                    (NetMargin, dec!(-0.15), dec!(0.25)),
                    (ReturnOnEquity, dec!(-0.20), dec!(0.35)),
                    (DebtToEquity, dec!(0.20), dec!(3.00)),
                    (CurrentRatio, dec!(0.80), dec!(4.00)),
                    (CapexIntensity, dec!(0.03), dec!(0.25)),
                ],
            ),
            sector(
                "communication_services",
                "Communication Services",
                (dec!(0.07), dec!(0.10)),
                &[
                    (GrossMargin, dec!(0.30), dec!(0.80)),
                    (OperatingMargin, dec!(-0.10), dec!(0.40)),
                    (NetMargin, dec!(-0.15), dec!(0.35)),
                    (ReturnOnEquity, dec!(-0.20), dec!(0.40)),
                    (DebtToEquity, dec!(0.20), dec!(3.50)),
                    (CurrentRatio, dec!(0.50), dec!(3.00)),
                    (CapexIntensity, dec!(0.02), dec!(0.25)),
                ],
            ),
        ])
    }
}

// ---------------------------------------------------------------------------
// Source and provider
// ---------------------------------------------------------------------------

/// Where the reference dataset is (re)loaded from.
#[async_trait]
pub trait BenchmarkSource: Send + Sync {
    async fn fetch_dataset(&self) -> CoreResult<BenchmarkDataset>;
}

#[async_trait]
impl BenchmarkSource for BenchmarkDataset {
    async fn fetch_dataset(&self) -> CoreResult<BenchmarkDataset> {
        Ok(self.clone())
    }
}

pub struct SectorBenchmarkProvider {
    source: Arc<dyn BenchmarkSource>,
    cache: SnapshotCache<BenchmarkDataset>,
    config: BenchmarkConfig,
}

impl SectorBenchmarkProvider {
    pub fn new(source: Arc<dyn BenchmarkSource>, config: BenchmarkConfig) -> Self {
        Self {
            cache: SnapshotCache::new(config.ttl()),
            source,
            config,
        }
    }

    /// Provider serving [`BenchmarkDataset::builtin`].
    pub fn builtin(config: BenchmarkConfig) -> Self {
        Self::new(Arc::new(BenchmarkDataset::builtin()), config)
    }

    /// Never fails: refresh problems fall back to the stale snapshot when
    /// one exists, otherwise the lookup is `Unavailable`.
    pub async fn lookup(&self, industry_code: &str) -> BenchmarkLookup {
        let served = self
            .cache
            .get_or_refresh(|| async {
                match tokio::time::timeout(self.config.timeout(), self.source.fetch_dataset()).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ValuationError::DataUnavailable(format!(
                        "benchmark refresh timed out after {} ms",
                        self.config.timeout_ms
                    ))),
                }
            })
            .await;

        let snapshot = match served {
            Ok(served) => served.snapshot,
            Err(e) => match self.cache.current().await {
                Some(stale) => {
                    warn!(
                        error = %e,
                        age_secs = stale.age().as_secs(),
                        "benchmark refresh failed, serving stale dataset"
                    );
                    stale
                }
                None => {
                    warn!(error = %e, "benchmark refresh failed, no dataset cached");
                    return BenchmarkLookup::Unavailable(format!(
                        "benchmark dataset unavailable: {e}"
                    ));
                }
            },
        };

        match snapshot.value.get(industry_code) {
            Some(b) => {
                debug!(industry_code, sector = %b.name, "sector benchmark found");
                BenchmarkLookup::Available(b.clone())
            }
            None => BenchmarkLookup::Unavailable(format!(
                "no benchmark for industry '{industry_code}'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakySource {
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BenchmarkSource for FlakySource {
        async fn fetch_dataset(&self) -> CoreResult<BenchmarkDataset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(ValuationError::DataUnavailable("503".into()))
            } else {
                Ok(BenchmarkDataset::builtin())
            }
        }
    }

    fn flaky(fail: bool) -> Arc<FlakySource> {
        Arc::new(FlakySource {
            fail: AtomicBool::new(fail),
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_builtin_lookup_case_insensitive() {
        let data = BenchmarkDataset::builtin();
        assert!(data.len() >= 10);
        let a = data.get("Technology").unwrap();
        let b = data.get("TECHNOLOGY").unwrap();
        assert_eq!(a, b);
        assert!(data.get("consumer defensive").is_some());
        assert!(data.get("Consumer-Defensive").is_some());
        assert!(data.get("underwater basket weaving").is_none());
    }

    #[test]
    fn test_ranges_well_formed() {
        for sector in BenchmarkDataset::builtin().sectors.values() {
            for (kind, range) in &sector.ratio_ranges {
                assert!(range.min < range.max, "{} {kind}", sector.name);
            }
            let wacc = sector.wacc_range.unwrap();
            assert!(wacc.min >= dec!(0.05) && wacc.max <= dec!(0.25));
        }
    }

    #[tokio::test]
    async fn test_provider_lookup() {
        let provider = SectorBenchmarkProvider::builtin(BenchmarkConfig::default());
        let lookup = provider.lookup("technology").await;
        let benchmark = lookup.benchmark().unwrap();
        assert_eq!(benchmark.wacc_contains(dec!(0.10)), Some(true));
        assert!(matches!(
            provider.lookup("nope").await,
            BenchmarkLookup::Unavailable(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_dataset_served_when_refresh_fails() {
        let source = flaky(false);
        let config = BenchmarkConfig::default();
        let provider = SectorBenchmarkProvider::new(source.clone(), config.clone());
        assert!(provider.lookup("energy").await.benchmark().is_some());

        source.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(config.ttl() + Duration::from_secs(1)).await;
        assert!(provider.lookup("energy").await.benchmark().is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable_without_any_dataset() {
        let provider = SectorBenchmarkProvider::new(flaky(true), BenchmarkConfig::default());
        match provider.lookup("energy").await {
            BenchmarkLookup::Unavailable(reason) => assert!(reason.contains("503")),
            other => panic!("expected unavailable, got {other:?}"),
        }
    }
}
