//! Risk-free rate with live/fallback provenance.
//!
//! [`MacroRateProvider::get_rate`] always returns a quote. Source failures,
//! timeouts and implausible values are logged and answered with the
//! configured static rate marked [`RateSource::Fallback`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::SnapshotCache;
use crate::config::RateProviderConfig;
use crate::error::ValuationError;
use crate::types::Rate;
use crate::CoreResult;

/// A rate as published by a live source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    /// Decimal (0.045) or percent (4.5) form; percent is normalized
    pub rate: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Live source of the risk-free rate (e.g. a 10-year treasury yield feed).
#[async_trait]
pub trait RiskFreeSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_rate(&self) -> CoreResult<RateObservation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Live,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub rate: Rate,
    pub source: RateSource,
    pub as_of: DateTime<Utc>,
    pub from_cache: bool,
    /// Why the fallback was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RateQuote {
    pub fn live(rate: Rate, as_of: DateTime<Utc>) -> Self {
        Self {
            rate,
            source: RateSource::Live,
            as_of,
            from_cache: false,
            reason: None,
        }
    }

    pub fn fallback(rate: Rate, reason: impl Into<String>) -> Self {
        Self {
            rate,
            source: RateSource::Fallback,
            as_of: Utc::now(),
            from_cache: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == RateSource::Fallback
    }
}

pub struct MacroRateProvider {
    source: Option<Arc<dyn RiskFreeSource>>,
    cache: SnapshotCache<RateObservation>,
    config: RateProviderConfig,
}

impl MacroRateProvider {
    pub fn new(source: Arc<dyn RiskFreeSource>, config: RateProviderConfig) -> Self {
        Self {
            cache: SnapshotCache::new(config.ttl()),
            source: Some(source),
            config,
        }
    }

    /// Provider with no live feed: every quote is the documented fallback.
    pub fn offline(config: RateProviderConfig) -> Self {
        Self {
            cache: SnapshotCache::new(config.ttl()),
            source: None,
            config,
        }
    }

    pub async fn get_rate(&self) -> RateQuote {
        let Some(source) = self.source.as_ref() else {
            return RateQuote::fallback(self.config.fallback_rate, "no live source configured");
        };

        let served = self
            .cache
            .get_or_refresh(|| self.fetch_checked(source.as_ref()))
            .await;

        match served {
            Ok(served) => {
                let obs = &served.snapshot.value;
                debug!(
                    source = source.name(),
                    rate = %obs.rate,
                    from_cache = served.from_cache,
                    "risk-free rate"
                );
                RateQuote {
                    from_cache: served.from_cache,
                    ..RateQuote::live(obs.rate, obs.as_of)
                }
            }
            Err(e) => {
                warn!(
                    source = source.name(),
                    error = %e,
                    fallback = %self.config.fallback_rate,
                    "risk-free source failed, using fallback"
                );
                RateQuote::fallback(self.config.fallback_rate, e.to_string())
            }
        }
    }

    /// Fetch under the timeout and reject implausible values so they never
    /// reach the cache.
    async fn fetch_checked(&self, source: &dyn RiskFreeSource) -> CoreResult<RateObservation> {
        let fetched = tokio::time::timeout(self.config.timeout(), source.fetch_rate())
            .await
            .map_err(|_| {
                ValuationError::DataUnavailable(format!(
                    "{} timed out after {} ms",
                    source.name(),
                    self.config.timeout_ms
                ))
            })??;

        let rate = normalize_percent(fetched.rate);
        if rate < self.config.plausible_min || rate > self.config.plausible_max {
            return Err(ValuationError::DataUnavailable(format!(
                "{} quoted implausible rate {rate}",
                source.name()
            )));
        }
        Ok(RateObservation {
            rate,
            as_of: fetched.as_of,
        })
    }
}

/// Sources quoting in percent (4.25) are brought to decimal form (0.0425).
fn normalize_percent(rate: Decimal) -> Decimal {
    if rate.abs() > Decimal::ONE {
        rate / Decimal::ONE_HUNDRED
    } else {
        rate
    }
}
