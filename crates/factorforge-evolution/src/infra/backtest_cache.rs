//! Cached backtest oracle
//!
//! The backtest oracle is deterministic for a given expression, period and
//! dataset, so successful results are memoized. Keys hash the canonical
//! expression form, so formatting variants of one factor share an entry.
//! Failures are never cached.
//!
//! Hits and misses are exported as `factorforge_backtest_cache_hits_total`
//! and `factorforge_backtest_cache_misses_total` through the installed
//! `metrics` recorder; [`CachedBacktest::cache_stats`] reports the same
//! counts for this instance alone.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use factorforge_common::{BacktestMetrics, BacktestOracle, BacktestPeriod, EvaluationError};
use factorforge_expr::ExpressionParser;

/// Per-instance cache hit / miss counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Memoizing wrapper for any backtest oracle
pub struct CachedBacktest<B: BacktestOracle> {
    inner: B,
    parser: ExpressionParser,
    cache: DashMap<blake3::Hash, BacktestMetrics>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<B: BacktestOracle> CachedBacktest<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            parser: ExpressionParser::default(),
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Cache key; unparsable expressions fall back to their whitespace-free text
    fn key(&self, expression: &str, period: &BacktestPeriod) -> blake3::Hash {
        let canonical = match self.parser.parse(expression) {
            Ok(ast) => ast.canonical(),
            Err(_) => expression.chars().filter(|c| !c.is_whitespace()).collect(),
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(canonical.as_bytes());
        hasher.update(b"\x00");
        hasher.update(period.to_string().as_bytes());
        hasher.finalize()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        metrics::gauge!("factorforge_backtest_cache_entries", 0.0);
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<B: BacktestOracle> BacktestOracle for CachedBacktest<B> {
    async fn evaluate(
        &self,
        expression: &str,
        period: &BacktestPeriod,
    ) -> Result<BacktestMetrics, EvaluationError> {
        let key = self.key(expression, period);
        if let Some(cached) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::increment_counter!("factorforge_backtest_cache_hits_total");
            trace!(%expression, "Backtest cache hit");
            return Ok(cached.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("factorforge_backtest_cache_misses_total");
        let result = self.inner.evaluate(expression, period).await?;
        self.cache.insert(key, result.clone());
        metrics::gauge!("factorforge_backtest_cache_entries", self.cache.len() as f64);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicU32;

    struct CountingOracle {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl BacktestOracle for CountingOracle {
        async fn evaluate(
            &self,
            expression: &str,
            _period: &BacktestPeriod,
        ) -> Result<BacktestMetrics, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EvaluationError::Failed(expression.to_string()));
            }
            Ok(BacktestMetrics {
                rank_ic: Some(0.04),
                ..Default::default()
            })
        }
    }

    fn period(year: i32) -> BacktestPeriod {
        BacktestPeriod::new(
            NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_formatting_variants_share_an_entry() {
        let cached = CachedBacktest::new(CountingOracle {
            calls: AtomicU32::new(0),
            fail: false,
        });
        cached.evaluate("($close-$open)/$open", &period(2022)).await.unwrap();
        cached
            .evaluate("( $close - $open ) / $open", &period(2022))
            .await
            .unwrap();
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 1);

        // a different period is a different backtest
        cached.evaluate("($close-$open)/$open", &period(2023)).await.unwrap();
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);

        let stats = cached.cache_stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (2, 1, 2));
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let cached = CachedBacktest::new(CountingOracle {
            calls: AtomicU32::new(0),
            fail: true,
        });
        assert!(cached.evaluate("RANK($close)", &period(2022)).await.is_err());
        assert!(cached.evaluate("RANK($close)", &period(2022)).await.is_err());
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_cleared_cache_counts_fresh_misses() {
        let cached = CachedBacktest::new(CountingOracle {
            calls: AtomicU32::new(0),
            fail: false,
        });
        cached.evaluate("RANK($close)", &period(2022)).await.unwrap();
        cached.evaluate("RANK($close)", &period(2022)).await.unwrap();
        cached.clear_cache();
        cached.evaluate("RANK($close)", &period(2022)).await.unwrap();

        assert_eq!(
            cached.cache_stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 2,
            }
        );
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
    }
}
