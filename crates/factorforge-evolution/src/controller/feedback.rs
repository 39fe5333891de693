//! Backtest feedback
//!
//! Step five of a trajectory cycle: compare a backtested candidate with its
//! trajectory's history and name what held it back. The summary is stored
//! with the record and later becomes the failure signal of a mutation.

use factorforge_common::{BacktestMetrics, FeedbackSummary, FeedbackVerdict, MetricKind};

/// Metrics the summary reports on, most important first
const WATCHED: [MetricKind; 4] = [
    MetricKind::RankIc,
    MetricKind::RankIcir,
    MetricKind::Ic,
    MetricKind::InformationRatio,
];

/// Drawdown beyond which the summary calls it out
const DRAWDOWN_ALERT: f64 = -0.3;

/// Summarize a backtest against the trajectory's earlier fitness values
pub fn summarize(metrics: &BacktestMetrics, fitness: f64, history: &[f64]) -> FeedbackSummary {
    let reference_fitness = history.iter().copied().reduce(f64::max);
    let verdict = match reference_fitness {
        None => FeedbackVerdict::Baseline,
        Some(best) if fitness >= best => FeedbackVerdict::Improved,
        Some(_) => FeedbackVerdict::Degraded,
    };

    let mut signals = Vec::new();
    match (verdict, reference_fitness) {
        (FeedbackVerdict::Degraded, Some(best)) => {
            signals.push(format!("fitness fell from {:.4} to {:.4}", best, fitness))
        }
        (FeedbackVerdict::Improved, Some(best)) => {
            signals.push(format!("fitness rose from {:.4} to {:.4}", best, fitness))
        }
        _ => signals.push(format!("baseline fitness {:.4}", fitness)),
    }

    let weakest_metric = weakest(metrics);
    for kind in WATCHED {
        match metrics.get(kind) {
            None => signals.push(format!("{} is missing", kind)),
            Some(value) if value < 0.0 => signals.push(format!("{} is negative ({:.4})", kind, value)),
            Some(_) => {}
        }
    }
    if let Some(mdd) = metrics.get(MetricKind::MaxDrawdown) {
        if mdd < DRAWDOWN_ALERT {
            signals.push(format!("max drawdown {:.1}%", mdd * 100.0));
        }
    }
    if let Some(kind) = weakest_metric {
        signals.push(format!("{} is the weakest component", kind));
    }

    FeedbackSummary {
        verdict,
        fitness,
        reference_fitness,
        weakest_metric,
        signals,
    }
}

/// The fitness component holding the score down: a missing or
/// non-positive Rank IC first, then its stability
fn weakest(metrics: &BacktestMetrics) -> Option<MetricKind> {
    let rank_ic = metrics.get(MetricKind::RankIc);
    let rank_icir = metrics.get(MetricKind::RankIcir);
    match (rank_ic, rank_icir) {
        (None, _) => Some(MetricKind::RankIc),
        (Some(ic), _) if ic <= 0.0 => Some(MetricKind::RankIc),
        (_, None) => Some(MetricKind::RankIcir),
        (_, Some(ir)) if ir <= 0.0 => Some(MetricKind::RankIcir),
        (Some(ic), Some(ir)) if ic < ir.sqrt() => Some(MetricKind::RankIc),
        _ => Some(MetricKind::RankIcir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(rank_ic: f64, rank_icir: f64) -> BacktestMetrics {
        BacktestMetrics {
            ic: Some(rank_ic),
            rank_ic: Some(rank_ic),
            rank_icir: Some(rank_icir),
            information_ratio: Some(0.4),
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline() {
        let summary = summarize(&metrics(0.05, 0.64), 0.04, &[]);
        assert_eq!(summary.verdict, FeedbackVerdict::Baseline);
        assert_eq!(summary.reference_fitness, None);
        assert_eq!(summary.signals[0], "baseline fitness 0.0400");
    }

    #[test]
    fn test_degraded_names_failure() {
        let summary = summarize(&metrics(-0.01, 0.2), 0.0, &[0.02, 0.04]);
        assert!(summary.is_degraded());
        assert_eq!(summary.reference_fitness, Some(0.04));
        assert_eq!(summary.weakest_metric, Some(MetricKind::RankIc));
        let signal = summary.failure_signal();
        assert!(signal.starts_with("fitness fell from 0.0400 to 0.0000"));
        assert!(signal.contains("RankIC is negative"));
    }

    #[test]
    fn test_improved_and_missing() {
        let partial = BacktestMetrics {
            rank_ic: Some(0.06),
            max_drawdown: Some(-0.45),
            ..Default::default()
        };
        let summary = summarize(&partial, 0.05, &[0.01]);
        assert_eq!(summary.verdict, FeedbackVerdict::Improved);
        assert_eq!(summary.weakest_metric, Some(MetricKind::RankIcir));
        assert!(summary.signals.iter().any(|s| s == "RankICIR is missing"));
        assert!(summary.signals.iter().any(|s| s == "max drawdown -45.0%"));
    }
}
