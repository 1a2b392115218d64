use serde::{Deserialize, Serialize};

use crate::trainer::evaluator::EvalReport;
use crate::trainer::settings::TrainerSettings;

/// A named comparator over evaluation reports that keeps its own best record.
pub trait SelectionRule {
    fn name(&self) -> &'static str;
    /// Snapshot file written when the rule accepts a report.
    fn file_name(&self) -> &'static str;
    /// Replaces the record and returns true when `report` beats it.
    fn consider(&mut self, report: &EvalReport, episode: usize) -> bool;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinishRateRecord {
    pub episode: usize,
    pub finishes: usize,
    pub finish_rate: f64,
}

/// Most finished evaluation episodes.
#[derive(Debug, Clone, Default)]
pub struct FinishRateRule {
    pub min_improvement: usize,
    pub record: Option<FinishRateRecord>,
}

impl SelectionRule for FinishRateRule {
    fn name(&self) -> &'static str {
        "finish rate"
    }

    fn file_name(&self) -> &'static str {
        "best_finish_rate.ot"
    }

    fn consider(&mut self, report: &EvalReport, episode: usize) -> bool {
        let accept = match &self.record {
            None => true,
            Some(best) => {
                report.finishes >= best.finishes + self.min_improvement
                    || (report.finish_rate > best.finish_rate && report.finishes > best.finishes)
            }
        };
        if accept {
            self.record = Some(FinishRateRecord {
                episode,
                finishes: report.finishes,
                finish_rate: report.finish_rate,
            });
        }
        accept
    }

    fn describe(&self) -> String {
        match &self.record {
            Some(r) => format!(
                "{:.0}% ({} finishes) @ ep {}",
                r.finish_rate * 100.0,
                r.finishes,
                r.episode
            ),
            None => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestTimeRecord {
    pub episode: usize,
    pub avg_steps_to_finish: f64,
}

/// Fewest mean steps to finish, among reports with at least one finish.
#[derive(Debug, Clone, Default)]
pub struct BestTimeRule {
    pub min_improvement: f64,
    pub record: Option<BestTimeRecord>,
}

impl SelectionRule for BestTimeRule {
    fn name(&self) -> &'static str {
        "best time"
    }

    fn file_name(&self) -> &'static str {
        "best_time.ot"
    }

    fn consider(&mut self, report: &EvalReport, episode: usize) -> bool {
        let steps = match report.avg_steps_to_finish {
            Some(steps) if report.finishes > 0 => steps,
            _ => return false,
        };
        let accept = match &self.record {
            None => true,
            Some(best) => best.avg_steps_to_finish - steps > self.min_improvement,
        };
        if accept {
            self.record = Some(BestTimeRecord { episode, avg_steps_to_finish: steps });
        }
        accept
    }

    fn describe(&self) -> String {
        match &self.record {
            Some(r) => format!("{:.0} steps @ ep {}", r.avg_steps_to_finish, r.episode),
            None => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestScoreRecord {
    pub episode: usize,
    pub score: f64,
    pub finish_rate: f64,
}

/// Highest mean evaluation score. A smaller score gain is enough when the
/// finish rate improves too, measured against this rule's own record.
#[derive(Debug, Clone, Default)]
pub struct BestScoreRule {
    pub min_improvement: f64,
    pub record: Option<BestScoreRecord>,
}

impl SelectionRule for BestScoreRule {
    fn name(&self) -> &'static str {
        "score"
    }

    fn file_name(&self) -> &'static str {
        "best_score.ot"
    }

    fn consider(&mut self, report: &EvalReport, episode: usize) -> bool {
        let accept = match &self.record {
            None => true,
            Some(best) => {
                report.avg_score - best.score > self.min_improvement
                    || (report.avg_score > best.score && report.finish_rate > best.finish_rate)
            }
        };
        if accept {
            self.record = Some(BestScoreRecord {
                episode,
                score: report.avg_score,
                finish_rate: report.finish_rate,
            });
        }
        accept
    }

    fn describe(&self) -> String {
        match &self.record {
            Some(r) => format!("{:.1} @ ep {}", r.score, r.episode),
            None => "-".to_string(),
        }
    }
}

/// Persisted form of the three records, stored in checkpoint metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecords {
    pub finish_rate: Option<FinishRateRecord>,
    pub time: Option<BestTimeRecord>,
    pub score: Option<BestScoreRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub rule: &'static str,
    pub file_name: &'static str,
    pub record: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub finish_rate: FinishRateRule,
    pub time: BestTimeRule,
    pub score: BestScoreRule,
}

impl ModelSelector {
    pub fn new(finish_margin: usize, time_margin: f64, score_margin: f64) -> Self {
        Self {
            finish_rate: FinishRateRule { min_improvement: finish_margin, record: None },
            time: BestTimeRule { min_improvement: time_margin, record: None },
            score: BestScoreRule { min_improvement: score_margin, record: None },
        }
    }

    pub fn from_settings(settings: &TrainerSettings) -> Self {
        Self::new(
            settings.finish_count_min_improvement,
            settings.time_min_improvement,
            settings.score_min_improvement,
        )
    }

    fn rules_mut(&mut self) -> [&mut dyn SelectionRule; 3] {
        [&mut self.finish_rate, &mut self.time, &mut self.score]
    }

    /// Offers `report` to every rule; the result lists the rules that
    /// accepted it, in a fixed order.
    pub fn update(&mut self, report: &EvalReport, episode: usize) -> Vec<Accepted> {
        self.rules_mut()
            .into_iter()
            .filter_map(|rule| {
                rule.consider(report, episode).then(|| Accepted {
                    rule: rule.name(),
                    file_name: rule.file_name(),
                    record: rule.describe(),
                })
            })
            .collect()
    }

    pub fn records(&self) -> SelectionRecords {
        SelectionRecords {
            finish_rate: self.finish_rate.record,
            time: self.time.record,
            score: self.score.record,
        }
    }

    pub fn restore(&mut self, records: &SelectionRecords) {
        self.finish_rate.record = records.finish_rate;
        self.time.record = records.time;
        self.score.record = records.score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(
        finishes: usize,
        episodes: usize,
        steps_to_finish: Option<f64>,
        score: f64,
    ) -> EvalReport {
        EvalReport {
            episodes,
            finishes,
            finish_rate: finishes as f64 / episodes as f64,
            avg_laps: 0.0,
            avg_steps_to_finish: steps_to_finish,
            avg_steps: 0.0,
            avg_wall_hits: 0.0,
            avg_grass_frames: 0.0,
            avg_score: score,
        }
    }

    fn names(accepted: &[Accepted]) -> Vec<&'static str> {
        accepted.iter().map(|a| a.file_name).collect()
    }

    #[test]
    fn test_first_report_without_finishes() {
        let mut selector = ModelSelector::new(2, 50.0, 500.0);
        let accepted = selector.update(&report(0, 20, None, -7500.0), 50);
        assert_eq!(names(&accepted), vec!["best_finish_rate.ot", "best_score.ot"]);
        assert!(selector.time.record.is_none());
    }

    #[test]
    fn test_finish_count_margin() {
        let mut rule = FinishRateRule { min_improvement: 2, record: None };
        assert!(rule.consider(&report(5, 20, Some(3000.0), 0.0), 50));
        // +1 finish with a higher rate still counts as strictly better on both.
        assert!(rule.consider(&report(6, 20, Some(3000.0), 0.0), 100));
        assert!(!rule.consider(&report(6, 20, Some(3000.0), 0.0), 150));
        assert!(!rule.consider(&report(4, 20, Some(3000.0), 0.0), 200));
        assert!(rule.consider(&report(8, 20, Some(3000.0), 0.0), 250));
        assert_eq!(rule.record.unwrap().episode, 250);
    }

    #[test]
    fn test_best_time_requires_margin_and_finishes() {
        let mut rule = BestTimeRule { min_improvement: 50.0, record: None };
        assert!(!rule.consider(&report(0, 20, None, 0.0), 50));
        assert!(rule.consider(&report(1, 20, Some(3000.0), 0.0), 100));
        assert!(!rule.consider(&report(3, 20, Some(2950.0), 0.0), 150));
        assert!(rule.consider(&report(3, 20, Some(2949.0), 0.0), 200));
        assert_eq!(rule.record.unwrap().avg_steps_to_finish, 2949.0);
    }

    #[test]
    fn test_score_margin_or_better_finish_rate() {
        let mut rule = BestScoreRule { min_improvement: 500.0, record: None };
        assert!(rule.consider(&report(0, 20, None, -5000.0), 50));
        assert!(!rule.consider(&report(0, 20, None, -4600.0), 100));
        assert!(rule.consider(&report(1, 20, Some(4000.0), -4900.0), 150));
        assert!(rule.consider(&report(1, 20, Some(4000.0), -4000.0), 200));
        assert!(!rule.consider(&report(1, 20, Some(4000.0), -4100.0), 250));
    }

    #[test]
    fn test_rules_are_independent() {
        let mut selector = ModelSelector::new(2, 50.0, 500.0);
        selector.update(&report(4, 20, Some(3000.0), 20_000.0), 50);
        // Faster but fewer finishes and a lower score: only the time rule moves.
        let accepted = selector.update(&report(2, 20, Some(2500.0), 10_000.0), 100);
        assert_eq!(names(&accepted), vec!["best_time.ot"]);
        assert_eq!(selector.finish_rate.record.unwrap().episode, 50);
    }

    #[test]
    fn test_records_restore() {
        let mut selector = ModelSelector::new(2, 50.0, 500.0);
        selector.update(&report(3, 20, Some(3000.0), 15_000.0), 50);
        let records = selector.records();

        let mut resumed = ModelSelector::new(2, 50.0, 500.0);
        resumed.restore(&records);
        assert_eq!(resumed.records(), records);
        assert!(resumed.update(&report(3, 20, Some(3000.0), 15_000.0), 100).is_empty());
    }
}
