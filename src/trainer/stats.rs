use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RacerError;

pub const CSV_HEADER: &str = "episode,reward,length,avg_loss,laps,finished";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    /// 1-based.
    pub episode: usize,
    pub reward: f32,
    pub length: usize,
    pub mean_loss: f32,
    pub laps_completed: u32,
    pub finished: bool,
}

impl EpisodeStats {
    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.episode,
            self.reward,
            self.length,
            self.mean_loss,
            self.laps_completed,
            u8::from(self.finished)
        )
    }

    fn from_csv_row(line_no: usize, line: &str) -> Result<Self, RacerError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            return Err(RacerError::StatsParse {
                line: line_no,
                msg: format!("expected at least 5 fields, got {}", fields.len()),
            });
        }
        let parse_err = |name: &str| RacerError::StatsParse {
            line: line_no,
            msg: format!("bad {} field", name),
        };
        let laps: i64 = fields[4].parse().map_err(|_| parse_err("laps"))?;
        Ok(Self {
            episode: fields[0].parse().map_err(|_| parse_err("episode"))?,
            reward: fields[1].parse().map_err(|_| parse_err("reward"))?,
            length: fields[2].parse().map_err(|_| parse_err("length"))?,
            mean_loss: fields[3].parse().map_err(|_| parse_err("avg_loss"))?,
            laps_completed: laps.max(0) as u32,
            finished: match fields.get(5) {
                Some(v) => *v == "1",
                None => false,
            },
        })
    }
}

/// Append-only per-episode log. Only the newest `retain` entries and the
/// newest `finish_window` finish flags are kept.
#[derive(Debug, Clone)]
pub struct EpisodeLog {
    retain: usize,
    entries: VecDeque<EpisodeStats>,
    finish_window: usize,
    recent_finishes: VecDeque<bool>,
}

impl EpisodeLog {
    pub fn new(retain: usize, finish_window: usize) -> Self {
        Self {
            retain: retain.max(1),
            entries: VecDeque::new(),
            finish_window: finish_window.max(1),
            recent_finishes: VecDeque::new(),
        }
    }

    pub fn push(&mut self, stats: EpisodeStats) {
        if self.recent_finishes.len() == self.finish_window {
            self.recent_finishes.pop_front();
        }
        self.recent_finishes.push_back(stats.finished);

        if self.entries.len() == self.retain {
            self.entries.pop_front();
        }
        self.entries.push_back(stats);
    }

    /// Finish flags of the newest episodes, oldest first.
    pub fn recent_finishes(&self) -> &VecDeque<bool> {
        &self.recent_finishes
    }

    /// Mean reward over the newest `n` retained episodes.
    pub fn recent_mean_reward(&self, n: usize) -> f32 {
        let window = n.min(self.entries.len());
        if window == 0 {
            return 0.0;
        }
        let sum: f32 = self.entries.iter().rev().take(window).map(|s| s.reward).sum();
        sum / window as f32
    }

    /// Retained rows with `first <= episode <= last`; rows already evicted are
    /// silently absent.
    pub fn window(&self, first: usize, last: usize) -> impl Iterator<Item = &EpisodeStats> {
        self.entries
            .iter()
            .filter(move |s| s.episode >= first && s.episode <= last)
    }

    /// Writes the milestone window ending at `episode` (inclusive).
    pub fn write_window_csv<P: AsRef<Path>>(
        &self,
        path: P,
        episode: usize,
        window: usize,
    ) -> Result<usize, RacerError> {
        let first = episode.saturating_sub(window.saturating_sub(1)).max(1);
        let mut out = String::new();
        let _ = writeln!(out, "{}", CSV_HEADER);
        let mut rows = 0;
        for stats in self.window(first, episode) {
            let _ = writeln!(out, "{}", stats.to_csv_row());
            rows += 1;
        }
        fs::write(path, out)?;
        Ok(rows)
    }
}

pub fn read_stats_csv<P: AsRef<Path>>(path: P) -> Result<Vec<EpisodeStats>, RacerError> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .skip(1)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| EpisodeStats::from_csv_row(i + 1, line))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovingAverageTrend {
    pub window: usize,
    pub first: f32,
    pub middle: f32,
    pub last: f32,
}

impl MovingAverageTrend {
    pub fn improvement(&self) -> f32 {
        self.last - self.first
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuarterSummary {
    pub first_episode: usize,
    pub last_episode: usize,
    pub mean_reward: f32,
    pub mean_laps: f32,
}

/// Mean reward of the earliest episodes against the latest ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningProgress {
    pub window: usize,
    pub early_mean: f32,
    pub late_mean: f32,
}

impl LearningProgress {
    pub fn improvement(&self) -> f32 {
        self.late_mean - self.early_mean
    }

    /// Relative to `|early_mean|`; `None` when the early mean is zero.
    pub fn improvement_pct(&self) -> Option<f32> {
        if self.early_mean == 0.0 {
            None
        } else {
            Some(self.improvement() / self.early_mean.abs() * 100.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub episodes: usize,
    pub mean_reward: f32,
    pub std_reward: f32,
    pub min_reward: f32,
    pub max_reward: f32,
    pub mean_loss: f32,
    pub mean_length: f32,
    pub mean_laps: f32,
    pub max_laps: u32,
    pub total_laps: u64,
    pub finished_races: usize,
    /// One entry per window in `TREND_WINDOWS` that fits in the data.
    pub moving_averages: Vec<MovingAverageTrend>,
    /// Highest-reward episodes, best first.
    pub top_episodes: Vec<EpisodeStats>,
    /// Only present with at least `MIN_EPISODES_FOR_QUARTERS` episodes.
    pub quarters: Option<[QuarterSummary; 4]>,
    pub progress: LearningProgress,
}

impl StatsSummary {
    pub const TREND_WINDOWS: [usize; 3] = [10, 50, 100];
    pub const TOP_EPISODES: usize = 10;
    pub const MIN_EPISODES_FOR_QUARTERS: usize = 40;
    pub const MIN_PROGRESS_WINDOW: usize = 10;

    pub fn from_stats(stats: &[EpisodeStats]) -> Option<Self> {
        if stats.is_empty() {
            return None;
        }
        let rewards: Vec<f32> = stats.iter().map(|s| s.reward).collect();
        let n = stats.len() as f32;
        let mean_reward = mean(&rewards);
        let std_reward = if stats.len() > 1 {
            let ss: f32 = rewards.iter().map(|r| (r - mean_reward).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        let moving_averages = Self::TREND_WINDOWS
            .iter()
            .filter_map(|&window| {
                let ma = moving_average(&rewards, window);
                match (ma.first(), ma.last()) {
                    (Some(&first), Some(&last)) => Some(MovingAverageTrend {
                        window,
                        first,
                        middle: ma[ma.len() / 2],
                        last,
                    }),
                    _ => None,
                }
            })
            .collect();

        let mut top_episodes = stats.to_vec();
        top_episodes.sort_by(|a, b| b.reward.total_cmp(&a.reward));
        top_episodes.truncate(Self::TOP_EPISODES);

        let quarters = if stats.len() >= Self::MIN_EPISODES_FOR_QUARTERS {
            let size = stats.len() / 4;
            Some([0, 1, 2, 3].map(|q| {
                let start = q * size;
                let end = if q == 3 { stats.len() } else { (q + 1) * size };
                let slice = &stats[start..end];
                QuarterSummary {
                    first_episode: slice[0].episode,
                    last_episode: slice[slice.len() - 1].episode,
                    mean_reward: mean(&slice.iter().map(|s| s.reward).collect::<Vec<_>>()),
                    mean_laps: mean(
                        &slice.iter().map(|s| s.laps_completed as f32).collect::<Vec<_>>(),
                    ),
                }
            }))
        } else {
            None
        };

        let window = Self::MIN_PROGRESS_WINDOW
            .max(stats.len() / 5)
            .min(stats.len());
        let progress = LearningProgress {
            window,
            early_mean: mean(&rewards[..window]),
            late_mean: mean(&rewards[rewards.len() - window..]),
        };

        Some(Self {
            episodes: stats.len(),
            mean_reward,
            std_reward,
            min_reward: rewards.iter().copied().fold(f32::INFINITY, f32::min),
            max_reward: rewards.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            mean_loss: stats.iter().map(|s| s.mean_loss).sum::<f32>() / n,
            mean_length: stats.iter().map(|s| s.length as f32).sum::<f32>() / n,
            mean_laps: stats.iter().map(|s| s.laps_completed as f32).sum::<f32>() / n,
            max_laps: stats.iter().map(|s| s.laps_completed).max().unwrap_or(0),
            total_laps: stats.iter().map(|s| s.laps_completed as u64).sum(),
            finished_races: stats.iter().filter(|s| s.finished).count(),
            moving_averages,
            top_episodes,
            quarters,
            progress,
        })
    }

    pub fn finish_pct(&self) -> f32 {
        100.0 * self.finished_races as f32 / self.episodes as f32
    }

    pub fn is_learning(&self) -> bool {
        self.progress.improvement() > 0.0
    }

    pub fn recommendations(&self, race_laps: u32) -> Vec<&'static str> {
        let mut out = Vec::new();
        let finished = self.finished_races as f32;
        let episodes = self.episodes as f32;
        if self.finished_races == 0 {
            out.push("Agent has not completed any races yet");
            out.push("Recommendation: Train for more episodes (aim for 200-500)");
        } else if finished < episodes * 0.1 {
            out.push("Agent rarely completes races");
            out.push("Recommendation: Continue training to improve consistency");
        } else if finished < episodes * 0.5 {
            out.push("Agent is learning but not yet consistent");
            out.push("Recommendation: Train for 100-200 more episodes");
        } else {
            out.push("Agent is performing well!");
            out.push("Recommendation: Fine-tune with more training or adjust rewards");
        }

        if self.max_laps < race_laps {
            out.push("Agent has not completed a full race");
        } else {
            out.push("Agent has completed at least one full race!");
        }

        let pct = self.progress.improvement_pct();
        out.push(match pct {
            Some(p) if p > 50.0 => "Strong learning progress!",
            _ if self.is_learning() => "Moderate learning progress",
            _ => "Limited learning - may need more episodes or hyperparameter tuning",
        });
        out
    }

    pub fn print_report<W: Write>(&self, race_laps: u32, mut writer: W) -> io::Result<()> {
        section(&mut writer, "OVERALL STATISTICS")?;
        writeln!(writer, "Episodes:              {}", self.episodes)?;
        writeln!(
            writer,
            "Mean Reward:           {:.2} ± {:.2}",
            self.mean_reward, self.std_reward
        )?;
        writeln!(
            writer,
            "Reward Range:          [{:.2}, {:.2}]",
            self.min_reward, self.max_reward
        )?;
        writeln!(writer, "Mean Episode Length:   {:.2} steps", self.mean_length)?;
        writeln!(writer, "Mean Loss:             {:.4}", self.mean_loss)?;
        writeln!(writer, "Mean Laps Completed:   {:.2}", self.mean_laps)?;
        writeln!(writer, "Max Laps in Episode:   {}", self.max_laps)?;
        writeln!(writer, "Total Laps Completed:  {}", self.total_laps)?;
        writeln!(
            writer,
            "Episodes Finishing:    {} ({:.2}%)",
            self.finished_races,
            self.finish_pct()
        )?;

        for trend in &self.moving_averages {
            section(&mut writer, &format!("MOVING AVERAGE (Window = {})", trend.window))?;
            writeln!(writer, "First {} episodes avg:  {:.2}", trend.window, trend.first)?;
            writeln!(writer, "Middle avg:             {:.2}", trend.middle)?;
            writeln!(writer, "Last {} episodes avg:   {:.2}", trend.window, trend.last)?;
            writeln!(
                writer,
                "Improvement:            {:.2} ({})",
                trend.improvement(),
                format_pct(trend.improvement(), trend.first)
            )?;
        }

        section(&mut writer, "TOP 10 EPISODES")?;
        writeln!(writer, "{:>10}{:>15}{:>12}{:>10}", "Episode", "Reward", "Steps", "Laps")?;
        writeln!(writer, "{}", "-".repeat(47))?;
        for ep in &self.top_episodes {
            writeln!(
                writer,
                "{:>10}{:>15.2}{:>12}{:>10}",
                ep.episode, ep.reward, ep.length, ep.laps_completed
            )?;
        }

        if let Some(quarters) = &self.quarters {
            section(&mut writer, "PROGRESS BY QUARTER")?;
            let names = ["First", "Second", "Third", "Fourth"];
            for (name, q) in names.iter().zip(quarters) {
                writeln!(
                    writer,
                    "\n{} Quarter (Episodes {}-{}):",
                    name, q.first_episode, q.last_episode
                )?;
                writeln!(writer, "  Avg Reward: {:.2}", q.mean_reward)?;
                writeln!(writer, "  Avg Laps:   {:.2}", q.mean_laps)?;
            }
        }

        let p = &self.progress;
        section(&mut writer, "LEARNING INDICATORS")?;
        writeln!(writer, "First {} episodes avg:  {:.2}", p.window, p.early_mean)?;
        writeln!(writer, "Last {} episodes avg:   {:.2}", p.window, p.late_mean)?;
        writeln!(
            writer,
            "Improvement:            {:.2} ({})",
            p.improvement(),
            format_pct(p.improvement(), p.early_mean)
        )?;
        if self.is_learning() {
            writeln!(writer, "\n✓ Agent is learning! Positive improvement detected.")?;
        } else {
            writeln!(writer, "\n⚠ Agent may need more training or hyperparameter tuning.")?;
        }

        section(&mut writer, "RECOMMENDATIONS")?;
        for line in self.recommendations(race_laps) {
            writeln!(writer, "• {}", line)?;
        }
        Ok(())
    }

    pub fn print(&self, race_laps: u32) {
        if let Err(e) = self.print_report(race_laps, io::stdout().lock()) {
            eprintln!("❌ Failed to print report: {}", e);
        }
    }

    /// Writes `<csv stem>_summary.txt` beside the statistics file.
    pub fn write_summary_file(&self, csv_path: &Path) -> Result<PathBuf, RacerError> {
        let path = summary_path_for(csv_path);
        let mut out = String::new();
        let _ = writeln!(out, "=== Training Summary ===");
        let _ = writeln!(out, "File: {}", csv_path.display());
        let _ = writeln!(out, "Episodes: {}", self.episodes);
        let _ = writeln!(out, "Mean Reward: {:.2}", self.mean_reward);
        let _ = writeln!(out, "Mean Laps: {:.2}", self.mean_laps);
        let _ = writeln!(out, "Races Completed: {}", self.finished_races);
        let _ = writeln!(
            out,
            "Improvement: {}",
            format_pct(self.progress.improvement(), self.progress.early_mean)
        );
        fs::write(&path, out)?;
        Ok(path)
    }
}

pub fn summary_path_for(csv_path: &Path) -> PathBuf {
    let stem = csv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    csv_path.with_file_name(format!("{}_summary.txt", stem))
}

fn section<W: Write>(writer: &mut W, title: &str) -> io::Result<()> {
    writeln!(writer)?;
    writeln!(writer, "{}", "=".repeat(70))?;
    writeln!(writer, "{}", title)?;
    writeln!(writer, "{}", "=".repeat(70))
}

fn format_pct(delta: f32, base: f32) -> String {
    if base == 0.0 {
        "n/a".to_string()
    } else {
        format!("{:.2}%", delta / base.abs() * 100.0)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

pub fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values.windows(window).map(mean).collect()
}
