//! Grandfather-father-son retention
//!
//! Every backup file is an hourly candidate. The earliest file of a UTC
//! calendar day, ISO week, month or year is also a daily, weekly, monthly
//! or yearly candidate. Each tier keeps its most recent candidates; a file
//! is deleted only when no tier keeps it.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Number of files kept per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub hourly: usize,
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
    pub yearly: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            hourly: 24,
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 3,
        }
    }
}

impl RetentionConfig {
    pub fn count(&self, tier: RetentionTier) -> usize {
        match tier {
            RetentionTier::Hourly => self.hourly,
            RetentionTier::Daily => self.daily,
            RetentionTier::Weekly => self.weekly,
            RetentionTier::Monthly => self.monthly,
            RetentionTier::Yearly => self.yearly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionTier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RetentionTier {
    pub const ALL: [RetentionTier; 5] = [
        RetentionTier::Hourly,
        RetentionTier::Daily,
        RetentionTier::Weekly,
        RetentionTier::Monthly,
        RetentionTier::Yearly,
    ];

    /// Calendar period of `ts` for this tier; `None` for hourly, where
    /// every file is its own period
    fn period(self, ts: &DateTime<Utc>) -> Option<(i32, u32, u32)> {
        match self {
            RetentionTier::Hourly => None,
            RetentionTier::Daily => Some((ts.year(), ts.month(), ts.day())),
            RetentionTier::Weekly => {
                let week = ts.iso_week();
                Some((week.year(), week.week(), 0))
            }
            RetentionTier::Monthly => Some((ts.year(), ts.month(), 0)),
            RetentionTier::Yearly => Some((ts.year(), 0, 0)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RetentionTier::Hourly => "hourly",
            RetentionTier::Daily => "daily",
            RetentionTier::Weekly => "weekly",
            RetentionTier::Monthly => "monthly",
            RetentionTier::Yearly => "yearly",
        }
    }
}

/// A backup file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFileInfo {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub is_encrypted: bool,
}

impl BackupFileInfo {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Outcome of applying a retention config
#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    /// Kept files, oldest first, with the tiers keeping them
    pub keep: Vec<(BackupFileInfo, BTreeSet<RetentionTier>)>,
    /// Files to delete, oldest first
    pub delete: Vec<BackupFileInfo>,
}

pub struct RetentionManager {
    config: RetentionConfig,
}

impl RetentionManager {
    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn plan(&self, files: &[BackupFileInfo]) -> RetentionPlan {
        let mut sorted: Vec<&BackupFileInfo> = files.iter().collect();
        sorted.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut kept_by: Vec<BTreeSet<RetentionTier>> = vec![BTreeSet::new(); sorted.len()];

        for tier in RetentionTier::ALL {
            let mut seen = HashSet::new();
            let candidates: Vec<usize> = sorted
                .iter()
                .enumerate()
                .filter(|(_, file)| match tier.period(&file.created_at) {
                    Some(period) => seen.insert(period),
                    None => true,
                })
                .map(|(idx, _)| idx)
                .collect();

            for idx in candidates.into_iter().rev().take(self.config.count(tier)) {
                kept_by[idx].insert(tier);
            }
        }

        let mut plan = RetentionPlan::default();
        for (file, tiers) in sorted.into_iter().zip(kept_by) {
            if tiers.is_empty() {
                plan.delete.push(file.clone());
            } else {
                plan.keep.push((file.clone(), tiers));
            }
        }
        plan
    }

    /// Files no tier keeps, oldest first
    pub fn select_for_deletion(&self, files: &[BackupFileInfo]) -> Vec<BackupFileInfo> {
        self.plan(files).delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(y: i32, m: u32, d: u32, h: u32) -> BackupFileInfo {
        let created_at = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        BackupFileInfo {
            path: PathBuf::from(format!(
                "backup_{}-000.tgabak",
                created_at.format("%Y%m%d-%H%M%S")
            )),
            created_at,
            size_bytes: 1024,
            is_encrypted: false,
        }
    }

    fn config(
        hourly: usize,
        daily: usize,
        weekly: usize,
        monthly: usize,
        yearly: usize,
    ) -> RetentionConfig {
        RetentionConfig {
            hourly,
            daily,
            weekly,
            monthly,
            yearly,
        }
    }

    fn days(files: &[BackupFileInfo]) -> Vec<u32> {
        files.iter().map(|f| f.created_at.day()).collect()
    }

    #[test]
    fn test_thirty_daily_backups() {
        let files: Vec<_> = (1..=30).map(|d| file(2026, 1, d, 3)).collect();
        let manager = RetentionManager::new(config(0, 7, 4, 1, 0));

        let plan = manager.plan(&files);
        let kept: Vec<_> = plan.keep.iter().map(|(f, _)| f.created_at.day()).collect();

        // Jan 1 2026 is a Thursday: weeks start Jan 5, 12, 19 and 26
        assert_eq!(kept, vec![1, 5, 12, 19, 24, 25, 26, 27, 28, 29, 30]);
        assert!(kept.len() <= 7 + 4 + 1);
        assert_eq!(plan.delete.len(), files.len() - kept.len());

        let (jan1, tiers) = &plan.keep[0];
        assert_eq!(jan1.created_at.day(), 1);
        assert!(tiers.contains(&RetentionTier::Monthly));
        assert!(!tiers.contains(&RetentionTier::Weekly));
    }

    #[test]
    fn test_daily_tier_keeps_most_recent_days() {
        let files: Vec<_> = (1..=30).map(|d| file(2026, 1, d, 3)).collect();
        let deleted = RetentionManager::new(config(0, 7, 0, 0, 0)).select_for_deletion(&files);

        assert_eq!(days(&deleted), (1..=23).collect::<Vec<_>>());
    }

    #[test]
    fn test_hourly_tier_counts_every_file() {
        let files: Vec<_> = (0..6).map(|h| file(2026, 3, 2, h)).collect();
        let deleted = RetentionManager::new(config(2, 0, 0, 0, 0)).select_for_deletion(&files);

        let hours: Vec<_> = deleted.iter().map(|f| f.created_at.format("%H").to_string()).collect();
        assert_eq!(hours, vec!["00", "01", "02", "03"]);
    }

    #[test]
    fn test_earliest_file_of_the_day_is_the_daily_candidate() {
        let files = vec![file(2026, 3, 2, 18), file(2026, 3, 2, 6), file(2026, 3, 2, 12)];
        let plan = RetentionManager::new(config(0, 1, 0, 0, 0)).plan(&files);

        assert_eq!(plan.keep.len(), 1);
        assert_eq!(plan.keep[0].0.created_at, file(2026, 3, 2, 6).created_at);
        assert_eq!(plan.delete.len(), 2);
    }

    #[test]
    fn test_yearly_tier() {
        let files = vec![
            file(2023, 6, 1, 0),
            file(2024, 2, 1, 0),
            file(2024, 9, 1, 0),
            file(2025, 1, 1, 0),
        ];
        let deleted = RetentionManager::new(config(0, 0, 0, 0, 2)).select_for_deletion(&files);

        let years: Vec<_> = deleted
            .iter()
            .map(|f| (f.created_at.year(), f.created_at.month()))
            .collect();
        assert_eq!(years, vec![(2023, 6), (2024, 9)]);
    }

    #[test]
    fn test_zero_config_deletes_everything() {
        let files: Vec<_> = (1..=3).map(|d| file(2026, 1, d, 0)).collect();
        let deleted = RetentionManager::new(config(0, 0, 0, 0, 0)).select_for_deletion(&files);
        assert_eq!(deleted.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        let plan = RetentionManager::new(RetentionConfig::default()).plan(&[]);
        assert!(plan.keep.is_empty());
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: RetentionConfig = serde_json::from_str(r#"{"daily": 14}"#).unwrap();
        assert_eq!(config.daily, 14);
        assert_eq!(config.hourly, 24);
        assert_eq!(config.yearly, 3);
    }
}
