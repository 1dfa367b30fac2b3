use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db;
use crate::error::Result;
use crate::models::DailyProbability;
use crate::recommend::{Severity, SOURCE_WEEKLY};

pub const INSUFFICIENT_DATA: &str = "Not enough data to generate a weekly fatigue summary.";

/// Hour the weekly summary row is stamped at on the report date.
const SUMMARY_HOUR: u32 = 20;

const HIGH_RISK_THRESHOLD: f64 = 0.7;
const MODERATE_RISK_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, PartialEq)]
pub struct WeekVerdict {
    pub severity: Severity,
    pub message: String,
}

/// Collapses raw scoring rows to one probability per calendar date,
/// keeping the maximum when a date was scored more than once.
pub fn collapse_daily(rows: &[DailyProbability]) -> Vec<(NaiveDate, f64)> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in rows {
        by_date
            .entry(row.date)
            .and_modify(|p| *p = p.max(row.probability))
            .or_insert(row.probability);
    }
    by_date.into_iter().collect()
}

pub fn classify_week(daily: &[(NaiveDate, f64)]) -> WeekVerdict {
    let n = daily.len();
    let mut sum = 0.0;
    let mut max = 0.0f64;
    let mut high_risk_days = 0;
    let mut moderate_risk_days = 0;
    let mut low_risk_days = 0;

    for (_, p) in daily {
        sum += p;
        max = max.max(*p);
        if *p > HIGH_RISK_THRESHOLD {
            high_risk_days += 1;
        } else if *p > MODERATE_RISK_THRESHOLD {
            moderate_risk_days += 1;
        } else {
            low_risk_days += 1;
        }
    }

    let avg = if n > 0 { sum / n as f64 } else { 0.0 };

    if high_risk_days >= 3 || max > 0.85 {
        WeekVerdict {
            severity: Severity::Critical,
            message: format!(
                "This week shows frequent signs of high fatigue. High-risk days: {high_risk_days} out of {n}."
            ),
        }
    } else if moderate_risk_days >= 3 || avg > 0.5 {
        WeekVerdict {
            severity: Severity::Warning,
            message: format!(
                "This week was moderately demanding. Elevated fatigue risk: {} out of {n}.",
                moderate_risk_days + high_risk_days
            ),
        }
    } else {
        WeekVerdict {
            severity: Severity::Advisory,
            message: format!(
                "Overall, this week looks balanced. Low risk days: {low_risk_days} out of {n}."
            ),
        }
    }
}

/// Rolls the week ending at `week_end` into a severity-classified
/// summary. Reruns are idempotent: any weekly-summary rows already
/// created on the report date are deleted before the new one lands.
pub async fn summarize_week(pool: &PgPool, user_id: i64, week_end: NaiveDate) -> Result<String> {
    let week_start = week_end - Duration::days(6);
    let rows = db::fetch_week_probabilities(pool, user_id, week_start, week_end).await?;

    if rows.is_empty() {
        info!(user_id, %week_end, "no inference results in window");
        return Ok(INSUFFICIENT_DATA.to_string());
    }

    let daily = collapse_daily(&rows);
    let verdict = classify_week(&daily);

    let removed = db::delete_weekly_summaries(pool, user_id, week_end).await?;
    if removed > 0 {
        warn!(user_id, %week_end, removed, "replaced existing weekly summaries");
    }

    let created_at = week_end.and_hms_opt(SUMMARY_HOUR, 0, 0).unwrap_or_default();
    db::insert_recommendation(
        pool,
        user_id,
        &verdict.message,
        SOURCE_WEEKLY,
        verdict.severity.as_str(),
        created_at,
    )
    .await?;

    info!(
        user_id,
        %week_end,
        severity = verdict.severity.as_str(),
        days = daily.len(),
        "weekly fatigue summary created"
    );
    Ok(verdict.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(probs: &[f64]) -> Vec<(NaiveDate, f64)> {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        probs
            .iter()
            .enumerate()
            .map(|(i, p)| (start + Duration::days(i as i64), *p))
            .collect()
    }

    #[test]
    fn max_probability_escalates_even_with_few_high_days() {
        // only 2 high-risk days, but the 0.9 peak crosses 0.85
        let verdict = classify_week(&week(&[0.9, 0.75, 0.3, 0.2, 0.1, 0.05, 0.02]));
        assert_eq!(verdict.severity, Severity::Critical);
        assert!(verdict.message.contains("2 out of 7"));
    }

    #[test]
    fn three_high_risk_days_are_critical() {
        let verdict = classify_week(&week(&[0.72, 0.71, 0.75, 0.1, 0.1, 0.1, 0.1]));
        assert_eq!(verdict.severity, Severity::Critical);
    }

    #[test]
    fn three_moderate_days_are_a_warning() {
        let verdict = classify_week(&week(&[0.5, 0.45, 0.6, 0.1, 0.1, 0.1, 0.1]));
        assert_eq!(verdict.severity, Severity::Warning);
        // moderate + high days in the message
        assert!(verdict.message.contains("3 out of 7"));
    }

    #[test]
    fn high_average_alone_is_a_warning() {
        let verdict = classify_week(&week(&[0.8, 0.8, 0.3, 0.3]));
        assert_eq!(verdict.severity, Severity::Warning);
    }

    #[test]
    fn quiet_week_is_advisory() {
        let verdict = classify_week(&week(&[0.1, 0.2, 0.3, 0.05, 0.1, 0.15, 0.2]));
        assert_eq!(verdict.severity, Severity::Advisory);
        assert!(verdict.message.contains("7 out of 7"));
    }

    #[test]
    fn tier_boundaries_are_strict() {
        // exactly 0.7 is moderate, exactly 0.4 is low
        let verdict = classify_week(&week(&[0.7, 0.7, 0.7, 0.4, 0.4, 0.4, 0.4]));
        assert_eq!(verdict.severity, Severity::Warning);
    }

    #[test]
    fn repeated_scores_for_one_date_keep_the_maximum() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let rows = vec![
            DailyProbability { date, probability: 0.2 },
            DailyProbability { date, probability: 0.6 },
            DailyProbability { date, probability: 0.4 },
            DailyProbability {
                date: date + Duration::days(1),
                probability: 0.3,
            },
        ];
        let daily = collapse_daily(&rows);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0], (date, 0.6));
    }
}
