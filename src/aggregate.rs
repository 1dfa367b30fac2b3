use chrono::{Duration, NaiveDate};
use rand::RngCore;
use sqlx::PgPool;
use tracing::{error, info};

use crate::db;
use crate::error::Result;
use crate::features;
use crate::inference::InferenceClient;
use crate::models::{DailyAggregate, RawSample, UserProfile};
use crate::recommend;

const TREND_WINDOW_DAYS: i64 = 7;
pub const PREDICTION_TYPE: &str = "fatigue_risk";

/// Totals folded from one user-day of raw samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DayTotals {
    pub steps_total: i32,
    pub calories_total: f64,
    pub hr_mean: f64,
    pub hr_max: i32,
    pub sleep_hours_total: f64,
}

/// Outcome of the best-effort stage that runs after the aggregate commit.
#[derive(Debug)]
pub enum DerivedOutcome {
    Scored {
        probability: f64,
        recommendations: usize,
    },
    Skipped {
        reason: String,
    },
}

/// Folds a day's samples. Heart-rate readings of zero are excluded from
/// the mean but still count as samples; missing metrics contribute zero.
pub fn summarize_day(samples: &[RawSample]) -> DayTotals {
    let mut steps_total = 0i64;
    let mut calories_total = 0.0f64;
    let mut sleep_hours_total = 0.0f64;
    let mut hr_sum = 0i64;
    let mut hr_count = 0i64;
    let mut hr_max = 0i32;

    for sample in samples {
        steps_total += i64::from(sample.steps.unwrap_or(0));
        calories_total += sample.calories.unwrap_or(0.0);
        sleep_hours_total += sample.sleep_hours.unwrap_or(0.0);
        if let Some(hr) = sample.heart_rate {
            if hr > 0 {
                hr_sum += i64::from(hr);
                hr_count += 1;
            }
            hr_max = hr_max.max(hr);
        }
    }

    let hr_mean = if hr_count > 0 {
        round2(hr_sum as f64 / hr_count as f64)
    } else {
        0.0
    };

    DayTotals {
        steps_total: steps_total.min(i64::from(i32::MAX)) as i32,
        calories_total: round2(calories_total),
        hr_mean,
        hr_max,
        sleep_hours_total: round2(sleep_hours_total),
    }
}

/// Two-decimal rounding, ties away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Trailing delta: today's value minus the mean over strictly positive
/// values among the prior days. No qualifying prior day means a mean of
/// zero, so the delta is today's raw value.
pub fn rolling_delta(prior: &[f64], today: f64) -> f64 {
    let positives: Vec<f64> = prior.iter().copied().filter(|v| *v > 0.0).collect();
    let mean = if positives.is_empty() {
        0.0
    } else {
        positives.iter().sum::<f64>() / positives.len() as f64
    };
    round2(today - mean)
}

/// Recomputes the aggregate for one user-day from the full set of raw
/// samples and commits it. Inference and recommendations run afterwards
/// as a best-effort stage: their failures are logged and never unwind
/// the committed aggregate.
pub async fn aggregate_day(
    pool: &PgPool,
    client: &InferenceClient,
    rng: &mut dyn RngCore,
    user_id: i64,
    date: NaiveDate,
) -> Result<DailyAggregate> {
    let user = db::find_user(pool, user_id).await?;
    let samples = db::fetch_day_samples(pool, user_id, date).await?;
    let totals = summarize_day(&samples);

    let prior = db::fetch_aggregate_range(
        pool,
        user_id,
        date - Duration::days(TREND_WINDOW_DAYS - 1),
        date - Duration::days(1),
    )
    .await?;

    let prior_steps: Vec<f64> = prior.iter().map(|a| f64::from(a.steps_total)).collect();
    let prior_sleep: Vec<f64> = prior.iter().map(|a| a.sleep_hours_total).collect();

    let candidate = DailyAggregate {
        agg_id: 0,
        user_id,
        date,
        steps_total: totals.steps_total,
        calories_total: totals.calories_total,
        hr_mean: totals.hr_mean,
        hr_max: totals.hr_max,
        sleep_hours_total: totals.sleep_hours_total,
        d_steps_7d: rolling_delta(&prior_steps, f64::from(totals.steps_total)),
        d_sleep_7d: rolling_delta(&prior_sleep, totals.sleep_hours_total),
    };

    let saved = db::upsert_aggregate(pool, &candidate).await?;
    info!(
        user_id,
        %date,
        steps = saved.steps_total,
        d_steps_7d = saved.d_steps_7d,
        d_sleep_7d = saved.d_sleep_7d,
        "daily aggregate committed"
    );

    let outcome = run_derived(pool, client, rng, &saved, &user)
        .await
        .unwrap_or_else(|err| DerivedOutcome::Skipped {
            reason: err.to_string(),
        });
    match outcome {
        DerivedOutcome::Scored {
            probability,
            recommendations,
        } => {
            info!(user_id, %date, probability, recommendations, "derived artifacts stored");
        }
        DerivedOutcome::Skipped { reason } => {
            error!(user_id, %date, %reason, "derived stage failed; aggregate kept");
        }
    }

    Ok(saved)
}

async fn run_derived(
    pool: &PgPool,
    client: &InferenceClient,
    rng: &mut dyn RngCore,
    agg: &DailyAggregate,
    user: &UserProfile,
) -> Result<DerivedOutcome> {
    let vector = features::build_vector(client.manifest(), agg, user);
    let probability = client.predict(&vector)?;

    let model_id = db::find_active_model(pool, client.model_name())
        .await?
        .map(|m| m.model_id);

    db::insert_inference_result(
        pool,
        agg.agg_id,
        model_id,
        PREDICTION_TYPE,
        probability,
        &format!("Fatigue risk: {probability:.2}"),
    )
    .await?;

    let yesterday_steps =
        db::steps_total_on(pool, agg.user_id, agg.date - Duration::days(1)).await?;
    let drafts = recommend::evaluate(agg, user, probability, yesterday_steps, rng);
    let recommendations = recommend::persist_drafts(pool, agg, &drafts).await?;

    Ok(DerivedOutcome::Scored {
        probability,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample(
        hr: Option<i32>,
        steps: Option<i32>,
        calories: Option<f64>,
        sleep: Option<f64>,
    ) -> RawSample {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        RawSample {
            sample_id: 0,
            user_id: 1,
            recorded_at: day.and_hms_opt(8, 0, 0).unwrap(),
            day,
            heart_rate: hr,
            steps,
            calories,
            sleep_hours: sleep,
            source: "test".to_string(),
        }
    }

    #[test]
    fn totals_sum_steps_calories_sleep() {
        let samples = vec![
            sample(Some(70), Some(3000), Some(900.0), Some(2.0)),
            sample(Some(82), Some(2500), Some(650.5), Some(5.5)),
        ];
        let totals = summarize_day(&samples);
        assert_eq!(totals.steps_total, 5500);
        assert_eq!(totals.calories_total, 1550.5);
        assert_eq!(totals.sleep_hours_total, 7.5);
        assert_eq!(totals.hr_max, 82);
        assert_eq!(totals.hr_mean, 76.0);
    }

    #[test]
    fn zero_heart_rate_excluded_from_mean_but_not_max() {
        let samples = vec![
            sample(Some(0), Some(100), None, None),
            sample(Some(90), None, None, None),
        ];
        let totals = summarize_day(&samples);
        assert_eq!(totals.hr_mean, 90.0);
        assert_eq!(totals.hr_max, 90);
    }

    #[test]
    fn missing_metrics_default_to_zero() {
        let totals = summarize_day(&[sample(None, None, None, None)]);
        assert_eq!(totals.steps_total, 0);
        assert_eq!(totals.calories_total, 0.0);
        assert_eq!(totals.hr_mean, 0.0);
        assert_eq!(totals.hr_max, 0);
        assert_eq!(totals.sleep_hours_total, 0.0);
    }

    #[test]
    fn summarize_is_idempotent_over_identical_input() {
        let samples = vec![
            sample(Some(64), Some(1200), Some(300.0), Some(1.5)),
            sample(Some(71), Some(800), Some(210.0), Some(6.0)),
        ];
        assert_eq!(summarize_day(&samples), summarize_day(&samples));
    }

    #[test]
    fn delta_subtracts_positive_prior_mean() {
        // mean of positives is (4000 + 6000) / 2 = 5000
        let delta = rolling_delta(&[4000.0, 0.0, 6000.0], 5500.0);
        assert_eq!(delta, 500.0);
    }

    #[test]
    fn delta_equals_today_when_no_positive_priors() {
        let delta = rolling_delta(&[0.0; 7], 5000.0);
        assert_eq!(delta, 5000.00);
        assert_eq!(rolling_delta(&[], 3.4), 3.4);
    }

    #[test]
    fn delta_rounds_half_up() {
        // 10 - 8.333... = 1.666... -> 1.67
        let delta = rolling_delta(&[10.0, 5.0, 10.0], 10.0);
        assert_eq!(delta, 1.67);
        // 0.125 is exact in binary, so the tie is a true tie
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
    }
}
