use rand::RngCore;
use sqlx::PgPool;

use crate::db;
use crate::error::Result;
use crate::models::{DailyAggregate, UserProfile};

pub const SOURCE_RULES: &str = "rules";
pub const SOURCE_MODEL: &str = "ml_model_contextual";
pub const SOURCE_WEEKLY: &str = "weekly_summary";

/// Hour-of-day recommendations are anchored to. The row is stamped at
/// the aggregate's business date, not at processing time.
const REPORT_HOUR: u32 = 10;

const SEVERE_SLEEP_HOURS: f64 = 5.0;
const STAGNANT_STEPS: i32 = 2000;
const LOW_ACTIVITY_STEPS: i32 = 4000;
const HIGH_ACTIVITY_STEPS: i32 = 8000;
const LOW_STEPS_STREAK: i32 = 3000;
const OVERWEIGHT_BMI: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Advisory,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Advisory => "advisory",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub text: String,
    pub source: &'static str,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RiskTier {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    High,
    Moderate,
    Low,
}

fn risk_tier(probability: f64) -> RiskTier {
    if probability > 0.7 {
        RiskTier::High
    } else if probability > 0.4 {
        RiskTier::Moderate
    } else {
        RiskTier::Low
    }
}

fn activity_level(steps: i32) -> Activity {
    if steps > HIGH_ACTIVITY_STEPS {
        Activity::High
    } else if steps < LOW_ACTIVITY_STEPS {
        Activity::Low
    } else {
        Activity::Moderate
    }
}

fn is_overweight(user: &UserProfile) -> bool {
    match (user.weight_kg, user.height_cm) {
        (Some(weight), Some(height)) if height > 0.0 => {
            let height_m = height / 100.0;
            weight / (height_m * height_m) > OVERWEIGHT_BMI
        }
        _ => false,
    }
}

fn pick<'a>(rng: &mut dyn RngCore, candidates: &[&'a str]) -> &'a str {
    candidates[(rng.next_u32() as usize) % candidates.len()]
}

fn branch(
    candidates: &'static [&'static str],
    severity: Severity,
) -> (&'static [&'static str], Severity) {
    (candidates, severity)
}

/// Candidate texts for the model-contextual branch. `(source, severity)`
/// is fixed per branch; only the text varies under the injected rng.
fn contextual_candidates(
    tier: RiskTier,
    activity: Activity,
    overweight: bool,
) -> (&'static [&'static str], Severity) {
    match (tier, activity) {
        (RiskTier::High, Activity::High) => branch(
            &[
                "Fatigue risk is high after a heavy day. Plan a full rest day tomorrow.",
                "Strong fatigue signals with high activity. Cut training volume and get to bed early tonight.",
            ],
            Severity::Critical,
        ),
        (RiskTier::High, Activity::Low) => branch(
            &[
                "Fatigue risk is high despite a quiet day. Prioritize sleep and check in with yourself tomorrow.",
                "High fatigue risk on low activity. Rest well and keep an eye on how you feel.",
            ],
            Severity::Critical,
        ),
        (RiskTier::High, Activity::Moderate) => branch(
            &[
                "Fatigue risk is high today. Wind down early and skip strenuous plans.",
                "High fatigue signals detected. Take it easy for the rest of the day.",
            ],
            Severity::Critical,
        ),
        (RiskTier::Moderate, Activity::High) => branch(
            &[
                "Moderate fatigue risk after a very active day. A lighter session tomorrow would help recovery.",
                "Good activity today, but fatigue is creeping up. Swap tomorrow's workout for something easy.",
            ],
            Severity::Warning,
        ),
        (RiskTier::Moderate, Activity::Low) if overweight => branch(
            &[
                "Moderate fatigue with low activity. A short daily walk supports both energy and weight goals.",
                "Fatigue is building while activity is low. Try 20 minutes of easy movement today.",
            ],
            Severity::Warning,
        ),
        (RiskTier::Moderate, Activity::Low) => branch(
            &[
                "Moderate fatigue risk on a quiet day. Gentle movement and an earlier night should help.",
                "Fatigue is elevated despite low activity. Consider a relaxed walk and extra sleep.",
            ],
            Severity::Warning,
        ),
        (RiskTier::Moderate, Activity::Moderate) => branch(
            &[
                "Moderate fatigue risk today. Keep the load steady and protect your sleep window.",
                "Some fatigue signals today. Nothing alarming, but favor recovery this evening.",
            ],
            Severity::Warning,
        ),
        (RiskTier::Low, Activity::High) => branch(
            &[
                "Low fatigue risk and a very active day. Recovery looks on track.",
                "Great activity with low fatigue risk. Keep the current rhythm.",
            ],
            Severity::Advisory,
        ),
        (RiskTier::Low, _) if overweight => branch(
            &[
                "Fatigue risk is low. Adding a brisk daily walk would support your weight goals.",
                "Low fatigue today. A little more movement each day would pay off.",
            ],
            Severity::Advisory,
        ),
        (RiskTier::Low, _) => branch(
            &[
                "Fatigue risk is low today. Keep doing what you're doing.",
                "All quiet on the fatigue front. Maintain your routine.",
            ],
            Severity::Advisory,
        ),
    }
}

/// First-match-wins primary branch: severe sleep deprivation, then the
/// stagnant/low-risk rule, then the model-contextual tree.
fn primary_draft(
    agg: &DailyAggregate,
    user: &UserProfile,
    probability: f64,
    rng: &mut dyn RngCore,
) -> Draft {
    let overweight = is_overweight(user);

    if agg.sleep_hours_total > 0.0 && agg.sleep_hours_total < SEVERE_SLEEP_HOURS {
        return Draft {
            text: format!(
                "You slept only {:.1} hours. Severe sleep deprivation raises fatigue sharply; aim for 7-8 hours tonight.",
                agg.sleep_hours_total
            ),
            source: SOURCE_RULES,
            severity: Severity::Critical,
        };
    }

    if agg.steps_total < STAGNANT_STEPS && probability < 0.4 {
        let text = if overweight {
            "Very low activity today. Even with low fatigue risk, a daily walk would help your energy and weight goals."
        } else {
            "Very low activity today. Fatigue risk is low, so this is a good moment to move more."
        };
        return Draft {
            text: text.to_string(),
            source: SOURCE_RULES,
            severity: Severity::Warning,
        };
    }

    let tier = risk_tier(probability);
    let activity = activity_level(agg.steps_total);
    let (candidates, severity) = contextual_candidates(tier, activity, overweight);
    Draft {
        text: pick(rng, candidates).to_string(),
        source: SOURCE_MODEL,
        severity,
    }
}

/// Standing rules evaluated against aggregate history, independent of
/// the primary branch. Each may add one more draft.
fn standing_rule_drafts(agg: &DailyAggregate, yesterday_steps: Option<i32>) -> Vec<Draft> {
    let mut drafts = Vec::new();

    if agg.d_sleep_7d < -0.8 && agg.d_steps_7d > 0.8 {
        drafts.push(Draft {
            text: "Activity is up while sleep is falling behind your weekly norm. Scale back tonight and recover."
                .to_string(),
            source: SOURCE_RULES,
            severity: Severity::Warning,
        });
    }

    if agg.steps_total < LOW_STEPS_STREAK {
        if let Some(yesterday) = yesterday_steps {
            if yesterday < LOW_STEPS_STREAK {
                drafts.push(Draft {
                    text: "Two low-activity days in a row. A light 15-20 minute walk would break the streak."
                        .to_string(),
                    source: SOURCE_RULES,
                    severity: Severity::Advisory,
                });
            }
        }
    }

    drafts
}

/// One primary draft plus up to two standing-rule drafts.
pub fn evaluate(
    agg: &DailyAggregate,
    user: &UserProfile,
    probability: f64,
    yesterday_steps: Option<i32>,
    rng: &mut dyn RngCore,
) -> Vec<Draft> {
    let mut drafts = vec![primary_draft(agg, user, probability, rng)];
    drafts.extend(standing_rule_drafts(agg, yesterday_steps));
    drafts
}

/// Writes the drafts, stamped at the aggregate's report date at a fixed
/// hour so the rows anchor to the business day.
pub async fn persist_drafts(
    pool: &PgPool,
    agg: &DailyAggregate,
    drafts: &[Draft],
) -> Result<usize> {
    let created_at = agg
        .date
        .and_hms_opt(REPORT_HOUR, 0, 0)
        .unwrap_or_default();

    for draft in drafts {
        db::insert_recommendation(
            pool,
            agg.user_id,
            &draft.text,
            draft.source,
            draft.severity.as_str(),
            created_at,
        )
        .await?;
    }
    Ok(drafts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn user(height_cm: f64, weight_kg: f64) -> UserProfile {
        UserProfile {
            user_id: 1,
            name: "Mikhail Orlov".to_string(),
            age: Some(41),
            gender: Some("male".to_string()),
            height_cm: Some(height_cm),
            weight_kg: Some(weight_kg),
        }
    }

    fn aggregate(steps: i32, sleep: f64, d_steps: f64, d_sleep: f64) -> DailyAggregate {
        DailyAggregate {
            agg_id: 1,
            user_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            steps_total: steps,
            calories_total: 2000.0,
            hr_mean: 72.0,
            hr_max: 90,
            sleep_hours_total: sleep,
            d_steps_7d: d_steps,
            d_sleep_7d: d_sleep,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn severe_sleep_deprivation_wins_regardless_of_probability() {
        let agg = aggregate(1500, 4.2, 0.0, 0.0);
        for probability in [0.05, 0.95] {
            let drafts = evaluate(&agg, &user(182.0, 94.0), probability, None, &mut rng());
            let primary = &drafts[0];
            assert_eq!(primary.source, SOURCE_RULES);
            assert_eq!(primary.severity, Severity::Critical);
            assert!(primary.text.contains("4.2 hours"));
        }
    }

    #[test]
    fn zero_sleep_does_not_trigger_the_deprivation_branch() {
        // no sleep data recorded at all is not "slept under five hours"
        let agg = aggregate(9000, 0.0, 0.0, 0.0);
        let drafts = evaluate(&agg, &user(182.0, 94.0), 0.1, None, &mut rng());
        assert_eq!(drafts[0].source, SOURCE_MODEL);
    }

    #[test]
    fn stagnant_low_risk_branch_varies_text_by_overweight_flag() {
        let agg = aggregate(1500, 7.0, 0.0, 0.0);
        // BMI 94 / 1.82^2 = 28.4 -> overweight
        let heavy = evaluate(&agg, &user(182.0, 94.0), 0.3, None, &mut rng());
        // BMI 61.5 / 1.68^2 = 21.8 -> not overweight
        let light = evaluate(&agg, &user(168.0, 61.5), 0.3, None, &mut rng());

        for drafts in [&heavy, &light] {
            assert_eq!(drafts[0].source, SOURCE_RULES);
            assert_eq!(drafts[0].severity, Severity::Warning);
        }
        assert_ne!(heavy[0].text, light[0].text);
        assert!(heavy[0].text.contains("weight"));
    }

    #[test]
    fn contextual_branch_severity_follows_probability_tiers() {
        let agg = aggregate(6000, 7.5, 0.0, 0.0);
        let cases = [
            (0.8, Severity::Critical),
            (0.5, Severity::Warning),
            (0.1, Severity::Advisory),
        ];
        for (probability, severity) in cases {
            let drafts = evaluate(&agg, &user(182.0, 94.0), probability, None, &mut rng());
            assert_eq!(drafts[0].source, SOURCE_MODEL);
            assert_eq!(drafts[0].severity, severity);
        }
    }

    #[test]
    fn source_and_severity_deterministic_across_rng_seeds() {
        let agg = aggregate(9500, 7.5, 0.0, 0.0);
        for seed in 0..16 {
            let mut rng = StdRng::seed_from_u64(seed);
            let drafts = evaluate(&agg, &user(182.0, 94.0), 0.75, None, &mut rng);
            assert_eq!(drafts[0].source, SOURCE_MODEL);
            assert_eq!(drafts[0].severity, Severity::Critical);
        }
    }

    #[test]
    fn recovery_mismatch_standing_rule_adds_a_warning() {
        let agg = aggregate(9500, 7.5, 1.2, -1.0);
        let drafts = evaluate(&agg, &user(182.0, 94.0), 0.1, None, &mut rng());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].source, SOURCE_RULES);
        assert_eq!(drafts[1].severity, Severity::Warning);
    }

    #[test]
    fn two_consecutive_low_step_days_add_an_advisory() {
        let agg = aggregate(2500, 7.5, 0.0, 0.0);
        let drafts = evaluate(&agg, &user(182.0, 94.0), 0.5, Some(2800), &mut rng());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].severity, Severity::Advisory);

        // one low day alone, or no history, stays quiet
        let drafts = evaluate(&agg, &user(182.0, 94.0), 0.5, Some(6000), &mut rng());
        assert_eq!(drafts.len(), 1);
        let drafts = evaluate(&agg, &user(182.0, 94.0), 0.5, None, &mut rng());
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn at_most_one_primary_and_at_most_three_drafts() {
        // all three paths armed at once
        let agg = aggregate(1500, 4.0, 1.2, -1.0);
        let drafts = evaluate(&agg, &user(182.0, 94.0), 0.9, Some(1000), &mut rng());
        assert_eq!(drafts.len(), 3);
        let primaries = drafts
            .iter()
            .filter(|d| d.severity == Severity::Critical && d.source == SOURCE_RULES)
            .count();
        assert_eq!(primaries, 1);
    }

    #[test]
    fn missing_body_metrics_never_count_as_overweight() {
        let user = UserProfile {
            user_id: 2,
            name: "Unknown".to_string(),
            age: None,
            gender: None,
            height_cm: None,
            weight_kg: None,
        };
        assert!(!is_overweight(&user));
    }
}
