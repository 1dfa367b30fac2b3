use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{PipelineError, Result};
use crate::models::{
    ActiveModel, DailyAggregate, DailyProbability, RawSample, Recommendation, UserProfile,
};

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PipelineError::Database(e.into()))?;
    Ok(())
}

pub async fn find_user(pool: &PgPool, user_id: i64) -> Result<UserProfile> {
    let row = sqlx::query(
        "SELECT user_id, name, age, gender, height_cm, weight_kg \
         FROM vitals.users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))?;
    Ok(UserProfile {
        user_id: row.get("user_id"),
        name: row.get("name"),
        age: row.get("age"),
        gender: row.get("gender"),
        height_cm: row.get("height_cm"),
        weight_kg: row.get("weight_kg"),
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_sample(
    pool: &PgPool,
    user_id: i64,
    recorded_at: NaiveDateTime,
    heart_rate: Option<i32>,
    steps: Option<i32>,
    calories: Option<f64>,
    sleep_hours: Option<f64>,
    source: &str,
) -> Result<RawSample> {
    let day = recorded_at.date();
    let sample_id: i64 = sqlx::query(
        r#"
        INSERT INTO vitals.raw_samples
        (user_id, recorded_at, day, heart_rate, steps, calories, sleep_hours, source)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING sample_id
        "#,
    )
    .bind(user_id)
    .bind(recorded_at)
    .bind(day)
    .bind(heart_rate)
    .bind(steps)
    .bind(calories)
    .bind(sleep_hours)
    .bind(source)
    .fetch_one(pool)
    .await?
    .get("sample_id");

    Ok(RawSample {
        sample_id,
        user_id,
        recorded_at,
        day,
        heart_rate,
        steps,
        calories,
        sleep_hours,
        source: source.to_string(),
    })
}

pub async fn fetch_day_samples(
    pool: &PgPool,
    user_id: i64,
    day: NaiveDate,
) -> Result<Vec<RawSample>> {
    let rows = sqlx::query(
        "SELECT sample_id, user_id, recorded_at, day, heart_rate, steps, \
         calories, sleep_hours, source \
         FROM vitals.raw_samples WHERE user_id = $1 AND day = $2 \
         ORDER BY recorded_at",
    )
    .bind(user_id)
    .bind(day)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RawSample {
            sample_id: row.get("sample_id"),
            user_id: row.get("user_id"),
            recorded_at: row.get("recorded_at"),
            day: row.get("day"),
            heart_rate: row.get("heart_rate"),
            steps: row.get("steps"),
            calories: row.get("calories"),
            sleep_hours: row.get("sleep_hours"),
            source: row.get("source"),
        })
        .collect())
}

fn aggregate_from_row(row: &PgRow) -> DailyAggregate {
    DailyAggregate {
        agg_id: row.get("agg_id"),
        user_id: row.get("user_id"),
        date: row.get("date"),
        steps_total: row.get("steps_total"),
        calories_total: row.get("calories_total"),
        hr_mean: row.get("hr_mean"),
        hr_max: row.get("hr_max"),
        sleep_hours_total: row.get("sleep_hours_total"),
        d_steps_7d: row.get("d_steps_7d"),
        d_sleep_7d: row.get("d_sleep_7d"),
    }
}

const AGGREGATE_COLUMNS: &str = "agg_id, user_id, date, steps_total, calories_total, \
     hr_mean, hr_max, sleep_hours_total, d_steps_7d, d_sleep_7d";

pub async fn find_aggregate(
    pool: &PgPool,
    user_id: i64,
    date: NaiveDate,
) -> Result<Option<DailyAggregate>> {
    let row = sqlx::query(&format!(
        "SELECT {AGGREGATE_COLUMNS} FROM vitals.daily_aggregates \
         WHERE user_id = $1 AND date = $2",
    ))
    .bind(user_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(aggregate_from_row))
}

/// Full-recompute upsert keyed on the (user_id, date) unique constraint.
/// Concurrent callers for the same user-day race on read-then-write; the
/// conflict target resolves the race to a single committed row.
pub async fn upsert_aggregate(pool: &PgPool, agg: &DailyAggregate) -> Result<DailyAggregate> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO vitals.daily_aggregates
        (user_id, date, steps_total, calories_total, hr_mean, hr_max,
         sleep_hours_total, d_steps_7d, d_sleep_7d)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (user_id, date) DO UPDATE
        SET steps_total = EXCLUDED.steps_total,
            calories_total = EXCLUDED.calories_total,
            hr_mean = EXCLUDED.hr_mean,
            hr_max = EXCLUDED.hr_max,
            sleep_hours_total = EXCLUDED.sleep_hours_total,
            d_steps_7d = EXCLUDED.d_steps_7d,
            d_sleep_7d = EXCLUDED.d_sleep_7d,
            updated_at = now()
        RETURNING {AGGREGATE_COLUMNS}
        "#,
    ))
    .bind(agg.user_id)
    .bind(agg.date)
    .bind(agg.steps_total)
    .bind(agg.calories_total)
    .bind(agg.hr_mean)
    .bind(agg.hr_max)
    .bind(agg.sleep_hours_total)
    .bind(agg.d_steps_7d)
    .bind(agg.d_sleep_7d)
    .fetch_one(pool)
    .await?;

    Ok(aggregate_from_row(&row))
}

pub async fn fetch_aggregate_range(
    pool: &PgPool,
    user_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DailyAggregate>> {
    let rows = sqlx::query(&format!(
        "SELECT {AGGREGATE_COLUMNS} FROM vitals.daily_aggregates \
         WHERE user_id = $1 AND date BETWEEN $2 AND $3 ORDER BY date",
    ))
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(aggregate_from_row).collect())
}

pub async fn steps_total_on(
    pool: &PgPool,
    user_id: i64,
    date: NaiveDate,
) -> Result<Option<i32>> {
    let row = sqlx::query(
        "SELECT steps_total FROM vitals.daily_aggregates \
         WHERE user_id = $1 AND date = $2",
    )
    .bind(user_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get("steps_total")))
}

/// Appends a scoring record. Deliberately no unique constraint: rerunning
/// aggregation for a day keeps the older rows as history.
pub async fn insert_inference_result(
    pool: &PgPool,
    agg_id: i64,
    model_id: Option<i64>,
    prediction_type: &str,
    probability: f64,
    description: &str,
) -> Result<i64> {
    let result_id: i64 = sqlx::query(
        r#"
        INSERT INTO vitals.inference_results
        (agg_id, model_id, prediction_type, probability, description)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING result_id
        "#,
    )
    .bind(agg_id)
    .bind(model_id)
    .bind(prediction_type)
    .bind(probability)
    .bind(description)
    .fetch_one(pool)
    .await?
    .get("result_id");

    Ok(result_id)
}

/// Most recently created active registry row for the given model name.
pub async fn find_active_model(pool: &PgPool, name: &str) -> Result<Option<ActiveModel>> {
    let row = sqlx::query(
        "SELECT model_id, name, version, path FROM vitals.model_registry \
         WHERE name = $1 AND is_active ORDER BY created_at DESC LIMIT 1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| ActiveModel {
        model_id: r.get("model_id"),
        name: r.get("name"),
        version: r.get("version"),
        path: r.get("path"),
    }))
}

pub async fn insert_recommendation(
    pool: &PgPool,
    user_id: i64,
    rec_text: &str,
    source: &str,
    severity: &str,
    created_at: NaiveDateTime,
) -> Result<i64> {
    let rec_id: i64 = sqlx::query(
        r#"
        INSERT INTO vitals.recommendations
        (user_id, rec_text, source, severity, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING rec_id
        "#,
    )
    .bind(user_id)
    .bind(rec_text)
    .bind(source)
    .bind(severity)
    .bind(created_at)
    .fetch_one(pool)
    .await?
    .get("rec_id");

    Ok(rec_id)
}

pub async fn fetch_recommendations(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<Recommendation>> {
    let rows = sqlx::query(
        "SELECT rec_id, user_id, rec_text, source, severity, created_at \
         FROM vitals.recommendations WHERE user_id = $1 \
         ORDER BY created_at DESC LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Recommendation {
            rec_id: row.get("rec_id"),
            user_id: row.get("user_id"),
            rec_text: row.get("rec_text"),
            source: row.get("source"),
            severity: row.get("severity"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Per-date daily probabilities for the weekly rollup, joined back to the
/// aggregate that produced them.
pub async fn fetch_week_probabilities(
    pool: &PgPool,
    user_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DailyProbability>> {
    let rows = sqlx::query(
        "SELECT a.date AS date, r.probability AS probability \
         FROM vitals.inference_results r \
         JOIN vitals.daily_aggregates a ON a.agg_id = r.agg_id \
         WHERE a.user_id = $1 AND a.date BETWEEN $2 AND $3 \
         ORDER BY a.date",
    )
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| DailyProbability {
            date: row.get("date"),
            probability: row.get("probability"),
        })
        .collect())
}

/// Removes weekly-summary rows created on the report date so a rerun
/// leaves exactly one. The only delete in the system.
pub async fn delete_weekly_summaries(
    pool: &PgPool,
    user_id: i64,
    report_date: NaiveDate,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM vitals.recommendations \
         WHERE user_id = $1 AND source = 'weekly_summary' \
         AND created_at >= $2 AND created_at < $3",
    )
    .bind(user_id)
    .bind(report_date.and_hms_opt(0, 0, 0).unwrap_or_default())
    .bind(
        report_date
            .succ_opt()
            .unwrap_or(report_date)
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default(),
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert_delivery_log(
    pool: &PgPool,
    topic_name: &str,
    message_id: &str,
    status: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO vitals.delivery_log (topic_name, message_id, status) \
         VALUES ($1, $2, $3)",
    )
    .bind(topic_name)
    .bind(message_id)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn import_samples_csv(pool: &PgPool, csv_path: &std::path::Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_id: i64,
        recorded_at: NaiveDateTime,
        heart_rate: Option<i32>,
        steps: Option<i32>,
        calories: Option<f64>,
        sleep_hours: Option<f64>,
        source: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|e| PipelineError::Validation(format!("cannot open csv: {e}")))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row =
            result.map_err(|e| PipelineError::Validation(format!("bad csv row: {e}")))?;
        find_user(pool, row.user_id).await?;
        insert_sample(
            pool,
            row.user_id,
            row.recorded_at,
            row.heart_rate,
            row.steps,
            row.calories,
            row.sleep_hours,
            row.source.as_deref().unwrap_or("import"),
        )
        .await?;
        inserted += 1;
    }

    Ok(inserted)
}

pub async fn seed(pool: &PgPool) -> Result<()> {
    let users = vec![
        ("Dana Kovach", 34, "female", 168.0, 61.5),
        ("Mikhail Orlov", 41, "male", 182.0, 94.0),
        ("Priya Raman", 28, "female", 159.0, 52.0),
    ];

    let mut user_ids = Vec::new();
    for (name, age, gender, height_cm, weight_kg) in users {
        let user_id: i64 = sqlx::query(
            r#"
            INSERT INTO vitals.users (name, age, gender, height_cm, weight_kg)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING user_id
            "#,
        )
        .bind(name)
        .bind(age)
        .bind(gender)
        .bind(height_cm)
        .bind(weight_kg)
        .fetch_one(pool)
        .await?
        .get("user_id");
        user_ids.push(user_id);
    }

    sqlx::query(
        r#"
        INSERT INTO vitals.model_registry (name, version, path, is_active)
        VALUES ('fatigue_risk', 'v1', 'models/fatigue_model_v1.json', TRUE)
        ON CONFLICT (name, version) DO NOTHING
        "#,
    )
    .execute(pool)
    .await?;

    // A week of plausible samples for the first seed user.
    let today = chrono::Utc::now().date_naive();
    let profiles = [
        (7200, 2150.0, 72, 7.4),
        (4100, 1900.0, 75, 6.8),
        (9800, 2400.0, 70, 7.9),
        (2600, 1750.0, 78, 5.1),
        (8300, 2300.0, 71, 7.2),
        (1500, 1600.0, 80, 4.4),
        (6200, 2050.0, 73, 6.5),
    ];
    if let Some(&user_id) = user_ids.first() {
        for (offset, (steps, calories, hr, sleep)) in profiles.iter().enumerate() {
            let day = today - chrono::Duration::days(6 - offset as i64);
            let recorded_at = day.and_hms_opt(21, 30, 0).unwrap_or_default();
            insert_sample(
                pool,
                user_id,
                recorded_at,
                Some(*hr),
                Some(*steps),
                Some(*calories),
                Some(*sleep),
                "seed",
            )
            .await?;
        }
    }

    Ok(())
}
