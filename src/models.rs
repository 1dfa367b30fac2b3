use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: i64,
    pub name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
}

/// One ingested measurement. Immutable once stored.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub sample_id: i64,
    pub user_id: i64,
    pub recorded_at: NaiveDateTime,
    pub day: NaiveDate,
    pub heart_rate: Option<i32>,
    pub steps: Option<i32>,
    pub calories: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub source: String,
}

/// Ingestion payload as it arrives from the phone/device topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplePayload {
    pub user_id: Option<i64>,
    pub timestamp: NaiveDateTime,
    pub heart_rate: Option<i32>,
    pub steps: Option<i32>,
    pub calories: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub source: Option<String>,
}

/// One row per (user_id, date); recomputed in place on every sample
/// for that day. The z-score columns are reserved and never written.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregate {
    pub agg_id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub steps_total: i32,
    pub calories_total: f64,
    pub hr_mean: f64,
    pub hr_max: i32,
    pub sleep_hours_total: f64,
    pub d_steps_7d: f64,
    pub d_sleep_7d: f64,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub rec_id: i64,
    pub user_id: i64,
    pub rec_text: String,
    pub source: String,
    pub severity: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub model_id: i64,
    pub name: String,
    pub version: String,
    pub path: String,
}

/// Daily probability read back for the weekly rollup.
#[derive(Debug, Clone)]
pub struct DailyProbability {
    pub date: NaiveDate,
    pub probability: f64,
}
