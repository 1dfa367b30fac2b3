use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::db;
use crate::error::{PipelineError, Result};
use crate::models::{RawSample, SamplePayload};

/// Topic the phone/device payloads travel on. Delivery is at-least-once;
/// every publish attempt leaves a delivery-log row.
pub const SAMPLES_TOPIC: &str = "health_samples";

/// Parses and validates one ingestion payload. A payload without a
/// userId is rejected at the boundary.
pub fn parse_payload(json: &str) -> Result<SamplePayload> {
    let payload: SamplePayload = serde_json::from_str(json)?;
    validate(&payload)?;
    Ok(payload)
}

pub fn validate(payload: &SamplePayload) -> Result<()> {
    if payload.user_id.is_none() {
        return Err(PipelineError::Validation(
            "sample payload is missing userId".to_string(),
        ));
    }
    Ok(())
}

/// Persists one validated sample and records the delivery attempt.
/// Raw samples are append-only; re-delivery of the same payload simply
/// adds another row, and aggregation recomputes from the full set.
pub async fn ingest_sample(pool: &PgPool, payload: &SamplePayload) -> Result<RawSample> {
    validate(payload)?;
    let user_id = payload
        .user_id
        .ok_or_else(|| PipelineError::Validation("sample payload is missing userId".to_string()))?;

    db::find_user(pool, user_id).await?;

    let message_id = Uuid::new_v4().to_string();
    let source = payload.source.as_deref().unwrap_or("unknown");

    let result = db::insert_sample(
        pool,
        user_id,
        payload.timestamp,
        payload.heart_rate,
        payload.steps,
        payload.calories,
        payload.sleep_hours,
        source,
    )
    .await;

    match result {
        Ok(sample) => {
            db::insert_delivery_log(pool, SAMPLES_TOPIC, &message_id, "SUCCESS").await?;
            info!(user_id, %message_id, source, "sample ingested");
            Ok(sample)
        }
        Err(err) => {
            error!(user_id, %message_id, %err, "sample ingestion failed");
            db::insert_delivery_log(pool, SAMPLES_TOPIC, &message_id, "FAILED").await?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parses_camel_case_fields() {
        let payload = parse_payload(
            r#"{
                "userId": 7,
                "timestamp": "2026-03-10T21:30:00",
                "heartRate": 74,
                "steps": 5200,
                "calories": 1980.5,
                "sleepHours": 6.8,
                "source": "phone"
            }"#,
        )
        .unwrap();
        assert_eq!(payload.user_id, Some(7));
        assert_eq!(payload.heart_rate, Some(74));
        assert_eq!(payload.sleep_hours, Some(6.8));
        assert_eq!(payload.source.as_deref(), Some("phone"));
    }

    #[test]
    fn missing_user_id_is_a_validation_error() {
        let err = parse_payload(
            r#"{"timestamp": "2026-03-10T21:30:00", "steps": 100}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn optional_metrics_may_be_absent() {
        let payload =
            parse_payload(r#"{"userId": 3, "timestamp": "2026-03-10T08:00:00"}"#).unwrap();
        assert_eq!(payload.steps, None);
        assert_eq!(payload.heart_rate, None);
        assert_eq!(payload.source, None);
    }
}
