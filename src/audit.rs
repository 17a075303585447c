//! Request audit log.
//!
//! Each answered (or failed) question lands as one row in the `requests`
//! table: what was asked, what came back, which model, how long, and whether
//! the cache served it. The `stats` command reads aggregates back out.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::models::QuestionResult;

/// Record one question's outcome. Failures are logged too, with the error
/// code in place of an answer.
pub async fn log_question(
    pool: &SqlitePool,
    question: &str,
    result: &QuestionResult,
    model_id: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    let (answer, error_code, latency_ms, cache_hit) = match result {
        QuestionResult::Answered(a) => {
            (Some(a.text.as_str()), None, a.latency_ms as i64, a.cached)
        }
        QuestionResult::Failed(e) => (None, Some(e.code()), 0i64, false),
    };

    sqlx::query(
        r#"
        INSERT INTO requests (timestamp, question, answer, error_code, model, latency_ms, cache_hit)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(now)
    .bind(question)
    .bind(answer)
    .bind(error_code)
    .bind(model_id)
    .bind(latency_ms)
    .bind(cache_hit)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fire-and-forget variant used on the request path; audit problems must
/// never fail an answer that already succeeded.
pub fn log_question_detached(
    pool: SqlitePool,
    question: String,
    result: QuestionResult,
    model_id: String,
) {
    tokio::spawn(async move {
        if let Err(e) = log_question(&pool, &question, &result, &model_id).await {
            warn!(error = %e, "failed to write audit row");
        }
    });
}

/// Per-model breakdown used by the stats report.
pub struct ModelStats {
    pub model: String,
    pub question_count: i64,
    pub cache_hits: i64,
    pub avg_latency_ms: f64,
}

/// Aggregates over the whole audit log.
pub struct AuditStats {
    pub total_questions: i64,
    pub cache_hits: i64,
    pub failures: i64,
    pub avg_latency_ms: f64,
    pub by_model: Vec<ModelStats>,
}

pub async fn read_stats(pool: &SqlitePool) -> Result<AuditStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(cache_hit), 0) AS hits,
            COALESCE(SUM(CASE WHEN error_code IS NOT NULL THEN 1 ELSE 0 END), 0) AS failures,
            COALESCE(AVG(CASE WHEN error_code IS NULL THEN latency_ms END), 0.0) AS avg_latency
        FROM requests
        "#,
    )
    .fetch_one(pool)
    .await?;

    let model_rows = sqlx::query(
        r#"
        SELECT
            model,
            COUNT(*) AS question_count,
            COALESCE(SUM(cache_hit), 0) AS cache_hits,
            COALESCE(AVG(CASE WHEN error_code IS NULL THEN latency_ms END), 0.0) AS avg_latency
        FROM requests
        GROUP BY model
        ORDER BY question_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_model = model_rows
        .iter()
        .map(|r| ModelStats {
            model: r.get("model"),
            question_count: r.get("question_count"),
            cache_hits: r.get("cache_hits"),
            avg_latency_ms: r.get("avg_latency"),
        })
        .collect();

    Ok(AuditStats {
        total_questions: row.get("total"),
        cache_hits: row.get("hits"),
        failures: row.get("failures"),
        avg_latency_ms: row.get("avg_latency"),
        by_model,
    })
}
