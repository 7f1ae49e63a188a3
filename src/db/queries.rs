use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use crate::models::event::{EventKind, EventRecord, EventStatus};
use crate::models::job::{JobType, QueueJob};

const EVENT_COLUMNS: &str = "id, kind, content, captured_at, status, checksum, order_id, \
                             image_path, image_size, image_id, updated_at";

const JOB_COLUMNS: &str = "id, job_type, payload, retries, created_at, event_id";

/// Columns of a new `events` row.
#[derive(Debug, Clone)]
pub struct NewEventRow<'a> {
    pub kind: EventKind,
    pub content: &'a str,
    pub captured_at: DateTime<Utc>,
    pub order_id: Option<&'a str>,
    pub image_path: Option<&'a str>,
    pub image_size: Option<i64>,
    pub image_id: Option<&'a str>,
}

fn decode_err<E>(e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(e))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn event_from_row(r: &SqliteRow) -> Result<EventRecord, sqlx::Error> {
    let kind: String = r.try_get("kind")?;
    let status: String = r.try_get("status")?;

    Ok(EventRecord {
        id: r.try_get("id")?,
        kind: kind.parse().map_err(decode_err)?,
        content: r.try_get("content")?,
        captured_at: from_millis(r.try_get("captured_at")?),
        status: status.parse().map_err(decode_err)?,
        checksum: r.try_get("checksum")?,
        order_id: r.try_get("order_id")?,
        image_path: r.try_get("image_path")?,
        image_size: r.try_get("image_size")?,
        image_id: r.try_get("image_id")?,
        updated_at: from_millis(r.try_get("updated_at")?),
    })
}

fn job_from_row(r: &SqliteRow) -> Result<QueueJob, sqlx::Error> {
    let job_type: String = r.try_get("job_type")?;

    Ok(QueueJob {
        id: r.try_get("id")?,
        job_type: job_type.parse().map_err(decode_err)?,
        payload: r.try_get("payload")?,
        retries: r.try_get("retries")?,
        created_at: from_millis(r.try_get("created_at")?),
        event_id: r.try_get("event_id")?,
    })
}

/// Insert a new event in `pending` state and return its id
pub async fn insert_event<'e, E>(executor: E, row: &NewEventRow<'_>) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let captured_at = row.captured_at.timestamp_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO events (kind, content, captured_at, status, order_id,
                            image_path, image_size, image_id, updated_at)
        VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?3)
        "#,
    )
    .bind(row.kind.to_string())
    .bind(row.content)
    .bind(captured_at)
    .bind(row.order_id)
    .bind(row.image_path)
    .bind(row.image_size)
    .bind(row.image_id)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert a queue job and return its id
pub async fn insert_job<'e, E>(
    executor: E,
    job_type: &JobType,
    payload: &str,
    created_at: DateTime<Utc>,
    event_id: Option<i64>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let job_type = match job_type {
        JobType::Unknown(name) => name.clone(),
        known => known.to_string(),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO queue_jobs (job_type, payload, retries, created_at, event_id)
        VALUES (?1, ?2, 0, ?3, ?4)
        "#,
    )
    .bind(job_type)
    .bind(payload)
    .bind(created_at.timestamp_millis())
    .bind(event_id)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Get an event by ID
pub async fn get_event<'e, E>(executor: E, id: i64) -> Result<Option<EventRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(event_from_row).transpose()
}

/// Overwrite status, keeping the previous checksum when none is given
pub async fn set_event_status<'e, E>(
    executor: E,
    id: i64,
    status: EventStatus,
    checksum: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE events
        SET status = ?1,
            checksum = COALESCE(?2, checksum),
            updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(status.to_string())
    .bind(checksum)
    .bind(updated_at.timestamp_millis())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Oldest job by creation time; ties broken by insertion order
pub async fn oldest_job<'e, E>(executor: E) -> Result<Option<QueueJob>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM queue_jobs ORDER BY created_at ASC, id ASC LIMIT 1"
    ))
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Increment retry count
pub async fn increment_retries<'e, E>(executor: E, job_id: i64) -> Result<i32, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        UPDATE queue_jobs
        SET retries = retries + 1
        WHERE id = ?1
        RETURNING retries
        "#,
    )
    .bind(job_id)
    .fetch_one(executor)
    .await?;

    row.try_get("retries")
}

pub async fn delete_job<'e, E>(executor: E, job_id: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM queue_jobs WHERE id = ?1")
        .bind(job_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Most recent events first
pub async fn list_events<'e, E>(executor: E, limit: i64) -> Result<Vec<EventRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events ORDER BY captured_at DESC, id DESC LIMIT ?1"
    ))
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.iter().map(event_from_row).collect()
}

pub async fn count_jobs<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT COUNT(*) AS depth FROM queue_jobs")
        .fetch_one(executor)
        .await?;

    row.try_get("depth")
}

/// Delete delivered or failed events captured before `cutoff` that no job references
pub async fn purge_settled_before<'e, E>(
    executor: E,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM events
        WHERE captured_at < ?1
          AND status IN ('buffered', 'confirmed', 'failed')
          AND id NOT IN (SELECT event_id FROM queue_jobs WHERE event_id IS NOT NULL)
        "#,
    )
    .bind(cutoff.timestamp_millis())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
