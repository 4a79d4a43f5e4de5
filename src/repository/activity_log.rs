//! Activity log repository

use crate::domain::{ActivityLog, ActivityLogQuery, CreateActivityLogInput, StringUuid};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    async fn create(&self, input: &CreateActivityLogInput) -> Result<()>;
    async fn find(&self, query: &ActivityLogQuery) -> Result<Vec<ActivityLog>>;
    async fn count(&self, query: &ActivityLogQuery) -> Result<i64>;
    /// Delete up to `batch_size` rows whose retention has passed. Returns the
    /// number of rows removed so the sweeper can decide whether to continue.
    async fn delete_expired(&self, batch_size: u32) -> Result<u64>;
    /// GDPR: remove all rows for a user
    async fn delete_for_user(&self, user_id: StringUuid) -> Result<u64>;
}

pub struct ActivityLogRepositoryImpl {
    pool: MySqlPool,
}

impl ActivityLogRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, app_id, user_id, event_type, severity, timestamp, ip, user_agent, \
                       details, expires_at, is_anomaly";

fn push_filters(sql: &mut String, query: &ActivityLogQuery) {
    if query.app_id.is_some() {
        sql.push_str(" AND app_id = ?");
    }
    if query.user_id.is_some() {
        sql.push_str(" AND user_id = ?");
    }
    if query.event_type.is_some() {
        sql.push_str(" AND event_type = ?");
    }
    if query.severity.is_some() {
        sql.push_str(" AND severity = ?");
    }
    if query.is_anomaly.is_some() {
        sql.push_str(" AND is_anomaly = ?");
    }
    if query.from_date.is_some() {
        sql.push_str(" AND timestamp >= ?");
    }
    if query.to_date.is_some() {
        sql.push_str(" AND timestamp <= ?");
    }
}

macro_rules! bind_filters {
    ($builder:expr, $query:expr) => {{
        let mut b = $builder;
        if let Some(app_id) = $query.app_id {
            b = b.bind(app_id);
        }
        if let Some(user_id) = $query.user_id {
            b = b.bind(user_id);
        }
        if let Some(ref event_type) = $query.event_type {
            b = b.bind(event_type);
        }
        if let Some(ref severity) = $query.severity {
            b = b.bind(severity);
        }
        if let Some(is_anomaly) = $query.is_anomaly {
            b = b.bind(is_anomaly);
        }
        if let Some(from_date) = $query.from_date {
            b = b.bind(from_date);
        }
        if let Some(to_date) = $query.to_date {
            b = b.bind(to_date);
        }
        b
    }};
}

#[async_trait]
impl ActivityLogRepository for ActivityLogRepositoryImpl {
    async fn create(&self, input: &CreateActivityLogInput) -> Result<()> {
        let details = input
            .details
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO activity_logs
                (id, app_id, user_id, event_type, severity, timestamp, ip, user_agent,
                 details, expires_at, is_anomaly)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(StringUuid::new_v4())
        .bind(input.app_id)
        .bind(input.user_id)
        .bind(&input.event_type)
        .bind(&input.severity)
        .bind(input.timestamp)
        .bind(&input.ip)
        .bind(&input.user_agent)
        .bind(details)
        .bind(input.expires_at)
        .bind(input.is_anomaly)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, query: &ActivityLogQuery) -> Result<Vec<ActivityLog>> {
        let mut sql = format!("SELECT {} FROM activity_logs WHERE 1=1", COLUMNS);
        push_filters(&mut sql, query);
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let builder = bind_filters!(sqlx::query_as::<_, ActivityLog>(&sql), query);

        let limit = query.limit.unwrap_or(50).min(200);
        let offset = query.offset.unwrap_or(0);
        let logs = builder.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        Ok(logs)
    }

    async fn count(&self, query: &ActivityLogQuery) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM activity_logs WHERE 1=1");
        push_filters(&mut sql, query);

        let builder = bind_filters!(sqlx::query_as::<_, (i64,)>(&sql), query);
        let (count,) = builder.fetch_one(&self.pool).await?;

        Ok(count)
    }

    async fn delete_expired(&self, batch_size: u32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM activity_logs WHERE expires_at < NOW() LIMIT ?")
            .bind(batch_size)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_for_user(&self, user_id: StringUuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM activity_logs WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
