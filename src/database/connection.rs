use anyhow::Result;
use sqlx::postgres::PgPool;
use sqlx::PgPool as Pool;
use crate::models::session::SessionRecord;

#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn create_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idle (
                id SERIAL PRIMARY KEY,
                start_time TIMESTAMP WITH TIME ZONE NOT NULL,
                stop_time TIMESTAMP WITH TIME ZONE NOT NULL,
                procrastination_score INTEGER NOT NULL,
                total_idle_time DOUBLE PRECISION NOT NULL,
                idle_events INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_session(&self, record: &SessionRecord) -> Result<i32> {
        let id: (i32,) = sqlx::query_as(
            "INSERT INTO idle (start_time, stop_time, procrastination_score, total_idle_time, idle_events) VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(record.start_time)
        .bind(record.stop_time)
        .bind(record.procrastination_score)
        .bind(record.total_idle_time)
        .bind(record.idle_events)
        .fetch_one(&self.pool)
        .await?;
        Ok(id.0)
    }

    pub async fn recent_sessions(&self, limit: i64) -> Result<Vec<SessionRecord>> {
        let sessions = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, start_time, stop_time, procrastination_score, total_idle_time, idle_events FROM idle ORDER BY start_time DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }
}
