//! Client records. Administrative CRUD lives elsewhere; the orchestration
//! machine only ever reads client identity.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ConveyorResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub async fn create(pool: &PgPool, name: &str, domain: Option<&str>) -> ConveyorResult<Self> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (name, domain)
            VALUES ($1, $2)
            RETURNING id, name, domain, created_at
            "#,
        )
        .bind(name)
        .bind(domain)
        .fetch_one(pool)
        .await?;
        Ok(client)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> ConveyorResult<Option<Self>> {
        let client = sqlx::query_as::<_, Client>(
            "SELECT id, name, domain, created_at FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(client)
    }
}
