//! Postgres storage for playgrounds, trigger and action instances, and links.
//!
//! The engine only reads these tables, apart from trigger settings updates
//! written back by pollers. Records are created and edited elsewhere.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use triggermenot_core::{ActionInstanceId, PlaygroundId, TriggerInstanceId, UserId};
use triggermenot_workflow::{
    ActionInstance, PlaygroundStore, StoreError, TriggerInstance, TriggerLink,
};

fn invalid(
    entity: &'static str,
    field: &str,
    value: &str,
    e: impl std::fmt::Display,
) -> StoreError {
    StoreError::InvalidRecord {
        entity,
        reason: format!("invalid {} '{}': {}", field, value, e),
    }
}

fn storage_failed(e: sqlx::Error) -> StoreError {
    StoreError::StorageFailed {
        reason: e.to_string(),
    }
}

fn parse_user_id(value: &str) -> Result<UserId, StoreError> {
    UserId::from_str(value).map_err(|e| invalid("playground", "user id", value, e))
}

/// Row type for trigger instance queries.
#[derive(FromRow)]
struct TriggerInstanceRow {
    id: String,
    playground_id: String,
    kind: String,
    settings: JsonValue,
    active: bool,
}

impl TriggerInstanceRow {
    fn try_into_instance(self) -> Result<TriggerInstance, StoreError> {
        const ENTITY: &str = "trigger instance";
        let id = TriggerInstanceId::from_str(&self.id)
            .map_err(|e| invalid(ENTITY, "id", &self.id, e))?;
        let playground_id = PlaygroundId::from_str(&self.playground_id)
            .map_err(|e| invalid(ENTITY, "playground id", &self.playground_id, e))?;
        let kind = self
            .kind
            .parse()
            .map_err(|e: String| invalid(ENTITY, "kind", &self.kind, e))?;

        Ok(TriggerInstance {
            id,
            playground_id,
            kind,
            settings: self.settings,
            active: self.active,
        })
    }
}

/// Row type for action instance queries.
#[derive(FromRow)]
struct ActionInstanceRow {
    id: String,
    playground_id: String,
    kind: String,
    settings: JsonValue,
}

impl ActionInstanceRow {
    fn try_into_instance(self) -> Result<ActionInstance, StoreError> {
        const ENTITY: &str = "action instance";
        let id = ActionInstanceId::from_str(&self.id)
            .map_err(|e| invalid(ENTITY, "id", &self.id, e))?;
        let playground_id = PlaygroundId::from_str(&self.playground_id)
            .map_err(|e| invalid(ENTITY, "playground id", &self.playground_id, e))?;
        let kind = self
            .kind
            .parse()
            .map_err(|e: String| invalid(ENTITY, "kind", &self.kind, e))?;

        Ok(ActionInstance {
            id,
            playground_id,
            kind,
            settings: self.settings,
        })
    }
}

/// Row type for link queries.
#[derive(FromRow)]
struct TriggerLinkRow {
    trigger_id: String,
    action_id: String,
}

impl TriggerLinkRow {
    fn try_into_link(self) -> Result<TriggerLink, StoreError> {
        const ENTITY: &str = "trigger link";
        Ok(TriggerLink {
            trigger_id: TriggerInstanceId::from_str(&self.trigger_id)
                .map_err(|e| invalid(ENTITY, "trigger id", &self.trigger_id, e))?,
            action_id: ActionInstanceId::from_str(&self.action_id)
                .map_err(|e| invalid(ENTITY, "action id", &self.action_id, e))?,
        })
    }
}

/// Repository for playground records.
pub struct PlaygroundRepository {
    pool: PgPool,
}

impl PlaygroundRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlaygroundStore for PlaygroundRepository {
    async fn get_trigger_instance(
        &self,
        id: TriggerInstanceId,
    ) -> Result<Option<TriggerInstance>, StoreError> {
        let row: Option<TriggerInstanceRow> = sqlx::query_as(
            r#"
            SELECT id, playground_id, kind, settings, active
            FROM trigger_instances
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        row.map(TriggerInstanceRow::try_into_instance).transpose()
    }

    async fn list_active_trigger_instances(&self) -> Result<Vec<TriggerInstance>, StoreError> {
        let rows: Vec<TriggerInstanceRow> = sqlx::query_as(
            r#"
            SELECT id, playground_id, kind, settings, active
            FROM trigger_instances
            WHERE active = true
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;

        rows.into_iter().map(|r| r.try_into_instance()).collect()
    }

    async fn get_owning_user(&self, id: TriggerInstanceId) -> Result<Option<UserId>, StoreError> {
        let owner: Option<String> = sqlx::query_scalar(
            r#"
            SELECT p.user_id
            FROM trigger_instances t
            JOIN playgrounds p ON p.id = t.playground_id
            WHERE t.id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        owner.as_deref().map(parse_user_id).transpose()
    }

    async fn get_trigger_links(
        &self,
        id: TriggerInstanceId,
    ) -> Result<Vec<TriggerLink>, StoreError> {
        let rows: Vec<TriggerLinkRow> = sqlx::query_as(
            r#"
            SELECT trigger_id, action_id
            FROM trigger_links
            WHERE trigger_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;

        rows.into_iter().map(|r| r.try_into_link()).collect()
    }

    async fn get_action_instance(
        &self,
        id: ActionInstanceId,
    ) -> Result<Option<ActionInstance>, StoreError> {
        let row: Option<ActionInstanceRow> = sqlx::query_as(
            r#"
            SELECT id, playground_id, kind, settings
            FROM action_instances
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        row.map(ActionInstanceRow::try_into_instance).transpose()
    }

    async fn get_playground_owner(&self, id: PlaygroundId) -> Result<Option<UserId>, StoreError> {
        let owner: Option<String> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM playgrounds
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        owner.as_deref().map(parse_user_id).transpose()
    }

    async fn update_trigger_settings(
        &self,
        id: TriggerInstanceId,
        settings: &JsonValue,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE trigger_instances
            SET settings = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(settings)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(())
    }
}
