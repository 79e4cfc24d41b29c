use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::store::{AppendOutcome, ConversationStore, StoreError};
use crate::models::conversation::{
    ChatMessage, Conversation, ConversationRow, MessageRow, NewConversation, ResumeRecord,
    ResumeRow,
};

/// PostgreSQL-backed conversation store.
///
/// Messages and resumes live in child tables keyed by the conversation's UUID, so
/// rebinding a user to a new provider conversation id keeps their history.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: ConversationRow) -> Result<Conversation, StoreError> {
        let messages = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM conversation_messages WHERE conversation_pk = $1 ORDER BY id ASC",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let resumes = sqlx::query_as::<_, ResumeRow>(
            "SELECT * FROM resumes WHERE conversation_pk = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let id = row.conversation_id.clone();
        Conversation::from_rows(row, messages, resumes)
            .map_err(|source| StoreError::Corrupt { id, source })
    }

    /// Runs a single-row UPDATE keyed by conversation_id, failing if nothing matched.
    async fn update_one<'q>(
        &self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        conversation_id: &str,
    ) -> Result<(), StoreError> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(conversation_id));
        }
        Ok(())
    }
}

fn not_found(conversation_id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "Conversation",
        id: conversation_id.to_string(),
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_or_create(&self, new: &NewConversation) -> Result<Conversation, StoreError> {
        if let Some(existing) = self.get(&new.conversation_id).await? {
            return Ok(existing);
        }

        // The phone number is the identity; a conflict means a known user arrived
        // through a new provider conversation, so the record follows the new id.
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO conversations (id, conversation_id, phone_number, contact_method)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone_number) DO UPDATE
                SET conversation_id = EXCLUDED.conversation_id, updated_at = now()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.conversation_id)
        .bind(new.phone_number.as_str())
        .bind(new.contact_method.as_str())
        .fetch_one(&self.pool)
        .await?;

        if inserted {
            info!(
                "Created conversation {} for {}",
                new.conversation_id, new.phone_number
            );
        } else {
            info!(
                "Rebound existing user {} to conversation {}",
                new.phone_number, new.conversation_id
            );
        }

        self.get(&new.conversation_id)
            .await?
            .ok_or_else(|| not_found(&new.conversation_id))
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
        external_id: Option<&str>,
    ) -> Result<AppendOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes appends for the same conversation across processes.
        let pk: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE conversation_id = $1 FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let pk = pk.ok_or_else(|| not_found(conversation_id))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversation_messages (conversation_pk, external_id, role, content)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(pk)
        .bind(external_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!("Message {external_id:?} already stored for {conversation_id}");
            return Ok(AppendOutcome::Duplicate);
        }

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(pk)
            .execute(&mut *tx)
            .await?;

        let message_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_messages WHERE conversation_pk = $1")
                .bind(pk)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Appended { message_count })
    }

    async fn suspend(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = 'suspended', updated_at = now()
            WHERE conversation_id = $1 AND status = 'active'
            "#,
        )
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_suspension_notice(
        &self,
        conversation_id: &str,
        message_count: i64,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE conversations SET suspension_notice_at = $2, updated_at = now() WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .bind(message_count);
        self.update_one(query, conversation_id).await
    }

    async fn save_summary(&self, conversation_id: &str, summary: &str) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE conversations SET information_summary = $2, updated_at = now() WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .bind(summary);
        self.update_one(query, conversation_id).await
    }

    async fn save_user_name(
        &self,
        conversation_id: &str,
        user_name: &str,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE conversations SET user_name = $2, updated_at = now() WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .bind(user_name);
        self.update_one(query, conversation_id).await
    }

    async fn add_resume(
        &self,
        conversation_id: &str,
        resume: &ResumeRecord,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO resumes (id, conversation_pk, content, file_link, created_at)
            SELECT $1, id, $3, $4, $5 FROM conversations WHERE conversation_id = $2
            "#,
        )
        .bind(resume.id)
        .bind(conversation_id)
        .bind(&resume.content)
        .bind(resume.file_link.as_deref())
        .bind(resume.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(conversation_id));
        }
        info!("Stored resume {} for {conversation_id}", resume.id);
        Ok(())
    }

    async fn try_claim_resume(
        &self,
        conversation_id: &str,
        stale_after: Duration,
    ) -> Result<Option<Uuid>, StoreError> {
        let claim = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET resume_claim_id = $2, resume_claimed_at = now(), updated_at = now()
            WHERE conversation_id = $1
              AND is_resume_generated = FALSE
              AND (resume_claimed_at IS NULL
                   OR resume_claimed_at < now() - make_interval(secs => $3::double precision))
            "#,
        )
        .bind(conversation_id)
        .bind(claim)
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(claim))
    }

    async fn refresh_resume_claim(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET resume_claimed_at = now(), updated_at = now()
            WHERE conversation_id = $1 AND resume_claim_id = $2 AND is_resume_generated = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(claim)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_resume_claim(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET resume_claim_id = NULL, resume_claimed_at = NULL, updated_at = now()
            WHERE conversation_id = $1 AND resume_claim_id = $2 AND is_resume_generated = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(claim)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Resume claim {claim} for {conversation_id} was already superseded");
        }
        Ok(())
    }

    async fn mark_resume_generated(&self, conversation_id: &str) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE conversations
            SET is_resume_generated = TRUE, resume_claim_id = NULL, resume_claimed_at = NULL,
                updated_at = now()
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id);
        self.update_one(query, conversation_id).await
    }
}
