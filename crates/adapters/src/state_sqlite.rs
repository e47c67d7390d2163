//! SQLite interaction ledger store

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use threadline_domain::{
    InteractionRepo, InteractionState, PostId, ReactionKind, ReplyId, StoreError, UserId,
    VoteKind,
};

/// SQLite-backed ledger store
pub struct SqliteInteractionRepo {
    pool: SqlitePool,
}

impl SqliteInteractionRepo {
    /// Open (or create) the database file and run migrations
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("Failed to create directory: {}", e)))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS ledger_votes (
                user_id TEXT NOT NULL,
                reply_id TEXT NOT NULL,
                vote TEXT,
                PRIMARY KEY (user_id, reply_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ledger_reactions (
                user_id TEXT NOT NULL,
                reply_id TEXT NOT NULL,
                reaction TEXT,
                PRIMARY KEY (user_id, reply_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ledger_bookmarks (
                user_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                PRIMARY KEY (user_id, post_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ledger_likes (
                user_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                liked INTEGER NOT NULL,
                PRIMARY KEY (user_id, post_id)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(())
    }

    /// Cheap connectivity probe
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

fn parse_vote(value: &str) -> Result<VoteKind, StoreError> {
    match value {
        "up" => Ok(VoteKind::Up),
        "down" => Ok(VoteKind::Down),
        other => Err(StoreError::Serialization(format!(
            "Unknown vote kind: {}",
            other
        ))),
    }
}

#[async_trait]
impl InteractionRepo for SqliteInteractionRepo {
    async fn load(&self, user_id: &UserId) -> Result<InteractionState, StoreError> {
        let mut state = InteractionState::default();

        let votes: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT reply_id, vote FROM ledger_votes WHERE user_id = ?")
                .bind(user_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        for (reply_id, vote) in votes {
            let vote = vote.as_deref().map(parse_vote).transpose()?;
            state.votes.insert(ReplyId::from(reply_id), vote);
        }

        let reactions: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT reply_id, reaction FROM ledger_reactions WHERE user_id = ?")
                .bind(user_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        for (reply_id, reaction) in reactions {
            state
                .reactions
                .insert(ReplyId::from(reply_id), reaction.map(ReactionKind::from));
        }

        let bookmarks: Vec<(String,)> =
            sqlx::query_as("SELECT post_id FROM ledger_bookmarks WHERE user_id = ?")
                .bind(user_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        state.bookmarks = bookmarks
            .into_iter()
            .map(|(post_id,)| PostId::from(post_id))
            .collect();

        let likes: Vec<(String, bool)> =
            sqlx::query_as("SELECT post_id, liked FROM ledger_likes WHERE user_id = ?")
                .bind(user_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        state.likes = likes
            .into_iter()
            .map(|(post_id, liked)| (PostId::from(post_id), liked))
            .collect();

        Ok(state)
    }

    async fn save(&self, user_id: &UserId, state: &InteractionState) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        for table in [
            "ledger_votes",
            "ledger_reactions",
            "ledger_bookmarks",
            "ledger_likes",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = ?", table))
                .bind(user_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        for (reply_id, vote) in &state.votes {
            sqlx::query("INSERT INTO ledger_votes (user_id, reply_id, vote) VALUES (?, ?, ?)")
                .bind(user_id.as_str())
                .bind(reply_id.as_str())
                .bind(vote.map(|v| v.as_str()))
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        for (reply_id, reaction) in &state.reactions {
            sqlx::query(
                "INSERT INTO ledger_reactions (user_id, reply_id, reaction) VALUES (?, ?, ?)",
            )
            .bind(user_id.as_str())
            .bind(reply_id.as_str())
            .bind(reaction.as_ref().map(|r| r.as_str()))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        for post_id in &state.bookmarks {
            sqlx::query("INSERT INTO ledger_bookmarks (user_id, post_id) VALUES (?, ?)")
                .bind(user_id.as_str())
                .bind(post_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        for (post_id, liked) in &state.likes {
            sqlx::query("INSERT INTO ledger_likes (user_id, post_id, liked) VALUES (?, ?, ?)")
                .bind(user_id.as_str())
                .bind(post_id.as_str())
                .bind(*liked)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(
            user_id = %user_id,
            votes = state.votes.len(),
            reactions = state.reactions.len(),
            "Saved interaction ledger"
        );

        Ok(())
    }
}
