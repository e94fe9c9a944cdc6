use async_trait::async_trait;
use sqlx::PgPool;

use crate::users::repo_types::User;

/// Persistence collaborator for user records. Uniqueness of `username`
/// under concurrent registration is enforced by the storage layer.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_all(&self) -> anyhow::Result<Vec<User>>;

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    /// Insert when the record has no id yet, update otherwise. Returns the
    /// persisted record with its store-assigned id.
    async fn save(&self, user: User) -> anyhow::Result<User>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_all(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, name, birth_date
            FROM users
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, name, birth_date
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, name, birth_date
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn save(&self, user: User) -> anyhow::Result<User> {
        let saved = if user.id == 0 {
            sqlx::query_as::<_, User>(
                r#"
                INSERT INTO users (username, password_hash, name, birth_date)
                VALUES ($1, $2, $3, $4)
                RETURNING id, username, password_hash, name, birth_date
                "#,
            )
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(user.birth_date)
            .fetch_one(&self.db)
            .await?
        } else {
            sqlx::query_as::<_, User>(
                r#"
                UPDATE users
                SET username = $2, password_hash = $3, name = $4, birth_date = $5
                WHERE id = $1
                RETURNING id, username, password_hash, name, birth_date
                "#,
            )
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(user.birth_date)
            .fetch_one(&self.db)
            .await?
        };
        Ok(saved)
    }
}
