use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::Date;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64, // store-assigned, 0 before first save
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 digest, never the submitted plaintext
    pub name: String,
    pub birth_date: Date,
}
