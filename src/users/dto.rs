use serde::{Deserialize, Serialize};
use time::Date;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub name: String,
    pub birth_date: Date,
}

/// Request body for a full-record user update.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub name: String,
    pub birth_date: Date,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response returned after a successful login. `password` echoes the
/// stored hash, never the submitted plaintext. Built per attempt, not
/// persisted.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub password: String,
    pub token: String,
}
