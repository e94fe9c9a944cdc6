use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::users::dto::{LoginRequest, LoginResponse, RegisterRequest, UpdateRequest};
use crate::users::password::{hash_password, verify_password};
use crate::users::repo::UserStore;
use crate::users::repo_types::User;

pub async fn list_users(store: &dyn UserStore) -> Result<Vec<User>, ApiError> {
    Ok(store.find_all().await?)
}

pub async fn find_user_by_id(store: &dyn UserStore, id: i64) -> Result<Option<User>, ApiError> {
    Ok(store.find_by_id(id).await?)
}

/// Whole years between `birth` and `today`, calendar-aware: the year
/// difference, minus one if the birthday has not yet occurred this year.
fn age_in_years(birth: Date, today: Date) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month() as u8, today.day()) < (birth.month() as u8, birth.day()) {
        age -= 1;
    }
    age
}

fn ensure_adult(birth_date: Date) -> Result<(), ApiError> {
    let age = age_in_years(birth_date, OffsetDateTime::now_utc().date());
    if age < 18 {
        warn!(age, "applicant under 18");
        return Err(ApiError::Conflict("User is under 18 years old".into()));
    }
    Ok(())
}

fn basic_token(username: &str, password: &str) -> String {
    let auth = format!("{}:{}", username, password);
    format!("Basic {}", BASE64.encode(auth.as_bytes()))
}

pub async fn register_user(
    store: &dyn UserStore,
    candidate: RegisterRequest,
) -> Result<User, ApiError> {
    if store.find_by_username(&candidate.username).await?.is_some() {
        warn!(username = %candidate.username, "username already registered");
        return Err(ApiError::Conflict("User already exists".into()));
    }

    ensure_adult(candidate.birth_date)?;

    let password_hash = hash_password(&candidate.password)?;
    let user = store
        .save(User {
            id: 0,
            username: candidate.username,
            password_hash,
            name: candidate.name,
            birth_date: candidate.birth_date,
        })
        .await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

pub async fn update_user(
    store: &dyn UserStore,
    candidate: UpdateRequest,
) -> Result<User, ApiError> {
    if store.find_by_id(candidate.id).await?.is_none() {
        warn!(user_id = %candidate.id, "update target not found");
        return Err(ApiError::NotFound("User not found".into()));
    }

    // The username may match the record being updated; only a different
    // owner is a conflict.
    if let Some(existing) = store.find_by_username(&candidate.username).await? {
        if existing.id != candidate.id {
            warn!(username = %candidate.username, "username claimed by another account");
            return Err(ApiError::Conflict("User already exists".into()));
        }
    }

    ensure_adult(candidate.birth_date)?;

    // The supplied password is hashed on every update. Callers must resend
    // the intended plaintext each time; resending a digest double-hashes it.
    let password_hash = hash_password(&candidate.password)?;
    let user = store
        .save(User {
            id: candidate.id,
            username: candidate.username,
            password_hash,
            name: candidate.name,
            birth_date: candidate.birth_date,
        })
        .await?;

    info!(user_id = %user.id, username = %user.username, "user updated");
    Ok(user)
}

pub async fn authenticate(
    store: &dyn UserStore,
    credentials: LoginRequest,
) -> Result<LoginResponse, ApiError> {
    let user = match store.find_by_username(&credentials.username).await? {
        Some(u) => u,
        None => {
            warn!(username = %credentials.username, "login unknown username");
            return Err(ApiError::Unauthorized("Invalid username or password".into()));
        }
    };

    if !verify_password(&credentials.password, &user.password_hash)? {
        warn!(username = %credentials.username, user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Invalid username or password".into()));
    }

    let token = basic_token(&credentials.username, &credentials.password);

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok(LoginResponse {
        id: user.id,
        username: user.username,
        name: user.name,
        password: user.password_hash,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::macros::date;

    #[derive(Default)]
    struct MemStore {
        users: Mutex<Vec<User>>,
    }

    #[async_trait]
    impl UserStore for MemStore {
        async fn find_all(&self) -> anyhow::Result<Vec<User>> {
            Ok(self.users.lock().unwrap().clone())
        }

        async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.id == id)
                .cloned())
        }

        async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.username == username)
                .cloned())
        }

        async fn save(&self, mut user: User) -> anyhow::Result<User> {
            let mut users = self.users.lock().unwrap();
            if user.id == 0 {
                user.id = users.len() as i64 + 1;
                users.push(user.clone());
            } else if let Some(slot) = users.iter_mut().find(|u| u.id == user.id) {
                *slot = user.clone();
            }
            Ok(user)
        }
    }

    fn years_ago(years: i32) -> Date {
        let today = OffsetDateTime::now_utc().date();
        today.replace_year(today.year() - years).unwrap_or_else(|_| {
            // Feb 29 with no counterpart in the target year
            Date::from_calendar_date(today.year() - years, time::Month::February, 28).unwrap()
        })
    }

    fn register_req(username: &str, password: &str, birth_date: Date) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            password: password.into(),
            name: "Test User".into(),
            birth_date,
        }
    }

    fn update_req(id: i64, username: &str, password: &str, birth_date: Date) -> UpdateRequest {
        UpdateRequest {
            id,
            username: username.into(),
            password: password.into(),
            name: "Test User".into(),
            birth_date,
        }
    }

    fn login_req(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    #[test]
    fn age_counts_whole_calendar_years() {
        // birthday is today
        assert_eq!(age_in_years(date!(2006 - 06 - 15), date!(2024 - 06 - 15)), 18);
        // birthday tomorrow: still 17
        assert_eq!(age_in_years(date!(2006 - 06 - 16), date!(2024 - 06 - 15)), 17);
        // birthday yesterday
        assert_eq!(age_in_years(date!(2006 - 06 - 14), date!(2024 - 06 - 15)), 18);
        // year boundary
        assert_eq!(age_in_years(date!(2000 - 12 - 31), date!(2024 - 01 - 01)), 23);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username() {
        let store = MemStore::default();
        register_user(&store, register_req("alice", "pw-one", years_ago(30)))
            .await
            .expect("first registration");

        let err = register_user(&store, register_req("alice", "pw-two", years_ago(25)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_rejects_underage() {
        let store = MemStore::default();
        let err = register_user(&store, register_req("kid", "password1", years_ago(17)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_accepts_exactly_eighteen() {
        let store = MemStore::default();
        let user = register_user(&store, register_req("adult", "password1", years_ago(18)))
            .await
            .expect("18th birthday today is old enough");
        assert_eq!(user.id, 1);
    }

    #[tokio::test]
    async fn register_never_stores_plaintext() {
        let store = MemStore::default();
        let user = register_user(&store, register_req("bob", "s3cret-pw", years_ago(40)))
            .await
            .expect("registration");
        assert_ne!(user.password_hash, "s3cret-pw");
        assert!(verify_password("s3cret-pw", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn authenticate_returns_decodable_basic_token() {
        let store = MemStore::default();
        let registered = register_user(&store, register_req("carol", "hunter22", years_ago(22)))
            .await
            .expect("registration");

        let login = authenticate(&store, login_req("carol", "hunter22"))
            .await
            .expect("login");
        assert_eq!(login.id, registered.id);
        assert_eq!(login.name, "Test User");
        // password field echoes the stored hash, not the plaintext
        assert_eq!(login.password, registered.password_hash);

        let encoded = login.token.strip_prefix("Basic ").expect("scheme prefix");
        let decoded = BASE64.decode(encoded).expect("valid base64");
        assert_eq!(decoded, b"carol:hunter22");
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_password() {
        let store = MemStore::default();
        register_user(&store, register_req("dave", "right-pw", years_ago(33)))
            .await
            .expect("registration");

        let err = authenticate(&store, login_req("dave", "wrong-pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_username() {
        let store = MemStore::default();
        let err = authenticate(&store, login_req("nobody", "whatever"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let store = MemStore::default();
        let err = update_user(&store, update_req(99, "ghost", "password1", years_ago(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_rejects_username_owned_by_another_account() {
        let store = MemStore::default();
        register_user(&store, register_req("erin", "pw-erin", years_ago(28)))
            .await
            .expect("registration");
        let frank = register_user(&store, register_req("frank", "pw-frank", years_ago(28)))
            .await
            .expect("registration");

        let err = update_user(&store, update_req(frank.id, "erin", "pw-frank", years_ago(28)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_keeps_own_unchanged_username() {
        let store = MemStore::default();
        let user = register_user(&store, register_req("grace", "pw-grace", years_ago(28)))
            .await
            .expect("registration");

        let updated = update_user(&store, update_req(user.id, "grace", "pw-grace", years_ago(28)))
            .await
            .expect("own username is not a conflict");
        assert_eq!(updated.id, user.id);
    }

    #[tokio::test]
    async fn update_rejects_underage_birth_date() {
        let store = MemStore::default();
        let user = register_user(&store, register_req("heidi", "pw-heidi", years_ago(28)))
            .await
            .expect("registration");

        let err = update_user(&store, update_req(user.id, "heidi", "pw-heidi", years_ago(17)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_rehashes_supplied_password() {
        let store = MemStore::default();
        let user = register_user(&store, register_req("ivan", "pw-ivan", years_ago(28)))
            .await
            .expect("registration");

        let updated = update_user(&store, update_req(user.id, "ivan", "pw-ivan", years_ago(28)))
            .await
            .expect("update");
        // fresh salt each time: same plaintext, different digest
        assert_ne!(updated.password_hash, user.password_hash);
        assert!(verify_password("pw-ivan", &updated.password_hash).unwrap());
    }

    #[tokio::test]
    async fn list_and_find_reflect_the_store() {
        let store = MemStore::default();
        assert!(list_users(&store).await.unwrap().is_empty());
        assert!(find_user_by_id(&store, 1).await.unwrap().is_none());

        let user = register_user(&store, register_req("judy", "pw-judy", years_ago(45)))
            .await
            .expect("registration");

        assert_eq!(list_users(&store).await.unwrap().len(), 1);
        let found = find_user_by_id(&store, user.id)
            .await
            .unwrap()
            .expect("registered user is findable");
        assert_eq!(found.username, "judy");
    }
}
