use crate::db;
use crate::domain::{Role, ValidationError};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(salt: &str, password: &str, expected_hash: &str) -> bool {
    let actual = hash_password(salt, password);
    actual.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            "password",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let u = username.trim();
    if u.is_empty() || u.len() > 150 {
        return Err(ValidationError::new("username", "username must be 1..=150 characters"));
    }
    if !u
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+'))
    {
        return Err(ValidationError::new(
            "username",
            "username may only contain letters, digits and . _ - @ +",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewAccount {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_username(&self.username)?;
        validate_password(&self.password)?;
        if !self.email.contains('@') {
            return Err(ValidationError::new("email", "email must be a valid address"));
        }
        Ok(())
    }
}

/// Inserts the account and its role row; callers own the surrounding transaction.
pub fn create_account(
    conn: &Connection,
    account: &NewAccount,
    role: Role,
    department_id: Option<&str>,
) -> rusqlite::Result<String> {
    let user_id = Uuid::new_v4().to_string();
    let salt = new_salt();
    let now = db::now_timestamp();
    conn.execute(
        "INSERT INTO users(id, username, password_hash, password_salt, email, first_name,
                           last_name, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            account.username.trim(),
            hash_password(&salt, &account.password),
            &salt,
            account.email.trim(),
            account.first_name.trim(),
            account.last_name.trim(),
            &now,
        ),
    )?;
    set_role(conn, &user_id, role, department_id)?;
    Ok(user_id)
}

pub fn set_role(
    conn: &Connection,
    user_id: &str,
    role: Role,
    department_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO user_roles(user_id, role, department_id, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
           role = excluded.role,
           department_id = excluded.department_id",
        (user_id, role.as_str(), department_id, db::now_timestamp()),
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub user_id: String,
    pub password_hash: String,
    pub password_salt: String,
    pub is_active: bool,
}

pub fn credentials_for(conn: &Connection, username: &str) -> rusqlite::Result<Option<StoredCredentials>> {
    conn.query_row(
        "SELECT id, password_hash, password_salt, is_active FROM users WHERE username = ?",
        [username.trim()],
        |r| {
            Ok(StoredCredentials {
                user_id: r.get(0)?,
                password_hash: r.get(1)?,
                password_salt: r.get(2)?,
                is_active: r.get::<_, i64>(3)? != 0,
            })
        },
    )
    .optional()
}

/// Returns the user id when the username/password pair matches an active account.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> rusqlite::Result<Option<String>> {
    let Some(creds) = credentials_for(conn, username)? else {
        return Ok(None);
    };
    if !creds.is_active {
        return Ok(None);
    }
    if verify_password(&creds.password_salt, password, &creds.password_hash) {
        Ok(Some(creds.user_id))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_salt() {
        let a = hash_password("s1", "correct horse");
        let b = hash_password("s2", "correct horse");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(verify_password("s1", "correct horse", &a));
        assert!(!verify_password("s1", "wrong horse", &a));
    }

    #[test]
    fn stored_hash_must_match_exactly() {
        let stored = hash_password("s1", "correct horse");
        assert!(!verify_password("s1", "correct horse", &stored[..63]));
        assert!(!verify_password("s1", "correct horse", &format!("{}0", stored)));
        assert!(!verify_password("s1", "correct horse", &stored.to_uppercase()));
        assert!(!verify_password("s1", "correct horse", ""));
        assert!(!verify_password("s1", " correct horse", &stored));
    }

    #[test]
    fn password_and_username_rules() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
        assert!(validate_username("jane.doe").is_ok());
        assert!(validate_username("jane doe").is_err());
        assert!(validate_username("").is_err());
    }
}
