use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use pbkdf2::pbkdf2_hmac;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{col_uuid, ts, LocalGateway};
use crate::gateway::{GatewayError, IdentityProvider};
use crate::models::{AuthUser, Session};

const INVALID_CREDENTIALS: &str = "Invalid login credentials";

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Opaque random token, URL safe.
pub(crate) fn random_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<32>())
}

/// Work factor for new password hashes. Each row keeps its own count, so
/// raising this never locks out existing users.
#[cfg(not(test))]
const PBKDF2_ITERATIONS: u32 = 600_000;
#[cfg(test)]
const PBKDF2_ITERATIONS: u32 = 1_000;

const SALT_LENGTH: usize = 32;
const KEY_LENGTH: usize = 32;

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Constant-time check of `password` against a stored row. Undecodable
/// rows never match.
fn verify_password(password: &str, salt: &str, hash: &str, iterations: u32) -> bool {
    let (Ok(salt), Ok(expected)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let derived = derive_key(password, &salt, iterations);
    derived.as_slice().ct_eq(expected.as_slice()).into()
}

pub(crate) fn insert_user(conn: &Connection, email: &str, password: &str) -> Result<Uuid, GatewayError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(GatewayError::Rejected("E-mail and password are required".into()));
    }
    let exists: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(GatewayError::Rejected("User already registered".into()));
    }
    let id = Uuid::new_v4();
    let salt = random_bytes::<SALT_LENGTH>();
    let hash = derive_key(password, &salt, PBKDF2_ITERATIONS);
    conn.execute(
        "INSERT INTO users (id, email, password_salt, password_hash, password_iterations, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            email,
            STANDARD.encode(salt),
            STANDARD.encode(hash),
            PBKDF2_ITERATIONS,
            ts(Utc::now())
        ],
    )?;
    Ok(id)
}

impl IdentityProvider for LocalGateway {
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, email, password_salt, password_hash, password_iterations
                 FROM users WHERE email = ?1",
                [email.trim()],
                |row| {
                    Ok((
                        col_uuid(row, 0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, stored_email, salt, hash, iterations)) = row else {
            tracing::info!("sign-in refused: unknown e-mail");
            return Err(GatewayError::Rejected(INVALID_CREDENTIALS.into()));
        };
        if !verify_password(password, &salt, &hash, iterations) {
            tracing::info!(user_id = %id, "sign-in refused: wrong password");
            return Err(GatewayError::Rejected(INVALID_CREDENTIALS.into()));
        }

        let session = Session {
            access_token: random_token(),
            user: AuthUser {
                id,
                email: Some(stored_email),
            },
            expires_at: None,
        };
        self.set_session(Some(session.clone()));
        tracing::info!(user_id = %id, "signed in");
        Ok(session)
    }

    fn sign_out(&self) -> Result<(), GatewayError> {
        self.set_session(None);
        Ok(())
    }

    fn current_session(&self) -> Result<Option<Session>, GatewayError> {
        Ok(self.stored_session())
    }
}
