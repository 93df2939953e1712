//! Client-local preference storage: the active organization and the theme.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::config::{ACTIVE_ORG_KEY, THEME_KEY};
use crate::db::DatabaseError;
use crate::models::Theme;

/// Get a user preference by key. Returns None if not set.
pub fn get_user_preference(
    conn: &Connection,
    key: &str,
) -> Result<Option<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT value FROM user_preferences WHERE key = ?1")?;
    match stmt.query_row([key], |row| row.get::<_, String>(0)) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// Set a user preference (upsert).
pub fn set_user_preference(
    conn: &Connection,
    key: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO user_preferences (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

/// Delete a user preference.
pub fn delete_user_preference(conn: &Connection, key: &str) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM user_preferences WHERE key = ?1", [key])?;
    Ok(())
}

/// Remembered active organization. A stored value that is not a UUID is
/// treated as absent.
pub fn get_active_org(conn: &Connection) -> Result<Option<Uuid>, DatabaseError> {
    Ok(get_user_preference(conn, ACTIVE_ORG_KEY)?.and_then(|raw| Uuid::parse_str(&raw).ok()))
}

/// Persist the active organization, or clear it when `None`.
pub fn set_active_org(conn: &Connection, org_id: Option<Uuid>) -> Result<(), DatabaseError> {
    match org_id {
        Some(id) => set_user_preference(conn, ACTIVE_ORG_KEY, &id.to_string()),
        None => delete_user_preference(conn, ACTIVE_ORG_KEY),
    }
}

/// Display mode; light when unset or unreadable.
pub fn get_theme(conn: &Connection) -> Result<Theme, DatabaseError> {
    Ok(get_user_preference(conn, THEME_KEY)?
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(Theme::Light))
}

pub fn set_theme(conn: &Connection, theme: Theme) -> Result<(), DatabaseError> {
    set_user_preference(conn, THEME_KEY, theme.as_str())
}

/// Flip the display mode and return the new value.
pub fn toggle_theme(conn: &Connection) -> Result<Theme, DatabaseError> {
    let next = get_theme(conn)?.toggled();
    set_theme(conn, next)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn get_set_delete() {
        let conn = open_memory_database().unwrap();
        assert_eq!(get_user_preference(&conn, "k").unwrap(), None);
        set_user_preference(&conn, "k", "v1").unwrap();
        set_user_preference(&conn, "k", "v2").unwrap();
        assert_eq!(get_user_preference(&conn, "k").unwrap().as_deref(), Some("v2"));
        delete_user_preference(&conn, "k").unwrap();
        assert_eq!(get_user_preference(&conn, "k").unwrap(), None);
    }

    #[test]
    fn active_org_round_trip_and_clear() {
        let conn = open_memory_database().unwrap();
        let id = Uuid::new_v4();
        set_active_org(&conn, Some(id)).unwrap();
        assert_eq!(get_active_org(&conn).unwrap(), Some(id));
        assert_eq!(
            get_user_preference(&conn, "va_active_org_id").unwrap(),
            Some(id.to_string())
        );
        set_active_org(&conn, None).unwrap();
        assert_eq!(get_active_org(&conn).unwrap(), None);
    }

    #[test]
    fn garbage_active_org_reads_as_none() {
        let conn = open_memory_database().unwrap();
        set_user_preference(&conn, ACTIVE_ORG_KEY, "not-a-uuid").unwrap();
        assert_eq!(get_active_org(&conn).unwrap(), None);
    }

    #[test]
    fn theme_defaults_light_and_toggles() {
        let conn = open_memory_database().unwrap();
        assert_eq!(get_theme(&conn).unwrap(), Theme::Light);
        assert_eq!(toggle_theme(&conn).unwrap(), Theme::Dark);
        assert_eq!(get_user_preference(&conn, "theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(toggle_theme(&conn).unwrap(), Theme::Light);
    }
}
