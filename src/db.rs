use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};

/// Device identity presented to the content source. Reused across logins so
/// the remote side keeps seeing the same phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIds {
    pub uuid: String,
    pub phone_id: String,
    pub client_session_id: String,
    pub advertising_id: String,
    pub android_device_id: String,
}

impl DeviceIds {
    pub fn generate() -> Self {
        let android = uuid::Uuid::new_v4().simple().to_string();
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            phone_id: uuid::Uuid::new_v4().to_string(),
            client_session_id: uuid::Uuid::new_v4().to_string(),
            advertising_id: uuid::Uuid::new_v4().to_string(),
            android_device_id: format!("android-{}", &android[..16]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub username: String,
    pub device: DeviceIds,
    pub authorization: String,
    pub user_id: Option<String>,
    pub saved_at: String,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create session directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open session store at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_state (
                username TEXT PRIMARY KEY,
                uuid TEXT NOT NULL,
                phone_id TEXT NOT NULL,
                client_session_id TEXT NOT NULL,
                advertising_id TEXT NOT NULL,
                android_device_id TEXT NOT NULL,
                authorization TEXT NOT NULL,
                user_id TEXT,
                saved_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn save_session(
        &self,
        username: &str,
        device: &DeviceIds,
        authorization: &str,
        user_id: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO session_state (
                username, uuid, phone_id, client_session_id, advertising_id,
                android_device_id, authorization, user_id, saved_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(username) DO UPDATE SET
                uuid = excluded.uuid,
                phone_id = excluded.phone_id,
                client_session_id = excluded.client_session_id,
                advertising_id = excluded.advertising_id,
                android_device_id = excluded.android_device_id,
                authorization = excluded.authorization,
                user_id = excluded.user_id,
                saved_at = excluded.saved_at
            "#,
            params![
                username,
                device.uuid,
                device.phone_id,
                device.client_session_id,
                device.advertising_id,
                device.android_device_id,
                authorization,
                user_id,
                now
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self, username: &str) -> Result<Option<StoredSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT username, uuid, phone_id, client_session_id, advertising_id, android_device_id, authorization, user_id, saved_at FROM session_state WHERE username = ?1",
        )?;
        let mut rows = stmt.query(params![username])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(StoredSession {
                username: row.get(0)?,
                device: DeviceIds {
                    uuid: row.get(1)?,
                    phone_id: row.get(2)?,
                    client_session_id: row.get(3)?,
                    advertising_id: row.get(4)?,
                    android_device_id: row.get(5)?,
                },
                authorization: row.get(6)?,
                user_id: row.get(7)?,
                saved_at: row.get(8)?,
            }));
        }
        Ok(None)
    }

    pub fn clear_session(&self, username: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM session_state WHERE username = ?1",
            params![username],
        )?;
        Ok(removed > 0)
    }
}
