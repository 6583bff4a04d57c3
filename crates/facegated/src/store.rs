use std::path::Path;

use facegate_core::codec;
use facegate_core::types::{EnrolledSignature, FaceVector, OwnerId};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UserRecord {
    pub id: OwnerId,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

/// A user with the number of enrolled signatures, for listings.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: UserRecord,
    pub signature_count: u64,
}

/// SQLite-backed store of users and their face signatures.
///
/// Signatures are written in the tagged codec format; untagged legacy blobs
/// are read transparently.
#[derive(Clone)]
pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS users (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL,
                     email TEXT NOT NULL UNIQUE,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS face_signatures (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                     embedding BLOB NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_signatures_user ON face_signatures(user_id);",
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), "face store opened");
        Ok(Self { conn })
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = email.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, created_at FROM users WHERE email = ?1",
                )?;
                let mut rows = stmt.query_map([&email], user_from_row)?;
                let user = rows.next().transpose()?;
                Ok(user)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_user(&self, id: OwnerId) -> Result<Option<UserRecord>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, email, created_at FROM users WHERE id = ?1")?;
                let mut rows = stmt.query_map([id], user_from_row)?;
                let user = rows.next().transpose()?;
                Ok(user)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Insert a user and all of their signatures in one transaction.
    ///
    /// Returns `None` without writing anything when the email is taken.
    pub async fn create_user_with_signatures(
        &self,
        name: &str,
        email: &str,
        vectors: &[FaceVector],
    ) -> Result<Option<UserRecord>, StoreError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let blobs: Vec<Vec<u8>> = vectors.iter().map(codec::encode).collect();
        let name = name.to_string();
        let email = email.to_string();

        let user = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                    [&email],
                    |row| row.get(0),
                )?;
                if taken {
                    return Ok(None);
                }

                tx.execute(
                    "INSERT INTO users (name, email, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![name, email, created_at],
                )?;
                let id = tx.last_insert_rowid();

                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO face_signatures (user_id, embedding, created_at)
                         VALUES (?1, ?2, ?3)",
                    )?;
                    for blob in &blobs {
                        stmt.execute(rusqlite::params![id, blob, created_at])?;
                    }
                }

                tx.commit()?;
                Ok(Some(UserRecord {
                    id,
                    name,
                    email,
                    created_at,
                }))
            })
            .await?;

        if let Some(u) = &user {
            tracing::info!(user_id = u.id, signatures = vectors.len(), "user stored");
        }
        Ok(user)
    }

    /// Every readable enrolled signature, ordered by signature id.
    ///
    /// The order is the matcher's scan order and decides ties. Rows whose
    /// blob does not decode are logged and left out.
    pub async fn all_signatures(&self) -> Result<Vec<EnrolledSignature>, StoreError> {
        // Fetch raw rows from SQLite; decode outside the blocking closure
        let rows: Vec<(i64, i64, Vec<u8>, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, embedding, created_at
                     FROM face_signatures ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let signatures = rows
            .into_iter()
            .filter_map(|(id, user_id, blob, created_at)| match codec::decode(&blob) {
                Ok(vector) => Some(EnrolledSignature {
                    signature_id: id,
                    owner_id: user_id,
                    vector,
                    created_at,
                }),
                Err(e) => {
                    tracing::warn!(
                        signature_id = id,
                        user_id,
                        error = %e,
                        "skipping unreadable signature"
                    );
                    None
                }
            })
            .collect();
        Ok(signatures)
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT u.id, u.name, u.email, u.created_at, COUNT(s.id)
                     FROM users u LEFT JOIN face_signatures s ON s.user_id = u.id
                     GROUP BY u.id ORDER BY u.id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(UserSummary {
                        user: user_from_row(row)?,
                        signature_count: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Delete a user; their signatures go with them. Returns whether a row
    /// was removed.
    pub async fn delete_user(&self, id: OwnerId) -> Result<bool, StoreError> {
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn count_users(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM users").await
    }

    pub async fn count_signatures(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM face_signatures").await
    }

    async fn count(&self, sql: &'static str) -> Result<u64, StoreError> {
        self.conn
            .call(move |conn| {
                let count: u64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
impl FaceStore {
    /// Insert a signature blob as-is, bypassing the codec.
    pub(crate) async fn insert_raw_signature(&self, user_id: OwnerId, blob: Vec<u8>) {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO face_signatures (user_id, embedding, created_at) VALUES (?1, ?2, 'x')",
                    rusqlite::params![user_id, blob],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}
