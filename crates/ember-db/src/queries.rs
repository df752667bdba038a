use crate::Database;
use crate::models::UnlockRow;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Media unlocks --

    /// Look up whether a media item is unlocked for a user. The first check
    /// creates the (locked) entry so later reward events have a row to flip.
    pub fn check_unlock(
        &self,
        user_id: &str,
        conversation_id: &str,
        message_key: &str,
        media_fingerprint: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO media_unlocks (user_id, conversation_id, message_key, media_fingerprint)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, conversation_id, message_key, media_fingerprint],
            )?;
            query_unlocked(conn, user_id, conversation_id, message_key, media_fingerprint)
                .map(|state| state.unwrap_or(false))
        })
    }

    /// Record a successful reward event.
    /// Returns true when the item was locked (or unknown) before this call.
    pub fn mark_unlocked(
        &self,
        user_id: &str,
        conversation_id: &str,
        message_key: &str,
        media_fingerprint: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let was_unlocked =
                query_unlocked(&tx, user_id, conversation_id, message_key, media_fingerprint)?
                    .unwrap_or(false);

            tx.execute(
                "INSERT INTO media_unlocks (user_id, conversation_id, message_key, media_fingerprint, unlocked, unlocked_at)
                 VALUES (?1, ?2, ?3, ?4, 1, datetime('now'))
                 ON CONFLICT (user_id, conversation_id, message_key, media_fingerprint)
                 DO UPDATE SET unlocked = 1, unlocked_at = COALESCE(unlocked_at, datetime('now'))",
                rusqlite::params![user_id, conversation_id, message_key, media_fingerprint],
            )?;

            tx.commit()?;
            Ok(!was_unlocked)
        })
    }

    /// All registry entries a user has for one conversation.
    pub fn unlocks_for_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<UnlockRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, conversation_id, message_key, media_fingerprint, unlocked, created_at, unlocked_at
                 FROM media_unlocks
                 WHERE user_id = ?1 AND conversation_id = ?2
                 ORDER BY created_at, message_key",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, conversation_id], |row| {
                    Ok(UnlockRow {
                        user_id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        message_key: row.get(2)?,
                        media_fingerprint: row.get(3)?,
                        unlocked: row.get::<_, i64>(4)? != 0,
                        created_at: row.get(5)?,
                        unlocked_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_unlocked(
    conn: &Connection,
    user_id: &str,
    conversation_id: &str,
    message_key: &str,
    media_fingerprint: &str,
) -> Result<Option<bool>> {
    let state = conn
        .query_row(
            "SELECT unlocked FROM media_unlocks
             WHERE user_id = ?1 AND conversation_id = ?2 AND message_key = ?3 AND media_fingerprint = ?4",
            rusqlite::params![user_id, conversation_id, message_key, media_fingerprint],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    Ok(state.map(|unlocked| unlocked != 0))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_creates_locked_entry() {
        let db = Database::open_in_memory().unwrap();

        assert!(!db.check_unlock("u1", "c1", "42", "fp").unwrap());
        let rows = db.unlocks_for_conversation("u1", "c1").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].unlocked);
        assert!(rows[0].unlocked_at.is_none());
    }

    #[test]
    fn reward_event_unlocks_once() {
        let db = Database::open_in_memory().unwrap();

        assert!(!db.check_unlock("u1", "c1", "42", "fp").unwrap());
        assert!(db.mark_unlocked("u1", "c1", "42", "fp").unwrap());
        assert!(!db.mark_unlocked("u1", "c1", "42", "fp").unwrap());
        assert!(db.check_unlock("u1", "c1", "42", "fp").unwrap());
    }

    #[test]
    fn unlocks_are_scoped_per_user_and_media() {
        let db = Database::open_in_memory().unwrap();

        db.mark_unlocked("u1", "c1", "42", "fp").unwrap();
        assert!(!db.check_unlock("u2", "c1", "42", "fp").unwrap());
        assert!(!db.check_unlock("u1", "c1", "42", "other").unwrap());
        assert!(db.unlocks_for_conversation("u1", "c2").unwrap().is_empty());
    }
}
