use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS media_unlocks (
            user_id             TEXT NOT NULL,
            conversation_id     TEXT NOT NULL,
            message_key         TEXT NOT NULL,
            media_fingerprint   TEXT NOT NULL,
            unlocked            INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            unlocked_at         TEXT,
            PRIMARY KEY (user_id, conversation_id, message_key, media_fingerprint)
        );

        CREATE INDEX IF NOT EXISTS idx_media_unlocks_conversation
            ON media_unlocks(user_id, conversation_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
