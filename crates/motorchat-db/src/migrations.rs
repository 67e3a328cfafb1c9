use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            sender_id       TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            listing_id      TEXT,
            body            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'sent',
            created_at      TEXT NOT NULL,
            delivered_at    TEXT,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, recipient_id, listing_id, seq);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(recipient_id, status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
