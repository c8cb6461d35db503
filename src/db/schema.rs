use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wallet_features (
            wallet      TEXT PRIMARY KEY,
            features    TEXT NOT NULL, -- JSON
            tx_count    INTEGER NOT NULL,
            last_seen   TEXT NOT NULL,
            saved_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quarantine (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            log_offset  INTEGER NOT NULL,
            wallet      TEXT,
            checksum    TEXT,
            kind        TEXT NOT NULL,
            error       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_quarantine_kind ON quarantine(kind);
        CREATE INDEX IF NOT EXISTS idx_quarantine_created ON quarantine(created_at DESC);
        ",
    )?;
    Ok(())
}
