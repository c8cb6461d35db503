pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::ScoreFailure;
use crate::wallets::features::WalletFeatures;

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the stored wallet snapshot in one transaction.
    pub fn save_snapshot(&self, wallets: &[(String, WalletFeatures)]) -> Result<usize, rusqlite::Error> {
        self.lock().save_snapshot(wallets)
    }

    pub fn load_snapshot(&self) -> Result<Vec<(String, WalletFeatures)>, rusqlite::Error> {
        self.lock().load_snapshot()
    }

    pub fn insert_quarantine(&self, failure: &ScoreFailure) -> Result<(), rusqlite::Error> {
        self.lock().insert_quarantine(failure)
    }

    pub fn quarantine_count(&self) -> Result<usize, rusqlite::Error> {
        self.lock().quarantine_count()
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn save_snapshot(&self, wallets: &[(String, WalletFeatures)]) -> Result<usize, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM wallet_features", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO wallet_features (wallet, features, tx_count, last_seen, saved_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            )?;
            for (wallet, features) in wallets {
                let json = serde_json::to_string(features)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                stmt.execute(rusqlite::params![
                    wallet,
                    json,
                    features.tx_count as i64,
                    features.last_seen.to_rfc3339()
                ])?;
            }
        }
        tx.commit()?;
        Ok(wallets.len())
    }

    pub fn load_snapshot(&self) -> Result<Vec<(String, WalletFeatures)>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT wallet, features FROM wallet_features ORDER BY wallet")?;
        let rows = stmt.query_map([], |row| {
            let wallet: String = row.get(0)?;
            let json: String = row.get(1)?;
            let features: WalletFeatures = serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok((wallet, features))
        })?;
        rows.collect()
    }

    pub fn insert_quarantine(&self, failure: &ScoreFailure) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO quarantine (log_offset, wallet, checksum, kind, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                failure.offset as i64,
                failure.wallet_address,
                failure.checksum,
                failure.kind,
                failure.error,
                failure.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn quarantine_count(&self) -> Result<usize, rusqlite::Error> {
        self.conn.query_row("SELECT COUNT(*) FROM quarantine", [], |row| {
            row.get::<_, i64>(0).map(|c| c as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxType;
    use crate::wallets::features::AggregationParams;
    use crate::wallets::features::tests::record;
    use chrono::{TimeZone, Utc};

    fn open_temp_db() -> (tempfile::TempDir, SharedDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = SharedDatabase::open(&dir.path().join("repscore.db")).unwrap();
        (dir, db)
    }

    fn features(wallet: &str, amount: i64) -> WalletFeatures {
        let params = AggregationParams::default();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_090_000, 0).unwrap();
        let mut f = WalletFeatures::from_first(&record(wallet, TxType::Swap, amount, t0), &params);
        f.apply(&record(wallet, TxType::Lend, 50, t1), &params);
        f
    }

    fn assert_same(a: &WalletFeatures, b: &WalletFeatures) {
        assert_eq!(a.tx_count, b.tx_count);
        assert_eq!(a.type_counts, b.type_counts);
        assert_eq!(a.total_volume, b.total_volume);
        assert_eq!(a.protocols, b.protocols);
        assert_eq!(a.first_seen, b.first_seen);
        assert_eq!(a.last_seen, b.last_seen);
        assert_eq!(a.active_days, b.active_days);
        assert!((a.activity_weight - b.activity_weight).abs() < 1e-9);
    }

    #[test]
    fn snapshot_roundtrip() {
        let (_dir, db) = open_temp_db();
        let a = "0x00000000000000000000000000000000000000aa".to_string();
        let b = "0x00000000000000000000000000000000000000bb".to_string();
        let wallets = vec![(a.clone(), features(&a, 100)), (b.clone(), features(&b, 7))];

        assert_eq!(db.save_snapshot(&wallets).unwrap(), 2);
        let loaded = db.load_snapshot().unwrap();
        assert_eq!(loaded.len(), 2);
        for ((wa, fa), (wb, fb)) in loaded.iter().zip(&wallets) {
            assert_eq!(wa, wb);
            assert_same(fa, fb);
        }
    }

    #[test]
    fn snapshot_replaces_previous() {
        let (_dir, db) = open_temp_db();
        let a = "0x00000000000000000000000000000000000000aa".to_string();
        let b = "0x00000000000000000000000000000000000000bb".to_string();
        db.save_snapshot(&[(a.clone(), features(&a, 1)), (b.clone(), features(&b, 1))])
            .unwrap();
        db.save_snapshot(&[(a.clone(), features(&a, 2))]).unwrap();

        let loaded = db.load_snapshot().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_same(&loaded[0].1, &features(&a, 2));
    }

    #[test]
    fn empty_snapshot_loads_nothing() {
        let (_dir, db) = open_temp_db();
        assert!(db.load_snapshot().unwrap().is_empty());
    }

    #[test]
    fn quarantine_insert_and_query() {
        let (_dir, db) = open_temp_db();
        assert_eq!(db.quarantine_count().unwrap(), 0);

        let first = ScoreFailure {
            wallet_address: None,
            offset: 10,
            checksum: None,
            kind: "malformed_message".into(),
            error: "malformed message: expected value".into(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let second = ScoreFailure {
            wallet_address: Some("0x00000000000000000000000000000000000000aa".into()),
            offset: 11,
            checksum: Some("abc".into()),
            kind: "validation".into(),
            error: "validation failed: negative amount".into(),
            timestamp: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        };
        db.insert_quarantine(&first).unwrap();
        db.insert_quarantine(&second).unwrap();

        assert_eq!(db.quarantine_count().unwrap(), 2);
    }
}
