use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::RewardClaim;

/// SQLite-backed store for validator ownership and reward claims.
///
/// Every operation opens its own connection and drops it when done; no
/// handle is shared between calls.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("failed to open database {}", self.path.display()))
    }

    /// Create tables and indexes if missing. Safe to call on every run.
    pub fn ensure_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(include_str!("../sql/schema.sql"))
            .context("failed to create schema")?;
        Ok(())
    }

    /// Insert `(token_id, owner)` pairs; existing token ids keep their first
    /// owner. Returns the number of rows added.
    pub fn upsert_ownership(&self, pairs: &[(u64, String)]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nft_owners (token_id, owner_address) VALUES (?1, ?2)",
            )?;
            for (token_id, owner) in pairs {
                added += stmt.execute(params![*token_id as i64, owner])?;
            }
        }
        tx.commit()?;
        debug!("Stored {added} of {} ownership rows", pairs.len());
        Ok(added)
    }

    /// Insert claims, silently skipping transaction hashes already present.
    /// Returns the number of rows added.
    pub fn insert_claims(&self, claims: &[RewardClaim]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO reward_claims
                (address, validator_id, amount, total, event, transaction_hash, block_number, inserted_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for claim in claims {
                added += stmt.execute(params![
                    claim.address,
                    claim.validator_id as i64,
                    claim.amount,
                    claim.total,
                    claim.event,
                    claim.transaction_hash,
                    claim.block_number as i64,
                    claim.inserted_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Stored {added} of {} reward claims", claims.len());
        Ok(added)
    }

    /// A uniformly random stored owner, or `None` when nothing is cached.
    pub fn pick_random_owner(&self) -> Result<Option<String>> {
        let conn = self.connect()?;
        let owner = conn
            .query_row(
                "SELECT owner_address FROM nft_owners ORDER BY RANDOM() LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Lowest token id held by `owner`.
    pub fn validator_id_for(&self, owner: &str) -> Result<Option<u64>> {
        let conn = self.connect()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT token_id FROM nft_owners WHERE owner_address = ?1 ORDER BY token_id LIMIT 1",
                params![owner],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.map(|id| id as u64))
    }

    pub fn count_owners(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM nft_owners", [])
    }

    pub fn count_claims(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM reward_claims", [])
    }

    pub fn count_claims_with_hash(&self, transaction_hash: &str) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM reward_claims WHERE transaction_hash = ?1",
            [transaction_hash],
        )
    }

    fn count<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<u64> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(sql, params, |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn claims_for_validator(&self, validator_id: u64) -> Result<Vec<RewardClaim>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, address, validator_id, amount, total, event, transaction_hash, block_number, inserted_at
            FROM reward_claims
            WHERE validator_id = ?1
            ORDER BY block_number, id",
        )?;
        let claims = stmt
            .query_map(params![validator_id as i64], claim_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(claims)
    }

    /// Highest block with a stored claim for `validator_id`.
    pub fn latest_claim_block(&self, validator_id: u64) -> Result<Option<u64>> {
        let conn = self.connect()?;
        let block: Option<i64> = conn.query_row(
            "SELECT MAX(block_number) FROM reward_claims WHERE validator_id = ?1",
            params![validator_id as i64],
            |r| r.get(0),
        )?;
        Ok(block.map(|b| b as u64))
    }
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<RewardClaim> {
    let inserted_at: String = row.get(8)?;
    let inserted_at = DateTime::parse_from_rfc3339(&inserted_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(RewardClaim {
        id: Some(row.get(0)?),
        address: row.get(1)?,
        validator_id: row.get::<_, i64>(2)? as u64,
        amount: row.get(3)?,
        total: row.get(4)?,
        event: row.get(5)?,
        transaction_hash: row.get(6)?,
        block_number: row.get::<_, i64>(7)? as u64,
        inserted_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn claim(hash: &str, block: u64) -> RewardClaim {
        RewardClaim {
            id: None,
            address: "0x1234567890abcdef".into(),
            validator_id: 1,
            amount: "100".into(),
            total: "1000".into(),
            event: "ClaimRewards".into(),
            transaction_hash: hash.into(),
            block_number: block,
            inserted_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_transaction_hash_is_ignored() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("rewards.db"));
        store.ensure_schema().unwrap();

        let rewards = vec![claim("0xabc123", 100_000)];
        assert_eq!(store.insert_claims(&rewards).unwrap(), 1);
        assert_eq!(store.insert_claims(&rewards).unwrap(), 0);

        assert_eq!(store.count_claims_with_hash("0xabc123").unwrap(), 1);
    }

    #[test]
    fn first_owner_wins() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("rewards.db"));
        store.ensure_schema().unwrap();

        let first = vec![(1, "0xAaa".to_string()), (2, "0xBbb".to_string())];
        assert_eq!(store.upsert_ownership(&first).unwrap(), 2);

        let second = vec![(2, "0xCcc".to_string()), (3, "0xDdd".to_string())];
        assert_eq!(store.upsert_ownership(&second).unwrap(), 1);

        assert_eq!(store.count_owners().unwrap(), 3);
        assert_eq!(store.validator_id_for("0xBbb").unwrap(), Some(2));
        assert_eq!(store.validator_id_for("0xCcc").unwrap(), None);
    }

    #[test]
    fn schema_is_idempotent_and_starts_empty() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("rewards.db"));
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();

        assert_eq!(store.pick_random_owner().unwrap(), None);
        assert_eq!(store.count_claims().unwrap(), 0);
        assert_eq!(store.latest_claim_block(1).unwrap(), None);
    }

    #[test]
    fn reads_claims_back_in_block_order() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("rewards.db"));
        store.ensure_schema().unwrap();

        store
            .insert_claims(&[claim("0x02", 20), claim("0x01", 10)])
            .unwrap();

        let claims = store.claims_for_validator(1).unwrap();
        let hashes: Vec<_> = claims.iter().map(|c| c.transaction_hash.as_str()).collect();
        assert_eq!(hashes, ["0x01", "0x02"]);
        assert!(claims.iter().all(|c| c.id.is_some()));
        assert_eq!(store.latest_claim_block(1).unwrap(), Some(20));
        assert!(store.claims_for_validator(2).unwrap().is_empty());
    }
}
