use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the StakeManager event captured by the sync.
pub const CLAIM_REWARDS_EVENT: &str = "ClaimRewards";

/// Owner of one validator NFT at the time it was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub token_id: u64,
    pub owner_address: String,
}

/// A single `ClaimRewards` emission. Amounts are kept as decimal text so
/// uint256 values survive the trip through SQLite untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    /// Row id, `None` until the claim has been read back from the store.
    pub id: Option<i64>,
    pub address: String,
    pub validator_id: u64,
    pub amount: String,
    pub total: String,
    pub event: String,
    pub transaction_hash: String,
    pub block_number: u64,
    /// When the claim was discovered, not when its block was mined.
    pub inserted_at: DateTime<Utc>,
}
