use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Polygon StakingInfo contract on Ethereum mainnet, emitter of `ClaimRewards`.
pub const STAKE_MANAGER_ADDRESS: &str = "0xa59c847bd5ac0172ff4fe912c5d29e5a71a7512b";

/// Validator NFT collection; token id N is validator N.
pub const NFT_CONTRACT_ADDRESS: &str = "0x47cbe25bbdb40a774cc37e1da92d10c2c7ec897f";

pub const DEFAULT_DB_PATH: &str = "polygon_rewards.db";
pub const DEFAULT_COLLECTION_SIZE: u64 = 127;

/// Everything one sync run needs, built once in `main` and passed down by
/// reference.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub rpc_url: String,
    pub db_path: PathBuf,
    pub stake_manager_address: String,
    pub stake_manager_abi: PathBuf,
    pub nft_address: String,
    pub nft_abi: PathBuf,
    pub collection_size: u64,
    pub retry: RetryPolicy,
    pub from_block: u64,
    pub to_block: Option<u64>,
    /// Sync this owner instead of a cached or freshly resolved one.
    pub owner: Option<String>,
    pub log_chunk_size: Option<u64>,
}

impl SyncConfig {
    pub fn new(rpc_url: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            db_path: db_path.into(),
            stake_manager_address: STAKE_MANAGER_ADDRESS.to_string(),
            stake_manager_abi: PathBuf::from("./abi/stake_manager_abi.json"),
            nft_address: NFT_CONTRACT_ADDRESS.to_string(),
            nft_abi: PathBuf::from("./abi/nft.json"),
            collection_size: DEFAULT_COLLECTION_SIZE,
            retry: RetryPolicy::new(3, Duration::from_secs(2), 2),
            from_block: 0,
            to_block: None,
            owner: None,
            log_chunk_size: None,
        }
    }
}
