//! One end-to-end sync run: pick an owner, find its validator, pull its
//! reward claims and store the new ones.

use std::fmt;

use anyhow::Result;
use log::{info, warn};

use crate::abi::load_abi;
use crate::chain::{ChainClient, ContractRef};
use crate::config::SyncConfig;
use crate::db::Store;
use crate::indexer::EventFetcher;
use crate::owners::OwnershipResolver;
use crate::retry::Outcome;

/// How a run ended. None of these are process failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    NoOwners,
    ValidatorNotFound {
        owner: String,
    },
    NoRewards {
        owner: String,
        validator_id: u64,
        /// The fetch gave up after retries rather than finding nothing.
        exhausted: bool,
    },
    Stored {
        owner: String,
        validator_id: u64,
        fetched: usize,
        inserted: usize,
        total: u64,
    },
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncReport::NoOwners => write!(f, "Failed to fetch NFT owners."),
            SyncReport::ValidatorNotFound { .. } => write!(f, "Validator ID not found."),
            SyncReport::NoRewards { .. } => write!(f, "No rewards found."),
            SyncReport::Stored {
                owner,
                fetched,
                inserted,
                total,
                ..
            } => write!(
                f,
                "Stored {inserted} new of {fetched} reward claims for {owner}. Total records in database: {total}"
            ),
        }
    }
}

pub struct Syncer<'a, C> {
    config: &'a SyncConfig,
    client: &'a C,
    store: Store,
    nft: ContractRef,
    stake_manager: ContractRef,
}

impl<'a, C: ChainClient> Syncer<'a, C> {
    pub fn new(
        config: &'a SyncConfig,
        client: &'a C,
        nft: ContractRef,
        stake_manager: ContractRef,
    ) -> Self {
        Self {
            config,
            client,
            store: Store::new(&config.db_path),
            nft,
            stake_manager,
        }
    }

    /// Load both ABIs from the paths in `config`.
    pub fn from_config(config: &'a SyncConfig, client: &'a C) -> Result<Self> {
        let nft = ContractRef::new(
            "ValidatorNFT",
            &config.nft_address,
            load_abi(&config.nft_abi)?,
        )?;
        let stake_manager = ContractRef::new(
            "StakeManager",
            &config.stake_manager_address,
            load_abi(&config.stake_manager_abi)?,
        )?;
        Ok(Self::new(config, client, nft, stake_manager))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run(&self) -> Result<SyncReport> {
        self.store.ensure_schema()?;

        let resolver =
            OwnershipResolver::new(self.client, &self.store, &self.nft, self.config.retry);

        let Some(owner) = self.target_owner(&resolver).await? else {
            return Ok(SyncReport::NoOwners);
        };
        info!("Selected Owner: {owner}");

        let Some(validator_id) = resolver.lookup_validator_id(&owner)? else {
            return Ok(SyncReport::ValidatorNotFound { owner });
        };

        let fetcher = EventFetcher::new(self.client, &self.stake_manager, self.config.retry)
            .with_chunk_size(self.config.log_chunk_size);
        let outcome = fetcher
            .fetch_claim_history(
                &owner,
                validator_id,
                self.config.from_block,
                self.config.to_block,
            )
            .await;

        let claims = match outcome {
            Outcome::Success(claims) => claims,
            Outcome::Empty => {
                return Ok(SyncReport::NoRewards {
                    owner,
                    validator_id,
                    exhausted: false,
                })
            }
            Outcome::RetriesExhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    "Reward history for validator {validator_id} unavailable after {attempts} attempts: {last_error:#}"
                );
                return Ok(SyncReport::NoRewards {
                    owner,
                    validator_id,
                    exhausted: true,
                });
            }
        };

        let inserted = self.store.insert_claims(&claims)?;
        let total = self.store.count_claims()?;
        info!(
            "Inserted {inserted} new reward claims for {owner}. Total records in database: {total}"
        );

        Ok(SyncReport::Stored {
            owner,
            validator_id,
            fetched: claims.len(),
            inserted,
            total,
        })
    }

    /// Explicit owner, else a cached one, else the first owner of a fresh
    /// full-collection sweep.
    async fn target_owner(&self, resolver: &OwnershipResolver<'_, C>) -> Result<Option<String>> {
        if let Some(owner) = &self.config.owner {
            return Ok(Some(owner.clone()));
        }
        if let Some(owner) = resolver.pick_cached_owner()? {
            return Ok(Some(owner));
        }

        info!("No NFT owners found in the database. Fetching from blockchain...");
        let outcome = resolver.resolve_all_owners(self.config.collection_size).await;
        if let Outcome::RetriesExhausted { last_error, .. } = &outcome {
            warn!("Owner resolution failed: {last_error:#}");
        }
        Ok(outcome
            .into_option()
            .and_then(|owners| owners.into_values().next()))
    }
}
