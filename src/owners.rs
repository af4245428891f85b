use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use ethers::abi::Token;
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use log::{info, warn};

use crate::chain::{ChainClient, ChainError, ContractRef};
use crate::db::Store;
use crate::retry::{Outcome, RetryPolicy};

/// Maps validator NFT token ids to the addresses holding them.
pub struct OwnershipResolver<'a, C> {
    client: &'a C,
    store: &'a Store,
    nft: &'a ContractRef,
    retry: RetryPolicy,
}

impl<'a, C: ChainClient> OwnershipResolver<'a, C> {
    pub fn new(client: &'a C, store: &'a Store, nft: &'a ContractRef, retry: RetryPolicy) -> Self {
        Self {
            client,
            store,
            nft,
            retry,
        }
    }

    /// Query `ownerOf` for token ids `1..=collection_size` and persist every
    /// pair that resolved. A token that fails is logged and left out; the
    /// whole sweep is what gets retried.
    pub async fn resolve_all_owners(&self, collection_size: u64) -> Outcome<BTreeMap<u64, String>> {
        let label = format!("resolve owners of {}", self.nft.checksummed());
        self.retry
            .run(&label, || self.sweep(collection_size))
            .await
            .empty_when(BTreeMap::is_empty)
    }

    async fn sweep(&self, collection_size: u64) -> Result<BTreeMap<u64, String>> {
        let mut owners = BTreeMap::new();
        for token_id in 1..=collection_size {
            match self.owner_of(token_id).await {
                Ok(owner) => {
                    owners.insert(token_id, owner);
                }
                Err(e) => warn!("Error fetching owner for token {token_id}: {e}"),
            }
        }

        let pairs: Vec<(u64, String)> = owners
            .iter()
            .map(|(token_id, owner)| (*token_id, owner.clone()))
            .collect();
        let added = self.store.upsert_ownership(&pairs)?;
        info!(
            "Resolved {} of {collection_size} token owners, {added} new",
            owners.len()
        );
        Ok(owners)
    }

    async fn owner_of(&self, token_id: u64) -> Result<String, ChainError> {
        let token = self
            .client
            .read_call(self.nft, "ownerOf", &[Token::Uint(U256::from(token_id))])
            .await?;
        match token {
            Token::Address(owner) => Ok(to_checksum(&owner, None)),
            other => Err(ChainError::Decode {
                what: format!("ownerOf({token_id})"),
                reason: format!("expected an address, got {other:?}"),
            }),
        }
    }

    /// Validator id for `owner`, or `None` when the address holds no token
    /// in the stored mapping.
    pub fn lookup_validator_id(&self, owner: &str) -> Result<Option<u64>> {
        let id = self.store.validator_id_for(&normalize_address(owner))?;
        if id.is_none() {
            info!("Validator ID not found for owner {owner} in database.");
        }
        Ok(id)
    }

    pub fn pick_cached_owner(&self) -> Result<Option<String>> {
        self.store.pick_random_owner()
    }
}

/// Checksum `address` when it parses; otherwise hand it back untouched so the
/// lookup simply misses.
pub fn normalize_address(address: &str) -> String {
    Address::from_str(address)
        .map(|a| to_checksum(&a, None))
        .unwrap_or_else(|_| address.to_string())
}
