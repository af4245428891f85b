//! Scripted chain client and fixtures shared by unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::to_checksum;

use crate::abi::parse_abi;
use crate::chain::{ChainClient, ChainError, ContractRef, LogEntry};
use crate::config::{NFT_CONTRACT_ADDRESS, STAKE_MANAGER_ADDRESS};
use crate::models::CLAIM_REWARDS_EVENT;

pub fn stake_manager_abi() -> Abi {
    parse_abi(include_str!("../abi/stake_manager_abi.json")).expect("bundled StakeManager ABI")
}

pub fn nft_abi() -> Abi {
    parse_abi(include_str!("../abi/nft.json")).expect("bundled NFT ABI")
}

pub fn stake_manager_contract() -> ContractRef {
    ContractRef::new("StakeManager", STAKE_MANAGER_ADDRESS, stake_manager_abi())
        .expect("valid StakeManager address")
}

pub fn nft_contract() -> ContractRef {
    ContractRef::new("ValidatorNFT", NFT_CONTRACT_ADDRESS, nft_abi()).expect("valid NFT address")
}

fn owner_of_token(token_id: u64) -> Address {
    Address::from_low_u64_be(0xbeef_0000 + token_id * 0x1_0001)
}

/// Checksummed address the mock reports as the owner of `token_id`.
pub fn owner_address(token_id: u64) -> String {
    to_checksum(&owner_of_token(token_id), None)
}

/// A decoded `ClaimRewards` log whose transaction hash is `hash_byte`
/// repeated.
pub fn claim_log(validator_id: u64, hash_byte: u8, block: u64, amount: u64, total: u64) -> LogEntry {
    LogEntry {
        event: CLAIM_REWARDS_EVENT.to_string(),
        params: BTreeMap::from([
            ("validatorId".to_string(), Token::Uint(U256::from(validator_id))),
            ("amount".to_string(), Token::Uint(U256::from(amount))),
            ("totalAmount".to_string(), Token::Uint(U256::from(total))),
        ]),
        transaction_hash: Some(H256::repeat_byte(hash_byte)),
        block_number: Some(block),
    }
}

#[derive(Debug, Default)]
pub struct MockChainClient {
    owners: BTreeMap<u64, Address>,
    failing_tokens: BTreeSet<u64>,
    logs: Vec<LogEntry>,
    head: u64,
    remaining_log_failures: AtomicU32,
    owner_calls: AtomicU32,
    log_queries: Mutex<Vec<(u64, u64)>>,
}

impl MockChainClient {
    /// Tokens `1..=count` each have a distinct owner.
    pub fn with_owners(count: u64) -> Self {
        Self {
            owners: (1..=count).map(|id| (id, owner_of_token(id))).collect(),
            ..Default::default()
        }
    }

    pub fn failing_tokens(mut self, tokens: &[u64]) -> Self {
        self.failing_tokens.extend(tokens);
        self
    }

    pub fn with_head(mut self, head: u64) -> Self {
        self.head = head;
        self
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.logs = logs;
        self
    }

    /// Fail the next `count` log queries.
    pub fn failing_log_queries(self, count: u32) -> Self {
        self.remaining_log_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn owner_calls(&self) -> u32 {
        self.owner_calls.load(Ordering::SeqCst)
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.log_queries.lock().expect("log query mutex").clone()
    }
}

fn rpc_error(message: &str) -> ChainError {
    ChainError::Rpc(message.into())
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn read_call(
        &self,
        contract: &ContractRef,
        method: &str,
        args: &[Token],
    ) -> Result<Token, ChainError> {
        if method != "ownerOf" {
            return Err(ChainError::Abi(format!(
                "{}.{method} is not scripted",
                contract.name
            )));
        }
        self.owner_calls.fetch_add(1, Ordering::SeqCst);

        let token_id = match args {
            [Token::Uint(id)] => id.as_u64(),
            _ => return Err(ChainError::Abi(format!("bad ownerOf args {args:?}"))),
        };
        if self.failing_tokens.contains(&token_id) {
            return Err(rpc_error("connection reset by peer"));
        }
        self.owners
            .get(&token_id)
            .map(|owner| Token::Address(*owner))
            .ok_or_else(|| rpc_error("execution reverted: ERC721: owner query for nonexistent token"))
    }

    async fn get_logs(
        &self,
        _contract: &ContractRef,
        event_name: &str,
        filters: &[(&str, Token)],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError> {
        self.log_queries
            .lock()
            .expect("log query mutex")
            .push((from_block, to_block));

        let failing = self
            .remaining_log_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(rpc_error("query returned more than 10000 results"));
        }

        Ok(self
            .logs
            .iter()
            .filter(|log| log.event == event_name)
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| (from_block..=to_block).contains(&block))
            })
            .filter(|log| {
                filters
                    .iter()
                    .all(|(name, value)| log.params.get(*name) == Some(value))
            })
            .cloned()
            .collect())
    }

    async fn current_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head)
    }
}
