use anyhow::{anyhow, Result};
use chrono::Utc;
use ethers::abi::Token;
use ethers::types::U256;
use log::{debug, info, warn};

use crate::chain::{token_to_u64, ChainClient, ContractRef, LogEntry};
use crate::models::{RewardClaim, CLAIM_REWARDS_EVENT};
use crate::retry::{Outcome, RetryPolicy};

/// Pulls `ClaimRewards` history for one validator off the StakeManager.
pub struct EventFetcher<'a, C> {
    client: &'a C,
    stake_manager: &'a ContractRef,
    retry: RetryPolicy,
    /// Split the block window into ranges of at most this many blocks.
    chunk_size: Option<u64>,
}

impl<'a, C: ChainClient> EventFetcher<'a, C> {
    pub fn new(client: &'a C, stake_manager: &'a ContractRef, retry: RetryPolicy) -> Self {
        Self {
            client,
            stake_manager,
            retry,
            chunk_size: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<u64>) -> Self {
        self.chunk_size = chunk_size.filter(|size| *size > 0);
        self
    }

    /// Fetch every claim for `validator_id` in `[from_block, to_block]`,
    /// attributing them to `claimant`. `to_block` defaults to the current
    /// head. No events yields [`Outcome::Empty`]; a fetch that keeps failing
    /// yields [`Outcome::RetriesExhausted`].
    pub async fn fetch_claim_history(
        &self,
        claimant: &str,
        validator_id: u64,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Outcome<Vec<RewardClaim>> {
        let label = format!("fetch {CLAIM_REWARDS_EVENT} for validator {validator_id}");
        self.retry
            .run(&label, || self.fetch_once(claimant, validator_id, from_block, to_block))
            .await
            .empty_when(Vec::is_empty)
    }

    async fn fetch_once(
        &self,
        claimant: &str,
        validator_id: u64,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<RewardClaim>> {
        let to_block = match to_block {
            Some(block) => block,
            None => self.client.current_block_number().await?,
        };
        let filters = [("validatorId", Token::Uint(U256::from(validator_id)))];

        let mut logs = Vec::new();
        for (from, to) in block_ranges(from_block, to_block, self.chunk_size) {
            debug!("Querying {CLAIM_REWARDS_EVENT} logs in [{from}, {to}]");
            let batch = self
                .client
                .get_logs(self.stake_manager, CLAIM_REWARDS_EVENT, &filters, from, to)
                .await?;
            logs.extend(batch);
        }

        let fetched_at = Utc::now();
        let mut claims = Vec::with_capacity(logs.len());
        for log in &logs {
            match claim_from_log(claimant, log, fetched_at)? {
                Some(claim) => claims.push(claim),
                None => warn!("Skipping {} log without transaction or block", log.event),
            }
        }
        info!(
            "Found {} {CLAIM_REWARDS_EVENT} events for validator {validator_id} in [{from_block}, {to_block}]",
            claims.len()
        );
        Ok(claims)
    }
}

/// Map a decoded log onto a claim. Pending logs (no hash or block yet)
/// return `None`.
pub fn claim_from_log(
    claimant: &str,
    log: &LogEntry,
    fetched_at: chrono::DateTime<Utc>,
) -> Result<Option<RewardClaim>> {
    let (Some(hash), Some(block_number)) = (log.transaction_hash, log.block_number) else {
        return Ok(None);
    };

    let validator_id = log
        .params
        .get("validatorId")
        .and_then(token_to_u64)
        .ok_or_else(|| anyhow!("{} log {hash:#x} has no usable validatorId", log.event))?;

    Ok(Some(RewardClaim {
        id: None,
        address: claimant.to_string(),
        validator_id,
        amount: uint_param(log, "amount")?,
        total: uint_param(log, "totalAmount")?,
        event: log.event.clone(),
        transaction_hash: format!("{hash:#x}"),
        block_number,
        inserted_at: fetched_at,
    }))
}

fn uint_param(log: &LogEntry, name: &str) -> Result<String> {
    match log.params.get(name) {
        Some(Token::Uint(value)) => Ok(value.to_string()),
        Some(other) => Err(anyhow!("{} `{name}` is not a uint: {other:?}", log.event)),
        None => Err(anyhow!("{} log has no `{name}`", log.event)),
    }
}

/// Inclusive sub-ranges covering `[from, to]`, each at most `chunk` blocks.
pub fn block_ranges(from: u64, to: u64, chunk: Option<u64>) -> Vec<(u64, u64)> {
    if from > to {
        return Vec::new();
    }
    let Some(chunk) = chunk else {
        return vec![(from, to)];
    };

    let mut ranges = Vec::new();
    let mut start = from;
    loop {
        let end = start.saturating_add(chunk - 1).min(to);
        ranges.push((start, end));
        if end == to {
            break;
        }
        start = end + 1;
    }
    ranges
}
