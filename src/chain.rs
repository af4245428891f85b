//! Read-only access to the chain: contract calls, historical logs and the
//! current head.
//!
//! Everything the pipeline needs from the node goes through [`ChainClient`],
//! so tests can swap the JSON-RPC transport for a scripted client.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use ethers::abi::{Abi, Event, RawLog, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, TransactionRequest, H256};
use ethers::utils::to_checksum;
use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid RPC url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect to Ethereum node at {url}: {source}")]
    Connectivity {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("ABI error: {0}")]
    Abi(String),
    #[error("RPC call failed: {0}")]
    Rpc(#[source] BoxError),
    #[error("could not decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl ChainError {
    pub fn rpc(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        ChainError::Rpc(Box::new(e))
    }
}

/// A deployed contract together with the ABI used to talk to it.
#[derive(Debug, Clone)]
pub struct ContractRef {
    pub name: String,
    pub address: Address,
    pub abi: Abi,
}

impl ContractRef {
    pub fn new(name: &str, address: &str, abi: Abi) -> Result<Self, ChainError> {
        let address = Address::from_str(address)
            .map_err(|e| ChainError::Abi(format!("invalid {name} address {address}: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            address,
            abi,
        })
    }

    /// EIP-55 form of the contract address.
    pub fn checksummed(&self) -> String {
        to_checksum(&self.address, None)
    }
}

/// One decoded event log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub event: String,
    pub params: BTreeMap<String, Token>,
    /// `None` for logs from pending blocks.
    pub transaction_hash: Option<H256>,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Call a view function and return its output. Multiple return values
    /// come back as a [`Token::Tuple`].
    async fn read_call(
        &self,
        contract: &ContractRef,
        method: &str,
        args: &[Token],
    ) -> Result<Token, ChainError>;

    /// Fetch and decode `event_name` logs over the inclusive block range.
    /// `filters` pins indexed arguments by name.
    async fn get_logs(
        &self,
        contract: &ContractRef,
        event_name: &str,
        filters: &[(&str, Token)],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError>;

    async fn current_block_number(&self) -> Result<u64, ChainError>;
}

/// [`ChainClient`] over any ethers middleware, HTTP JSON-RPC by default.
#[derive(Debug, Clone)]
pub struct EthersChainClient<M = Provider<Http>> {
    provider: M,
}

impl EthersChainClient<Provider<Http>> {
    /// Build an HTTP provider for `url` and check that it answers.
    pub async fn connect(url: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(url).map_err(|e| ChainError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Self::with_provider(provider, url).await
    }
}

impl<M: Middleware + 'static> EthersChainClient<M> {
    /// Ask `provider` for the head once, so an unreachable node fails the
    /// run up front instead of burning retries later.
    pub async fn with_provider(provider: M, url: &str) -> Result<Self, ChainError> {
        let head = provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Connectivity {
                url: url.to_string(),
                source: Box::new(e),
            })?;
        info!("Connected to Ethereum node, head at block {head}");

        Ok(Self { provider })
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for EthersChainClient<M> {
    async fn read_call(
        &self,
        contract: &ContractRef,
        method: &str,
        args: &[Token],
    ) -> Result<Token, ChainError> {
        let function = contract
            .abi
            .function(method)
            .map_err(|e| ChainError::Abi(format!("{}.{method}: {e}", contract.name)))?;
        let data = function
            .encode_input(args)
            .map_err(|e| ChainError::Abi(format!("{}.{method} arguments: {e}", contract.name)))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(contract.address)
            .data(data)
            .into();
        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(ChainError::rpc)?;

        let mut tokens = function
            .decode_output(&output)
            .map_err(|e| ChainError::Decode {
                what: format!("{}.{method} output", contract.name),
                reason: e.to_string(),
            })?;
        Ok(if tokens.len() == 1 {
            tokens.remove(0)
        } else {
            Token::Tuple(tokens)
        })
    }

    async fn get_logs(
        &self,
        contract: &ContractRef,
        event_name: &str,
        filters: &[(&str, Token)],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError> {
        let event = find_event(contract, event_name)?;
        let filter = build_filter(contract, event, filters, from_block, to_block)?;

        debug!(
            "eth_getLogs {}::{event_name} [{from_block}, {to_block}] at {}",
            contract.name,
            contract.checksummed()
        );
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(ChainError::rpc)?;

        logs.iter().map(|log| decode_log(event, log)).collect()
    }

    async fn current_block_number(&self) -> Result<u64, ChainError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(ChainError::rpc)?;
        Ok(head.as_u64())
    }
}

pub fn find_event<'a>(contract: &'a ContractRef, event_name: &str) -> Result<&'a Event, ChainError> {
    contract
        .abi
        .event(event_name)
        .map_err(|e| ChainError::Abi(format!("{}::{event_name}: {e}", contract.name)))
}

/// Build an `eth_getLogs` filter for `event`, placing each named filter value
/// in the topic slot of the matching indexed input.
pub fn build_filter(
    contract: &ContractRef,
    event: &Event,
    filters: &[(&str, Token)],
    from_block: u64,
    to_block: u64,
) -> Result<Filter, ChainError> {
    let mut topics: [Option<H256>; 3] = [None; 3];

    for (name, value) in filters {
        let slot = event
            .inputs
            .iter()
            .filter(|input| input.indexed)
            .position(|input| input.name == *name)
            .filter(|slot| *slot < topics.len())
            .ok_or_else(|| {
                ChainError::Abi(format!(
                    "`{name}` is not an indexed argument of {}",
                    event.name
                ))
            })?;
        topics[slot] = Some(encode_topic(value)?);
    }

    let mut filter = Filter::new()
        .address(contract.address)
        .topic0(event.signature())
        .from_block(from_block)
        .to_block(to_block);
    if let Some(topic) = topics[0] {
        filter = filter.topic1(topic);
    }
    if let Some(topic) = topics[1] {
        filter = filter.topic2(topic);
    }
    if let Some(topic) = topics[2] {
        filter = filter.topic3(topic);
    }
    Ok(filter)
}

/// Static ABI values encode to exactly one word, which is the topic.
fn encode_topic(value: &Token) -> Result<H256, ChainError> {
    let encoded = ethers::abi::encode(std::slice::from_ref(value));
    if encoded.len() != 32 {
        return Err(ChainError::Abi(format!(
            "cannot filter on dynamic value {value:?}"
        )));
    }
    Ok(H256::from_slice(&encoded))
}

pub fn decode_log(event: &Event, log: &ethers::types::Log) -> Result<LogEntry, ChainError> {
    let parsed = event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .map_err(|e| ChainError::Decode {
            what: format!("{} log", event.name),
            reason: e.to_string(),
        })?;

    Ok(LogEntry {
        event: event.name.clone(),
        params: parsed
            .params
            .into_iter()
            .map(|param| (param.name, param.value))
            .collect(),
        transaction_hash: log.transaction_hash,
        block_number: log.block_number.map(|n| n.as_u64()),
    })
}

pub fn token_to_u64(token: &Token) -> Option<u64> {
    match token {
        Token::Uint(value) | Token::Int(value) if value.bits() <= 64 => Some(value.as_u64()),
        _ => None,
    }
}
