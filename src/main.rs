use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;

use polygon_rewards_sync::abi::{fetch_abi, ETHERSCAN_API};
use polygon_rewards_sync::chain::EthersChainClient;
use polygon_rewards_sync::config::{
    SyncConfig, DEFAULT_COLLECTION_SIZE, DEFAULT_DB_PATH, NFT_CONTRACT_ADDRESS,
    STAKE_MANAGER_ADDRESS,
};
use polygon_rewards_sync::db::Store;
use polygon_rewards_sync::owners::normalize_address;
use polygon_rewards_sync::retry::RetryPolicy;
use polygon_rewards_sync::sync::Syncer;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// SQLite DB path
    #[arg(short, long, env = "DB_PATH", default_value = DEFAULT_DB_PATH, global = true)]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an owner and store its validator's ClaimRewards history
    Sync(SyncArgs),
    /// Print stored reward claims for a validator
    Query {
        /// Validator id (NFT token id)
        #[arg(short, long, conflicts_with = "owner")]
        validator: Option<u64>,

        /// Owner address, resolved through the stored NFT owners
        #[arg(short, long)]
        owner: Option<String>,

        /// Print claims as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download a verified contract ABI from Etherscan
    FetchAbi {
        /// Contract address
        #[arg(short, long, default_value = STAKE_MANAGER_ADDRESS)]
        address: String,

        #[arg(short, long, default_value = "abi.json")]
        output: PathBuf,

        #[arg(long, env = "ETHERSCAN_API_KEY")]
        api_key: String,

        #[arg(long, default_value = ETHERSCAN_API)]
        api_url: String,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Ethereum JSON-RPC URL
    #[arg(short, long, env = "ETH_RPC_URL")]
    rpc: String,

    #[arg(long, default_value = "./abi/stake_manager_abi.json")]
    stake_manager_abi: PathBuf,

    #[arg(long, default_value = "./abi/nft.json")]
    nft_abi: PathBuf,

    #[arg(long, default_value = STAKE_MANAGER_ADDRESS)]
    stake_manager: String,

    #[arg(long, default_value = NFT_CONTRACT_ADDRESS)]
    nft_contract: String,

    /// Number of validator NFTs to resolve on an empty database
    #[arg(long, default_value_t = DEFAULT_COLLECTION_SIZE)]
    collection_size: u64,

    /// Attempts per chain operation
    #[arg(long, default_value_t = 3)]
    tries: u32,

    /// Initial wait between attempts
    #[arg(long, default_value_t = 2)]
    delay_secs: u64,

    #[arg(long, default_value_t = 2)]
    backoff: u32,

    #[arg(long, default_value_t = 0)]
    from_block: u64,

    /// Defaults to the current head
    #[arg(long)]
    to_block: Option<u64>,

    /// Sync this owner instead of a cached or resolved one
    #[arg(long)]
    owner: Option<String>,

    /// Max blocks per eth_getLogs request
    #[arg(long)]
    log_chunk_size: Option<u64>,
}

impl SyncArgs {
    fn into_config(self, db_path: PathBuf) -> SyncConfig {
        SyncConfig {
            rpc_url: self.rpc,
            db_path,
            stake_manager_address: self.stake_manager,
            stake_manager_abi: self.stake_manager_abi,
            nft_address: self.nft_contract,
            nft_abi: self.nft_abi,
            collection_size: self.collection_size,
            retry: RetryPolicy::new(self.tries, Duration::from_secs(self.delay_secs), self.backoff),
            from_block: self.from_block,
            to_block: self.to_block,
            owner: self.owner,
            log_chunk_size: self.log_chunk_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync(args) => {
            let config = args.into_config(cli.db_path);
            let client = EthersChainClient::connect(&config.rpc_url).await?;
            let syncer = Syncer::from_config(&config, &client)?;

            let report = syncer.run().await?;
            println!("{report}");
        }

        Commands::Query {
            validator,
            owner,
            json,
        } => {
            let store = Store::new(&cli.db_path);
            store.ensure_schema()?;

            let validator_id = match (validator, owner) {
                (Some(id), _) => id,
                (None, Some(owner)) => match store.validator_id_for(&normalize_address(&owner))? {
                    Some(id) => id,
                    None => {
                        println!("Validator ID not found for owner {owner} in database.");
                        return Ok(());
                    }
                },
                (None, None) => bail!("pass --validator or --owner"),
            };

            let claims = store.claims_for_validator(validator_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&claims)?);
                return Ok(());
            }

            if claims.is_empty() {
                println!("No reward claims stored for validator {validator_id}");
            }
            for claim in &claims {
                println!(
                    "Block {}: {} {} (total {}) tx {}",
                    claim.block_number, claim.event, claim.amount, claim.total, claim.transaction_hash
                );
            }
            println!(
                "Validator: {validator_id}\nClaims: {}\nLatest block: {:?}\nTotal records in database: {}",
                claims.len(),
                store.latest_claim_block(validator_id)?,
                store.count_claims()?
            );
        }

        Commands::FetchAbi {
            address,
            output,
            api_key,
            api_url,
        } => {
            fetch_abi(&api_url, &address, &api_key, &output).await?;
            println!("Wrote ABI for {address} to {}", output.display());
        }
    }

    Ok(())
}
