use std::time::Duration;

use polygon_rewards_sync::config::SyncConfig;
use polygon_rewards_sync::db::Store;
use polygon_rewards_sync::retry::RetryPolicy;
use polygon_rewards_sync::sync::{SyncReport, Syncer};
use polygon_rewards_sync::test_utils::{
    claim_log, nft_contract, owner_address, stake_manager_contract, MockChainClient,
};
use tempfile::{tempdir, TempDir};

fn config(dir: &TempDir) -> SyncConfig {
    let mut config = SyncConfig::new("http://localhost:8545", dir.path().join("rewards.db"));
    config.retry = RetryPolicy::new(3, Duration::ZERO, 2);
    config
}

#[tokio::test]
async fn cached_owners_skip_collection_resolution() {
    let dir = tempdir().unwrap();
    let mut config = config(&dir);
    config.collection_size = 12;

    let first = MockChainClient::with_owners(12).with_head(100);
    Syncer::new(&config, &first, nft_contract(), stake_manager_contract())
        .run()
        .await
        .unwrap();
    assert_eq!(first.owner_calls(), 12);

    let second = MockChainClient::with_owners(12).with_head(100);
    let report = Syncer::new(&config, &second, nft_contract(), stake_manager_contract())
        .run()
        .await
        .unwrap();

    assert_eq!(second.owner_calls(), 0);
    assert!(matches!(report, SyncReport::NoRewards { exhausted: false, .. }));
    assert_eq!(Store::new(&config.db_path).count_owners().unwrap(), 12);
}

#[tokio::test]
async fn unmapped_owner_reports_validator_not_found() {
    let dir = tempdir().unwrap();
    let mut config = config(&dir);
    config.collection_size = 127;
    config.owner = Some("0x000000000000000000000000000000000000dEaD".to_string());

    let client = MockChainClient::with_owners(127)
        .with_head(1_000)
        .with_logs(vec![claim_log(1, 0x01, 10, 1, 1)]);
    let syncer = Syncer::new(&config, &client, nft_contract(), stake_manager_contract());

    // Populate the collection first, as an empty-database run would.
    let mut resolve_only = config.clone();
    resolve_only.owner = None;
    resolve_only.to_block = Some(0);
    let resolver_run = Syncer::new(&resolve_only, &client, nft_contract(), stake_manager_contract())
        .run()
        .await
        .unwrap();
    assert!(matches!(resolver_run, SyncReport::NoRewards { .. }));
    assert_eq!(client.owner_calls(), 127);

    let report = syncer.run().await.unwrap();
    assert_eq!(
        report,
        SyncReport::ValidatorNotFound {
            owner: "0x000000000000000000000000000000000000dEaD".to_string()
        }
    );
    assert_eq!(report.to_string(), "Validator ID not found.");
    assert_eq!(syncer.store().count_claims().unwrap(), 0);
}

#[tokio::test]
async fn rerunning_a_sync_inserts_nothing_new() {
    let dir = tempdir().unwrap();
    let mut config = config(&dir);
    config.owner = Some(owner_address(7));

    let store = Store::new(&config.db_path);
    store.ensure_schema().unwrap();
    store.upsert_ownership(&[(7, owner_address(7))]).unwrap();

    let client = MockChainClient::default().with_head(50_000).with_logs(vec![
        claim_log(7, 0xa1, 12_000, 1_500, 9_000),
        claim_log(7, 0xa2, 34_000, 2_500, 11_500),
    ]);
    let syncer = Syncer::new(&config, &client, nft_contract(), stake_manager_contract());

    let first = syncer.run().await.unwrap();
    assert_eq!(
        first,
        SyncReport::Stored {
            owner: owner_address(7),
            validator_id: 7,
            fetched: 2,
            inserted: 2,
            total: 2,
        }
    );

    let second = syncer.run().await.unwrap();
    assert!(matches!(
        second,
        SyncReport::Stored {
            fetched: 2,
            inserted: 0,
            total: 2,
            ..
        }
    ));

    let claims = store.claims_for_validator(7).unwrap();
    assert_eq!(claims.len(), 2);
    assert_eq!(claims[1].total, "11500");
    assert!(claims.iter().all(|c| c.address == owner_address(7)));
}
