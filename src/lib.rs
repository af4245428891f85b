pub mod abi;
pub mod chain;
pub mod config;
pub mod db;
pub mod indexer;
pub mod models;
pub mod owners;
pub mod retry;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
