//! In-memory Soroban RPC node and certification contract for tests and demos.

pub mod ledger;
pub mod scenarios;

pub use ledger::{MockCallCounts, MockLedger, MOCK_RESOURCE_FEE};
pub use scenarios::{DemoAccounts, DemoScenario, DEMO_PASSPHRASE};
