use starproof_crypto::KeypairSigner;
use starproof_types::{AccountAddress, ContractAddress, WasmHash};

use crate::ledger::MockLedger;

pub const DEMO_PASSPHRASE: &str = "Test SDF Network ; September 2015";

pub const ADMIN_SEED: [u8; 32] = [0x11; 32];
pub const RECIPIENT_SEED: [u8; 32] = [0x22; 32];
pub const OUTSIDER_SEED: [u8; 32] = [0x33; 32];

#[derive(Debug, Clone, Copy)]
pub struct DemoAccounts {
    pub admin: AccountAddress,
    pub recipient: AccountAddress,
    pub outsider: AccountAddress,
    pub contract: ContractAddress,
    pub wasm_hash: WasmHash,
}

/// An initialized certification contract with three funded accounts.
#[derive(Debug, Clone)]
pub struct DemoScenario {
    pub accounts: DemoAccounts,
    pub admin: KeypairSigner,
    pub recipient: KeypairSigner,
    pub outsider: KeypairSigner,
    pub ledger: MockLedger,
}

impl DemoScenario {
    pub fn new() -> Self {
        let admin = KeypairSigner::from_seed(ADMIN_SEED);
        let recipient = KeypairSigner::from_seed(RECIPIENT_SEED);
        let outsider = KeypairSigner::from_seed(OUTSIDER_SEED);
        let accounts = DemoAccounts {
            admin: admin.address(),
            recipient: recipient.address(),
            outsider: outsider.address(),
            contract: ContractAddress::from_bytes([0xc0; 32]),
            wasm_hash: WasmHash::new([0x3a; 32]),
        };

        let mut ledger = MockLedger::initialized(
            DEMO_PASSPHRASE,
            accounts.contract,
            accounts.wasm_hash,
            accounts.admin,
        );
        ledger.fund_account(accounts.admin, 100);
        ledger.fund_account(accounts.recipient, 200);
        ledger.fund_account(accounts.outsider, 300);

        Self {
            accounts,
            admin,
            recipient,
            outsider,
            ledger,
        }
    }
}

impl Default for DemoScenario {
    fn default() -> Self {
        Self::new()
    }
}
