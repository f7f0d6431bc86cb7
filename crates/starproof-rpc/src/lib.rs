//! Soroban JSON-RPC wire model and XDR helpers shared by the client and the mock ledger.

pub mod convert;
pub mod model;
pub mod simulation;

pub use convert::XdrError;
pub use simulation::{SimulationError, SimulationOutcome};
