/// Client configuration: file locations, identity alias, channel and
/// contract names, with environment overrides.
pub mod config;

/// Named X.509 identities and their provisioning from an MSP credential
/// bundle.
pub mod identity;

/// Sessions to a ledger network, plus the channel and contract handles
/// resolved through them.
///
/// NOTE: the network itself sits behind the [`gateway::LedgerTransport`]
/// trait, so the rest of the crate never knows how peers are reached.
pub mod gateway;

/// Submit and evaluate over a contract handle, and the typed loan contract
/// functions.
pub mod transaction;

/// Loan record as returned by the contract.
pub mod loan;

/// Apply, approve, repay and query as an explicit state machine.
pub mod flow;

/// Ledger network simulated in memory, hosting the loan contract. Used by
/// tests and for running the client without a network.
pub mod ledger;

/// Wires wallet, profile, session and flow together for the binary. Kept in
/// the library so the integration test can run the same path.
pub mod bin_utils;
