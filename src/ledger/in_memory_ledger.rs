use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    config::{DEFAULT_CHAINCODE_NAME, DEFAULT_CHANNEL_NAME},
    gateway::{
        ConnectOptions, ContractCall, LedgerConnection, LedgerTransport, SessionError,
        profile::PeerEndpoint,
    },
    identity::Identity,
    loan::Loan,
    transaction::TransactionError,
};

use super::loan_contract::LoanContract;

/// Failure to inject into the next call of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Endorsement fails with the given reason, nothing is written.
    Reject(String),
    /// The commit window passes before the transaction is ordered.
    TimeoutBeforeCommit,
    /// The transaction commits but the client stops waiting first.
    TimeoutAfterCommit,
}

struct LedgerState {
    reachable: bool,
    members: HashSet<String>,
    channels: HashMap<String, HashMap<String, LoanContract>>,
    faults: HashMap<String, VecDeque<Fault>>,
    open_connections: usize,
    block_height: u64,
}

/// Ledger network simulated in process memory, hosting loan contracts.
///
/// Clones share the same world state, so a test can keep one handle to
/// inspect what a session committed.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                reachable: true,
                members: HashSet::new(),
                channels: HashMap::new(),
                faults: HashMap::new(),
                open_connections: 0,
                block_height: 0,
            })),
        }
    }
}

impl InMemoryLedger {
    pub fn with_loan_contract(channel: &str, contract: &str) -> Self {
        let ledger = Self::default();
        ledger.deploy_loan_contract(channel, contract);
        ledger
    }

    /// Hosts the loan contract under the default channel and chaincode
    /// names only, so configured overrides select other networks.
    pub fn with_default_network() -> Self {
        Self::with_loan_contract(DEFAULT_CHANNEL_NAME, DEFAULT_CHAINCODE_NAME)
    }

    pub fn deploy_loan_contract(&self, channel: &str, contract: &str) {
        self.state
            .lock()
            .channels
            .entry(channel.to_string())
            .or_default()
            .entry(contract.to_string())
            .or_default();
    }

    /// Restricts connections to identities of the registered MSPs. Without
    /// any registered member every identity is accepted.
    pub fn add_member(&self, msp_id: &str) {
        self.state.lock().members.insert(msp_id.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    pub fn inject_fault(&self, transaction: &str, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry(transaction.to_string())
            .or_default()
            .push_back(fault);
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    pub fn block_height(&self) -> u64 {
        self.state.lock().block_height
    }

    pub fn loan(&self, channel: &str, contract: &str, loan_id: &str) -> Option<Loan> {
        self.state
            .lock()
            .channels
            .get(channel)?
            .get(contract)?
            .loan(loan_id)
            .cloned()
    }
}

impl LedgerTransport for InMemoryLedger {
    fn connect(
        &self,
        endpoints: &[PeerEndpoint],
        identity: &Identity,
        options: &ConnectOptions,
    ) -> Result<Box<dyn LedgerConnection>, SessionError> {
        let mut state = self.state.lock();
        if endpoints.is_empty() {
            return Err(SessionError::ConnectionError {
                reason: "no peer endpoints to connect to".to_string(),
            });
        }
        if !state.reachable {
            let urls: Vec<&str> = endpoints.iter().map(|peer| peer.url.as_str()).collect();
            return Err(SessionError::ConnectionError {
                reason: format!("no peer reachable at {}", urls.join(", ")),
            });
        }
        if !state.members.is_empty() && !state.members.contains(&identity.msp_id) {
            return Err(SessionError::ConnectionError {
                reason: format!("identity of {} is not a channel member", identity.msp_id),
            });
        }
        state.open_connections += 1;
        debug!(peers = endpoints.len(), "in-memory connection opened");
        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            commit_timeout: options.commit_timeout,
        }))
    }
}

struct InMemoryConnection {
    state: Arc<Mutex<LedgerState>>,
    commit_timeout: Duration,
}

impl LedgerState {
    fn take_fault(&mut self, transaction: &str) -> Option<Fault> {
        self.faults.get_mut(transaction)?.pop_front()
    }

    fn contract(&mut self, call: &ContractCall<'_>) -> Result<&mut LoanContract, String> {
        self.channels
            .get_mut(call.channel)
            .ok_or_else(|| format!("channel {} does not exist", call.channel))?
            .get_mut(call.contract)
            .ok_or_else(|| {
                format!(
                    "chaincode {} is not installed on channel {}",
                    call.contract, call.channel
                )
            })
    }
}

impl LedgerConnection for InMemoryConnection {
    fn has_channel(&self, channel: &str) -> bool {
        self.state.lock().channels.contains_key(channel)
    }

    fn submit(&self, call: ContractCall<'_>) -> Result<Vec<u8>, TransactionError> {
        let mut state = self.state.lock();
        let fault = state.take_fault(call.transaction);
        let rejected = |reason: String| TransactionError::TransactionRejected {
            transaction: call.transaction.to_string(),
            reason,
        };
        let timeout = TransactionError::TransactionTimeout {
            transaction: call.transaction.to_string(),
            waited: self.commit_timeout,
        };

        match fault {
            Some(Fault::Reject(reason)) => return Err(rejected(reason)),
            Some(Fault::TimeoutBeforeCommit) => return Err(timeout),
            _ => {}
        }

        let contract = state.contract(&call).map_err(rejected)?;
        let execution = contract
            .execute(call.transaction, call.args)
            .map_err(|err| rejected(err.to_string()))?;
        if let Some(event) = &execution.event {
            contract.apply(event);
        }
        state.block_height += 1;

        if fault == Some(Fault::TimeoutAfterCommit) {
            return Err(timeout);
        }
        Ok(execution.response)
    }

    fn evaluate(&self, call: ContractCall<'_>) -> Result<Vec<u8>, TransactionError> {
        let mut state = self.state.lock();
        let query_error = |reason: String| TransactionError::QueryError {
            transaction: call.transaction.to_string(),
            reason,
        };
        match state.take_fault(call.transaction) {
            Some(Fault::Reject(reason)) => return Err(query_error(reason)),
            Some(Fault::TimeoutBeforeCommit | Fault::TimeoutAfterCommit) => {
                return Err(query_error("peer did not respond".to_string()));
            }
            None => {}
        }
        let contract = state.contract(&call).map_err(query_error)?;
        contract
            .execute(call.transaction, call.args)
            .map(|execution| execution.response)
            .map_err(|err| query_error(err.to_string()))
    }

    fn close(self: Box<Self>) {
        let mut state = self.state.lock();
        state.open_connections = state.open_connections.saturating_sub(1);
        debug!("in-memory connection closed");
    }
}
