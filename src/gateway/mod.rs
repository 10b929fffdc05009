use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::{identity::Identity, transaction::TransactionError};

pub mod profile;

use profile::{ConnectionProfile, PeerEndpoint};

pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to gateway: {reason}")]
    ConnectionError { reason: String },
    #[error("Network `{name}` not found")]
    NetworkNotFound { name: String },
    #[error("Session is closed")]
    SessionClosed,
}

/// Per connection settings, passed explicitly instead of through the
/// process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub discovery_as_localhost: bool,
    /// How long a submit waits for its commit event.
    pub commit_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            discovery_as_localhost: true,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    /// Takes the commit window from the profile's endorser timeout, when set.
    pub fn for_profile(profile: &ConnectionProfile, discovery_as_localhost: bool) -> Self {
        Self {
            discovery_as_localhost,
            commit_timeout: profile.endorser_timeout().unwrap_or(DEFAULT_COMMIT_TIMEOUT),
        }
    }
}

/// A single invocation of a named contract function.
#[derive(Debug, Clone, Copy)]
pub struct ContractCall<'a> {
    pub channel: &'a str,
    pub contract: &'a str,
    pub transaction: &'a str,
    pub args: &'a [String],
}

/// Opens connections to a ledger network.
///
/// NOTE: peers, ordering and consensus live behind this seam. The crate
/// only ships [`crate::ledger::in_memory_ledger::InMemoryLedger`].
pub trait LedgerTransport {
    fn connect(
        &self,
        endpoints: &[PeerEndpoint],
        identity: &Identity,
        options: &ConnectOptions,
    ) -> Result<Box<dyn LedgerConnection>, SessionError>;
}

/// An authenticated connection, exclusively owned by one [`Session`].
pub trait LedgerConnection {
    fn has_channel(&self, channel: &str) -> bool;

    /// Endorses, orders and waits for the commit of `call`.
    fn submit(&self, call: ContractCall<'_>) -> Result<Vec<u8>, TransactionError>;

    /// Runs `call` on a single peer without ordering it.
    fn evaluate(&self, call: ContractCall<'_>) -> Result<Vec<u8>, TransactionError>;

    fn close(self: Box<Self>);
}

/// Authenticated session to a ledger network. The underlying connection is
/// released by [`Session::close`] or, at the latest, when the session is
/// dropped.
pub struct Session {
    connection: Option<Box<dyn LedgerConnection>>,
}

impl Session {
    pub fn connect(
        transport: &impl LedgerTransport,
        profile: &ConnectionProfile,
        identity: &Identity,
        options: ConnectOptions,
    ) -> Result<Self, SessionError> {
        let endpoints = profile
            .peer_endpoints(&identity.msp_id, options.discovery_as_localhost)
            .map_err(|err| SessionError::ConnectionError {
                reason: err.to_string(),
            })?;
        debug!(
            profile = %profile.name,
            peers = endpoints.len(),
            "opening gateway connection"
        );
        let connection = transport.connect(&endpoints, identity, &options)?;
        info!(profile = %profile.name, msp_id = %identity.msp_id, "gateway connected");
        Ok(Self {
            connection: Some(connection),
        })
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn network(&self, name: &str) -> Result<Network<'_>, SessionError> {
        let connection = self.connection()?;
        if !connection.has_channel(name) {
            return Err(SessionError::NetworkNotFound {
                name: name.to_string(),
            });
        }
        Ok(Network {
            session: self,
            name: name.to_string(),
        })
    }

    /// Releases the connection. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!("gateway closed");
        }
    }

    pub(crate) fn connection(&self) -> Result<&dyn LedgerConnection, SessionError> {
        self.connection.as_deref().ok_or(SessionError::SessionClosed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// A channel resolved within a session.
#[derive(Clone)]
pub struct Network<'s> {
    session: &'s Session,
    name: String,
}

impl<'s> Network<'s> {
    /// Does not contact the network; an unknown contract surfaces on the
    /// first transaction.
    pub fn contract(&self, name: &str) -> Contract<'s> {
        Contract {
            session: self.session,
            channel: self.name.clone(),
            name: name.to_string(),
        }
    }
}

/// Handle to a named contract on a channel. Borrowing the session keeps it
/// open for as long as any handle is alive.
#[derive(Clone)]
pub struct Contract<'s> {
    pub(crate) session: &'s Session,
    pub(crate) channel: String,
    pub(crate) name: String,
}

impl Contract<'_> {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
