use std::path::PathBuf;

pub const CHANNEL_NAME_VAR: &str = "CHANNEL_NAME";
pub const CHAINCODE_NAME_VAR: &str = "CHAINCODE_NAME";

pub const DEFAULT_CHANNEL_NAME: &str = "mychannel";
pub const DEFAULT_CHAINCODE_NAME: &str = "loan";
pub const DEFAULT_IDENTITY_ALIAS: &str = "appUser";
pub const DEFAULT_MSP_ID: &str = "Org1MSP";

const ORG_DIR: &[&str] = &[
    "..",
    "fabric-samples",
    "test-network",
    "organizations",
    "peerOrganizations",
    "org1.example.com",
];

/// Everything the client needs to know before opening a session.
///
/// Defaults reproduce the layout of the Fabric samples test network checked
/// out next to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub wallet_dir: PathBuf,
    /// MSP directory holding `signcerts/cert.pem` and `keystore/`.
    pub msp_dir: PathBuf,
    pub connection_profile: PathBuf,
    pub identity_alias: String,
    pub msp_id: String,
    pub channel_name: String,
    pub chaincode_name: String,
    /// Rewrite discovered peer hosts to `localhost`, needed when the
    /// network runs in containers on the local machine.
    pub discovery_as_localhost: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let org_dir: PathBuf = ORG_DIR.iter().collect();
        Self {
            wallet_dir: PathBuf::from("wallet"),
            msp_dir: org_dir
                .join("users")
                .join("User1@org1.example.com")
                .join("msp"),
            connection_profile: org_dir.join("connection-org1.yaml"),
            identity_alias: DEFAULT_IDENTITY_ALIAS.to_string(),
            msp_id: DEFAULT_MSP_ID.to_string(),
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            chaincode_name: DEFAULT_CHAINCODE_NAME.to_string(),
            discovery_as_localhost: true,
        }
    }
}

impl ClientConfig {
    /// Defaults with channel and chaincode names taken from the process
    /// environment.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies `CHANNEL_NAME` and `CHAINCODE_NAME` from `lookup`. Empty
    /// values count as unset.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if let Some(channel) = lookup(CHANNEL_NAME_VAR) {
            self.channel_name = channel;
        }
        if let Some(chaincode) = lookup(CHAINCODE_NAME_VAR) {
            self.chaincode_name = chaincode;
        }
        self
    }
}
