use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read connection profile `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid connection profile: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Organization `{msp_id}` is not described by the connection profile")]
    UnknownOrganization { msp_id: String },
    #[error("Organization `{msp_id}` lists no reachable peers")]
    NoPeers { msp_id: String },
}

/// Network topology as described by a common connection profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub organizations: BTreeMap<String, Organization>,
    #[serde(default)]
    pub peers: BTreeMap<String, Peer>,
    #[serde(default)]
    pub channels: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSection {
    pub organization: Option<String>,
    #[serde(default)]
    pub connection: Option<ClientConnection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConnection {
    pub timeout: Option<TimeoutSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSection {
    pub peer: Option<PeerTimeouts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerTimeouts {
    pub endorser: Option<Seconds>,
}

/// Profiles written by hand use numbers, generated ones quote them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Seconds {
    Number(u64),
    Text(String),
}

impl Seconds {
    fn as_duration(&self) -> Option<Duration> {
        match self {
            Seconds::Number(secs) => Some(Duration::from_secs(*secs)),
            Seconds::Text(text) => text.trim().parse().ok().map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub mspid: String,
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Peer {
    pub url: String,
    #[serde(rename = "tlsCACerts", default)]
    pub tls_ca_certs: Option<TlsCaCerts>,
    #[serde(rename = "grpcOptions", default)]
    pub grpc_options: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsCaCerts {
    pub pem: Option<String>,
    pub path: Option<PathBuf>,
}

/// A peer the session may talk to, after discovery rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub name: String,
    pub url: String,
    pub tls_ca_pem: Option<String>,
    pub ssl_target_name_override: Option<String>,
}

impl ConnectionProfile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ProfileError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn endorser_timeout(&self) -> Option<Duration> {
        self.client
            .connection
            .as_ref()?
            .timeout
            .as_ref()?
            .peer
            .as_ref()?
            .endorser
            .as_ref()?
            .as_duration()
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Peers of the organization owning `msp_id`. With
    /// `discovery_as_localhost` every peer host is replaced by `localhost`.
    pub fn peer_endpoints(
        &self,
        msp_id: &str,
        discovery_as_localhost: bool,
    ) -> Result<Vec<PeerEndpoint>, ProfileError> {
        let org = self
            .organizations
            .values()
            .find(|org| org.mspid == msp_id)
            .ok_or_else(|| ProfileError::UnknownOrganization {
                msp_id: msp_id.to_string(),
            })?;

        let endpoints: Vec<PeerEndpoint> = org
            .peers
            .iter()
            .filter_map(|name| self.peers.get(name).map(|peer| (name, peer)))
            .map(|(name, peer)| PeerEndpoint {
                name: name.clone(),
                url: if discovery_as_localhost {
                    localhost_url(&peer.url)
                } else {
                    peer.url.clone()
                },
                tls_ca_pem: peer.tls_ca_certs.as_ref().and_then(|tls| tls.pem.clone()),
                ssl_target_name_override: peer
                    .grpc_options
                    .get("ssl-target-name-override")
                    .and_then(|value| value.as_str())
                    .map(ToOwned::to_owned),
            })
            .collect();

        if endpoints.is_empty() {
            return Err(ProfileError::NoPeers {
                msp_id: msp_id.to_string(),
            });
        }
        Ok(endpoints)
    }
}

fn localhost_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let port = authority.rsplit_once(':').map(|(_, port)| port);

    let mut rewritten = String::new();
    if let Some(scheme) = scheme {
        rewritten.push_str(scheme);
        rewritten.push_str("://");
    }
    rewritten.push_str("localhost");
    if let Some(port) = port {
        rewritten.push(':');
        rewritten.push_str(port);
    }
    rewritten.push_str(path);
    rewritten
}
