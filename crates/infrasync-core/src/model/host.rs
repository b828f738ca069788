use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of one router or broker pod.
///
/// Two hosts with the same hostname but different IPs are distinct: a pod
/// that came back with a new IP is a new peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub ip: String,
}

impl Host {
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.ip)
    }
}
