// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local machine identity, resolved once at startup.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{info, warn};

use printaudit_core::types::HostIdentity;

/// Name and primary IPv4 address of this host, plus the process user.
#[derive(Debug, Clone)]
pub struct HostIdentityResolver {
    identity: HostIdentity,
}

impl HostIdentityResolver {
    /// Look up the machine name and the first non-loopback IPv4 address.
    ///
    /// Never fails: an unreadable hostname becomes `whoami`'s device name and
    /// a host without a usable address reports `127.0.0.1`.
    pub fn resolve() -> Self {
        let host_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(whoami::devicename);

        let addresses: Vec<IpAddr> = match local_ip_address::list_afinet_netifas() {
            Ok(ifaces) => ifaces.into_iter().map(|(_, ip)| ip).collect(),
            Err(e) => {
                warn!(error = %e, "could not enumerate network interfaces");
                Vec::new()
            }
        };
        let host_address = primary_ipv4(addresses).to_string();

        info!(%host_name, %host_address, "host identity resolved");
        Self::from_identity(HostIdentity {
            host_name,
            host_address,
        })
    }

    pub fn from_identity(identity: HostIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    /// User running this process.
    pub fn current_username(&self) -> String {
        whoami::username()
    }
}

/// First non-loopback IPv4 address, or the loopback literal.
fn primary_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Ipv4Addr {
    addresses
        .into_iter()
        .find_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}
