//! Service registry: the fixed set of emulated protocols, their transports,
//! and the per-service descriptors loaded from configuration.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Ssh,
    Ftp,
    Telnet,
    Mysql,
    Postgres,
    Redis,
    Mongodb,
    Dns,
    Ntp,
    Ssdp,
}

impl Protocol {
    pub const ALL: [Protocol; 11] = [
        Protocol::Http,
        Protocol::Ssh,
        Protocol::Ftp,
        Protocol::Telnet,
        Protocol::Mysql,
        Protocol::Postgres,
        Protocol::Redis,
        Protocol::Mongodb,
        Protocol::Dns,
        Protocol::Ntp,
        Protocol::Ssdp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Ssh => "ssh",
            Protocol::Ftp => "ftp",
            Protocol::Telnet => "telnet",
            Protocol::Mysql => "mysql",
            Protocol::Postgres => "postgres",
            Protocol::Redis => "redis",
            Protocol::Mongodb => "mongodb",
            Protocol::Dns => "dns",
            Protocol::Ntp => "ntp",
            Protocol::Ssdp => "ssdp",
        }
    }

    /// Transport each protocol is emulated over. DNS/NTP/SSDP are UDP-only
    /// here; everything else speaks TCP.
    pub fn transport(&self) -> Transport {
        match self {
            Protocol::Dns | Protocol::Ntp | Protocol::Ssdp => Transport::Udp,
            _ => Transport::Tcp,
        }
    }

    /// Conventional port used when the config does not name one.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 8080,
            Protocol::Ssh => 2222,
            Protocol::Ftp => 2121,
            Protocol::Telnet => 2323,
            Protocol::Mysql => 3306,
            Protocol::Postgres => 5432,
            Protocol::Redis => 6379,
            Protocol::Mongodb => 27017,
            Protocol::Dns => 5353,
            Protocol::Ntp => 123,
            Protocol::Ssdp => 1900,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        })
    }
}

/// One emulated service as loaded from config. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub protocol: Protocol,
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Validated, resolved service entry used by the listener manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub protocol: Protocol,
    pub transport: Transport,
    pub port: u16,
}

/// Resolve descriptors into the runtime registry. Unknown protocol names are
/// rejected earlier by TOML deserialization into the closed `Protocol` enum;
/// here we reject transport mismatches and duplicate ports, both fatal
/// configuration errors.
pub fn resolve(descriptors: &[ServiceDescriptor]) -> Result<Vec<Service>> {
    let mut out = Vec::new();
    for d in descriptors {
        if !d.enabled {
            continue;
        }
        let expected = d.protocol.transport();
        if let Some(t) = d.transport {
            if t != expected {
                bail!(
                    "service {} must run over {}, config says {}",
                    d.protocol,
                    expected,
                    t
                );
            }
        }
        let svc = Service {
            protocol: d.protocol,
            transport: expected,
            port: d.port.unwrap_or_else(|| d.protocol.default_port()),
        };
        if out
            .iter()
            .any(|s: &Service| s.port == svc.port && s.transport == svc.transport)
        {
            bail!("duplicate {} port {} in service list", svc.transport, svc.port);
        }
        out.push(svc);
    }
    if out.is_empty() {
        bail!("no enabled services in configuration");
    }
    Ok(out)
}

/// Default registry: every emulated protocol on its conventional port.
pub fn default_descriptors() -> Vec<ServiceDescriptor> {
    Protocol::ALL
        .iter()
        .map(|p| ServiceDescriptor {
            protocol: *p,
            transport: Some(p.transport()),
            port: Some(p.default_port()),
            enabled: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_all_protocols() {
        let services = resolve(&default_descriptors()).unwrap();
        assert_eq!(services.len(), Protocol::ALL.len());
    }

    #[test]
    fn transport_mismatch_is_fatal() {
        let d = vec![ServiceDescriptor {
            protocol: Protocol::Dns,
            transport: Some(Transport::Tcp),
            port: Some(53),
            enabled: true,
        }];
        assert!(resolve(&d).is_err());
    }

    #[test]
    fn disabled_services_are_skipped() {
        let mut descriptors = default_descriptors();
        for d in &mut descriptors {
            d.enabled = d.protocol == Protocol::Ssh;
        }
        let services = resolve(&descriptors).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].protocol, Protocol::Ssh);
    }

    #[test]
    fn unknown_protocol_name_fails_deserialization() {
        let toml = "protocol = \"gopher\"\nport = 70\n";
        assert!(toml::from_str::<ServiceDescriptor>(toml).is_err());
    }

    #[test]
    fn duplicate_port_is_fatal() {
        let d = vec![
            ServiceDescriptor {
                protocol: Protocol::Ssh,
                transport: None,
                port: Some(2222),
                enabled: true,
            },
            ServiceDescriptor {
                protocol: Protocol::Ftp,
                transport: None,
                port: Some(2222),
                enabled: true,
            },
        ];
        assert!(resolve(&d).is_err());
    }
}
