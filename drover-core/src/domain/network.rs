//! IP address types carried by job variables

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkParseError {
    #[error("'{0}' is missing a prefix length")]
    MissingPrefix(String),

    #[error("'{0}' is not a valid IP address")]
    InvalidAddress(String),

    #[error("prefix length {prefix} is out of range for {addr}")]
    PrefixOutOfRange { addr: IpAddr, prefix: u8 },

    #[error("'{0}' has host bits set")]
    HostBitsSet(String),
}

fn split_prefix(s: &str) -> Result<(IpAddr, u8), NetworkParseError> {
    let (addr, prefix) = s
        .trim()
        .split_once('/')
        .ok_or_else(|| NetworkParseError::MissingPrefix(s.to_string()))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| NetworkParseError::InvalidAddress(s.to_string()))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| NetworkParseError::InvalidAddress(s.to_string()))?;

    if prefix > max_prefix(&addr) {
        return Err(NetworkParseError::PrefixOutOfRange { addr, prefix });
    }

    Ok((addr, prefix))
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn has_host_bits(addr: &IpAddr, prefix: u8) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(*v4);
            let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
            bits & !mask != 0
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(*v6);
            let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
            bits & !mask != 0
        }
    }
}

/// An address together with its prefix length, e.g. `10.0.0.1/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpInterface {
    addr: IpAddr,
    prefix: u8,
}

impl IpInterface {
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for IpInterface {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = split_prefix(s)?;
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for IpInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// A network prefix with no host bits set, e.g. `10.0.0.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNetwork {
    network: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                let candidate = IpNetwork::truncate(addr, self.prefix);
                candidate == self.network
            }
            _ => false,
        }
    }

    fn truncate(addr: IpAddr, prefix: u8) -> IpAddr {
        match addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
                IpAddr::V4((u32::from(v4) & mask).into())
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
                IpAddr::V6((u128::from(v6) & mask).into())
            }
        }
    }
}

impl FromStr for IpNetwork {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (network, prefix) = split_prefix(s)?;
        if has_host_bits(&network, prefix) {
            return Err(NetworkParseError::HostBitsSet(s.to_string()));
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(IpInterface);
string_serde!(IpNetwork);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_keeps_host_bits() {
        let iface: IpInterface = "10.1.2.3/24".parse().unwrap();
        assert_eq!(iface.to_string(), "10.1.2.3/24");
        assert_eq!(iface.prefix(), 24);
    }

    #[test]
    fn test_network_rejects_host_bits() {
        assert!("10.1.2.3/24".parse::<IpNetwork>().is_err());
        let net: IpNetwork = "10.1.2.0/24".parse().unwrap();
        assert_eq!(net.to_string(), "10.1.2.0/24");
        assert!(net.contains("10.1.2.77".parse().unwrap()));
        assert!(!net.contains("10.1.3.1".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_network() {
        let net: IpNetwork = "2001:db8::/32".parse().unwrap();
        assert_eq!(net.to_string(), "2001:db8::/32");
        assert!("2001:db8::1/32".parse::<IpNetwork>().is_err());
        let any: IpNetwork = "::/0".parse().unwrap();
        assert_eq!(any.prefix(), 0);
    }

    #[test]
    fn test_prefix_validation() {
        assert!(matches!(
            "10.0.0.0".parse::<IpNetwork>(),
            Err(NetworkParseError::MissingPrefix(_))
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<IpNetwork>(),
            Err(NetworkParseError::PrefixOutOfRange { .. })
        ));
        assert!("nope/24".parse::<IpInterface>().is_err());
    }
}
