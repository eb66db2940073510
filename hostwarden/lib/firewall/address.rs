use std::{
    fmt::{self, Display},
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;

use crate::{HostwardenError, HostwardenResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static SOURCE_ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(/([0-9]|[1-2][0-9]|3[0-2]))?$",
    )
    .expect("source address pattern is valid")
});

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An IPv4 address or CIDR block accepted by the firewall.
///
/// Only strict dotted quads are accepted, optionally followed by a `/0` to `/32` prefix. The
/// address is kept exactly as written, so `10.0.0.5` and `10.0.0.5/32` are different sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SourceAddress(String);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SourceAddress {
    /// Validates `value` as an IPv4 address or CIDR block.
    pub fn parse(value: &str) -> HostwardenResult<Self> {
        if SOURCE_ADDRESS_PATTERN.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(HostwardenError::InvalidInput(format!(
                "invalid IPv4 address or CIDR block: {value:?}"
            )))
        }
    }

    /// Validates `value` as a single host address, as temporary grants require.
    pub fn parse_host(value: &str) -> HostwardenResult<Self> {
        let address = Self::parse(value)?;
        if address.is_block() {
            return Err(HostwardenError::InvalidInput(format!(
                "temporary access is limited to a single host, got {value:?}"
            )));
        }
        Ok(address)
    }

    /// Whether the address carries a prefix length.
    pub fn is_block(&self) -> bool {
        self.0.contains('/')
    }

    /// The address as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SourceAddress {
    type Err = HostwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for SourceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
