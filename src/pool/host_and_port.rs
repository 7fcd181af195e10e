use crate::WireError;

/// Port assumed when an address string names only a host.
pub const DEFAULT_PORT: u16 = 20017;

/// Hashable identity of a remote endpoint; keys the pool map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for HostAndPort {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, WireError> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(WireError::BadValue(format!("empty host in \"{s}\"")));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|e| WireError::BadValue(format!("bad port in \"{s}\": {e}")))?;
                Ok(Self::new(host, port))
            }
            None if s.is_empty() => Err(WireError::BadValue("empty host".to_owned())),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}
