//! Tunnel configuration and label selectors.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Remote port the device service listens on inside its pod.
pub const DEFAULT_REMOTE_PORT: u16 = 3000;

/// Labels identifying the device service pods.
pub const DEFAULT_SELECTOR: [(&str, &str); 2] = [("app", "platform"), ("name", "session-service")];

/// A set of `key=value` label constraints.
///
/// Keys are unique. The canonical string form sorts entries by key and joins
/// them with commas, e.g. `app=platform,name=session-service`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(BTreeMap<String, String>);

impl Selector {
    /// Creates an empty selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label constraint, replacing any previous value for `key`.
    ///
    /// Labels are not checked here; [`Selector::validate`] rejects the ones
    /// that cannot be expressed in the canonical form.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if the selector has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that every label survives the canonical `key=value,...` form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a key is empty or a key or value
    /// contains `,` or `=`.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(Error::InvalidArgument("selector label key must not be empty"));
            }

            if [key, value].iter().any(|s| s.contains([',', '='])) {
                return Err(Error::InvalidArgument(
                    "selector labels must not contain ',' or '='",
                ));
            }
        }

        Ok(())
    }

    /// Iterates over the constraints in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Selector
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }

            write!(f, "{key}={value}")?;
        }

        Ok(())
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut labels = BTreeMap::new();

        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(Error::Config(format!(
                    "selector entry {entry:?} is not key=value"
                )));
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(format!(
                    "selector entry {entry:?} has an empty key"
                )));
            }

            if value.contains('=') {
                return Err(Error::Config(format!(
                    "selector entry {entry:?} has more than one '='"
                )));
            }

            if labels
                .insert(key.to_string(), value.trim().to_string())
                .is_some()
            {
                return Err(Error::Config(format!(
                    "selector key {key:?} appears more than once"
                )));
            }
        }

        if labels.is_empty() {
            return Err(Error::Config("selector is empty".to_string()));
        }

        Ok(Self(labels))
    }
}

/// Configuration for locating the device service pod and forwarding to it.
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    /// Labels used to find the device service pods.
    pub selector: Selector,

    /// Port on the pod that traffic is forwarded to.
    pub remote_port: u16,

    /// Local port to listen on. `None` picks an ephemeral port.
    pub local_port: Option<u16>,

    /// Local address to listen on.
    pub bind_address: IpAddr,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            selector: DEFAULT_SELECTOR.into_iter().collect(),
            remote_port: DEFAULT_REMOTE_PORT,
            local_port: None,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl TunnelConfig {
    /// Creates a configuration with the default selector and ports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from environment variables.
    ///
    /// Unset variables keep their defaults:
    ///
    /// - `DEVICE_TUNNEL_SELECTOR`: label selector (`app=platform,name=session-service`)
    /// - `DEVICE_TUNNEL_REMOTE_PORT`: remote pod port (3000)
    /// - `DEVICE_TUNNEL_LOCAL_PORT`: local port (ephemeral)
    /// - `DEVICE_TUNNEL_BIND_ADDRESS`: local address (`127.0.0.1`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(selector) = lookup("DEVICE_TUNNEL_SELECTOR") {
            config.selector = selector.parse()?;
        }

        if let Some(port) = lookup("DEVICE_TUNNEL_REMOTE_PORT") {
            config.remote_port = parse_var("DEVICE_TUNNEL_REMOTE_PORT", &port)?;
        }

        if let Some(port) = lookup("DEVICE_TUNNEL_LOCAL_PORT") {
            config.local_port = Some(parse_var("DEVICE_TUNNEL_LOCAL_PORT", &port)?);
        }

        if let Some(addr) = lookup("DEVICE_TUNNEL_BIND_ADDRESS") {
            config.bind_address = parse_var("DEVICE_TUNNEL_BIND_ADDRESS", &addr)?;
        }

        Ok(config)
    }

    /// Sets the label selector used to find the pod.
    #[must_use]
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Sets the remote pod port.
    #[must_use]
    pub fn remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    /// Sets a fixed local port instead of an ephemeral one.
    #[must_use]
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Sets the local address to listen on.
    #[must_use]
    pub fn bind_address(mut self, addr: impl Into<IpAddr>) -> Self {
        self.bind_address = addr.into();
        self
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={value:?}: {e}")))
}
