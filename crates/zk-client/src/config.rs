// Client-side defaults, connect-string parsing and env/YAML overrides.
use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::time::Duration;
use zk_transport::TransportConfig;

pub const DEFAULT_PORT: u16 = 2181;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard safety cap for any single reply frame. Override with `ZK_MAX_FRAME_BYTES`.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

const SCHEME_PREFIX: &str = "zookeeper://";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub address: String,
    pub port: u16,
}

impl Host {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    ///
    /// ```
    /// use zk_client::Host;
    ///
    /// assert_eq!(Host::parse("zk1").expect("host"), Host::new("zk1", 2181));
    /// assert_eq!(Host::parse("zk1:2182").expect("host"), Host::new("zk1", 2182));
    /// assert_eq!(Host::parse("[::1]:2183").expect("host"), Host::new("::1", 2183));
    /// ```
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            bail!("empty host");
        }
        if let Some(rest) = value.strip_prefix('[') {
            let (address, tail) = rest
                .split_once(']')
                .ok_or_else(|| anyhow!("unterminated IPv6 host '{value}'"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, value)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => bail!("unexpected '{tail}' after host '{address}'"),
            };
            return Ok(Self::new(address, port));
        }
        match value.split_once(':') {
            Some((address, port)) if !address.is_empty() => {
                Ok(Self::new(address, parse_port(port, value)?))
            }
            Some(_) => bail!("missing address in host '{value}'"),
            None => Ok(Self::new(value, DEFAULT_PORT)),
        }
    }
}

fn parse_port(port: &str, host: &str) -> Result<u16> {
    port.parse::<u16>()
        .with_context(|| format!("invalid port in host '{host}'"))
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Credentials replayed on every handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthInfo {
    pub scheme: String,
    pub credentials: Bytes,
}

impl AuthInfo {
    pub fn new(scheme: impl Into<String>, credentials: impl Into<Bytes>) -> Self {
        Self {
            scheme: scheme.into(),
            credentials: credentials.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub hosts: Vec<Host>,
    /// Every path is resolved under this root before it reaches the server.
    pub root: String,
    pub auth: Vec<AuthInfo>,
    pub session_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_only: bool,
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hosts: vec![Host::new(DEFAULT_HOST, DEFAULT_PORT)],
            root: zk_wire::path::ROOT.to_string(),
            auth: Vec::new(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_only: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    connect: Option<String>,
    root: Option<String>,
    session_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
    read_only: Option<bool>,
}

impl ClientConfig {
    /// Parses `[zookeeper://]host[:port][,host[:port]...][/root][?key=value&...]`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use zk_client::ClientConfig;
    ///
    /// let config = ClientConfig::from_connect_string(
    ///     "zookeeper://a:2181,b/app?sessionTimeout=5000&auth=digest:u:p",
    /// )
    /// .expect("parse");
    /// assert_eq!(config.hosts.len(), 2);
    /// assert_eq!(config.hosts[1].port, 2181);
    /// assert_eq!(config.root, "/app");
    /// assert_eq!(config.session_timeout, Duration::from_millis(5000));
    /// assert_eq!(config.auth[0].scheme, "digest");
    /// ```
    pub fn from_connect_string(value: &str) -> Result<Self> {
        let mut config = Self::default();
        let value = value.trim();
        let value = value.strip_prefix(SCHEME_PREFIX).unwrap_or(value);
        let (location, query) = match value.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (value, None),
        };
        let (hosts, root) = match location.find('/') {
            Some(index) => (&location[..index], &location[index..]),
            None => (location, ""),
        };

        let hosts = hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(Host::parse)
            .collect::<Result<Vec<_>>>()?;
        if !hosts.is_empty() {
            config.hosts = hosts;
        }
        if !root.is_empty() {
            config.set_root(root)?;
        }

        for pair in query.into_iter().flat_map(|query| query.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("connect string parameter '{pair}' has no value"))?;
            match key {
                "sessionTimeout" => config.session_timeout = parse_millis(key, value)?,
                "connectionTimeout" => config.connect_timeout = parse_millis(key, value)?,
                "readOnly" => {
                    config.read_only = value
                        .parse::<bool>()
                        .with_context(|| format!("invalid readOnly value '{value}'"))?
                }
                "auth" => {
                    let (scheme, credentials) = value
                        .split_once(':')
                        .ok_or_else(|| anyhow!("auth must be scheme:credentials, got '{value}'"))?;
                    config
                        .auth
                        .push(AuthInfo::new(scheme, Bytes::copy_from_slice(credentials.as_bytes())));
                }
                other => tracing::warn!(key = other, "ignoring unknown connect string parameter"),
            }
        }
        Ok(config)
    }

    /// Canonical connect string for this configuration.
    pub fn to_connect_string(&self) -> String {
        let hosts = self
            .hosts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut out = format!("{SCHEME_PREFIX}{hosts}");
        if self.root != zk_wire::path::ROOT {
            out.push_str(&self.root);
        }
        out.push_str(&format!(
            "?sessionTimeout={}&connectionTimeout={}",
            self.session_timeout.as_millis(),
            self.connect_timeout.as_millis()
        ));
        if self.read_only {
            out.push_str("&readOnly=true");
        }
        for auth in &self.auth {
            out.push_str(&format!(
                "&auth={}:{}",
                auth.scheme,
                String::from_utf8_lossy(&auth.credentials)
            ));
        }
        out
    }

    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("ZK_CONNECT") {
            Ok(value) if !value.trim().is_empty() => {
                Self::from_connect_string(&value).context("parse ZK_CONNECT")?
            }
            _ => Self::default(),
        };
        if let Some(value) = read_u64_env("ZK_SESSION_TIMEOUT_MS") {
            config.session_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("ZK_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("ZK_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        if let Some(value) = read_bool_env("ZK_READ_ONLY") {
            config.read_only = value;
        }
        Ok(config)
    }

    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("ZK_CLIENT_CONFIG").ok());
        let contents = match override_path.as_deref() {
            Some(path) => match fs::read_to_string(path) {
                Ok(contents) => Some(contents),
                Err(err) => {
                    return Err(err).with_context(|| format!("read client config: {path}"));
                }
            },
            None => None,
        };
        if let Some(contents) = contents {
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config)?;
        }
        Ok(config)
    }

    pub fn with_hosts(mut self, hosts: Vec<Host>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_auth(mut self, auth: AuthInfo) -> Self {
        self.auth.push(auth);
        self
    }

    pub fn with_root(mut self, root: &str) -> Result<Self> {
        self.set_root(root)?;
        Ok(self)
    }

    fn set_root(&mut self, root: &str) -> Result<()> {
        zk_wire::path::validate(root).context("invalid root")?;
        self.root = zk_wire::path::normalize(root, "");
        Ok(())
    }

    pub(crate) fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_frame_bytes: self.max_frame_bytes,
            connect_timeout: self.connect_timeout,
            ..TransportConfig::default()
        }
    }

    /// Requested session timeout in the handshake's millisecond unit.
    pub(crate) fn session_timeout_ms(&self) -> i32 {
        i32::try_from(self.session_timeout.as_millis()).unwrap_or(i32::MAX)
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) -> Result<()> {
        if let Some(value) = &self.connect
            && !value.trim().is_empty()
        {
            let parsed = ClientConfig::from_connect_string(value).context("parse connect override")?;
            config.hosts = parsed.hosts;
            config.auth.extend(parsed.auth);
            if parsed.root != zk_wire::path::ROOT {
                config.root = parsed.root;
            }
        }
        if let Some(value) = &self.root {
            config.set_root(value)?;
        }
        if let Some(value) = self.session_timeout_ms
            && value > 0
        {
            config.session_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.connect_timeout_ms
            && value > 0
        {
            config.connect_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.max_frame_bytes
            && value > 0
        {
            config.max_frame_bytes = value;
        }
        if let Some(value) = self.read_only {
            config.read_only = value;
        }
        Ok(())
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let millis = value
        .parse::<u64>()
        .with_context(|| format!("invalid {key} value '{value}'"))?;
    Ok(Duration::from_millis(millis))
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

fn read_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: tests touching the environment are serialized.
        unsafe {
            for key in [
                "ZK_CONNECT",
                "ZK_SESSION_TIMEOUT_MS",
                "ZK_CONNECT_TIMEOUT_MS",
                "ZK_MAX_FRAME_BYTES",
                "ZK_READ_ONLY",
                "ZK_CLIENT_CONFIG",
            ] {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn empty_host_list_defaults_to_localhost() {
        let config = ClientConfig::from_connect_string("zookeeper:///app").expect("parse");
        assert_eq!(config.hosts, vec![Host::new("localhost", 2181)]);
        assert_eq!(config.root, "/app");
    }

    #[test]
    fn parses_every_parameter() {
        let config = ClientConfig::from_connect_string(
            "h1:1,h2:2,[::1]?connectionTimeout=250&readOnly=true&auth=digest:a:b&auth=ip:1.2.3.4",
        )
        .expect("parse");
        assert_eq!(
            config.hosts,
            vec![Host::new("h1", 1), Host::new("h2", 2), Host::new("::1", 2181)]
        );
        assert_eq!(config.root, "/");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
        assert!(config.read_only);
        assert_eq!(config.auth.len(), 2);
        assert_eq!(config.auth[0].credentials.as_ref(), b"a:b");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ClientConfig::from_connect_string("h1:notaport").is_err());
        assert!(ClientConfig::from_connect_string("h1/app//x").is_err());
        assert!(ClientConfig::from_connect_string("h1?sessionTimeout=abc").is_err());
        assert!(ClientConfig::from_connect_string("h1?auth=nocolon").is_err());
    }

    #[test]
    fn connect_string_round_trips() {
        let config = ClientConfig::from_connect_string(
            "zookeeper://a:2181,[::1]:2182/app/x?sessionTimeout=4000&connectionTimeout=1000&readOnly=true&auth=digest:u:p",
        )
        .expect("parse");
        let rendered = config.to_connect_string();
        assert_eq!(
            rendered,
            "zookeeper://a:2181,[::1]:2182/app/x?sessionTimeout=4000&connectionTimeout=1000&readOnly=true&auth=digest:u:p"
        );
        assert_eq!(ClientConfig::from_connect_string(&rendered).expect("reparse"), config);
    }

    #[test]
    #[serial]
    fn env_overrides_defaults() {
        clear_env();
        // SAFETY: serialized with other env tests.
        unsafe {
            std::env::set_var("ZK_CONNECT", "e1:3000/env");
            std::env::set_var("ZK_SESSION_TIMEOUT_MS", "1500");
            std::env::set_var("ZK_MAX_FRAME_BYTES", "0");
            std::env::set_var("ZK_READ_ONLY", "yes");
        }
        let config = ClientConfig::from_env().expect("env");
        assert_eq!(config.hosts, vec![Host::new("e1", 3000)]);
        assert_eq!(config.root, "/env");
        assert_eq!(config.session_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(config.read_only);
        clear_env();
    }

    #[test]
    #[serial]
    fn yaml_override_applies_after_env() {
        clear_env();
        let dir = std::env::temp_dir().join(format!("zk-client-config-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("client.yaml");
        fs::write(
            &path,
            "connect: y1:4000,y2\nsession_timeout_ms: 2000\nconnect_timeout_ms: 0\nread_only: true\n",
        )
        .expect("write yaml");
        let config =
            ClientConfig::from_env_or_yaml(Some(path.to_str().expect("utf-8 path"))).expect("yaml");
        assert_eq!(config.hosts, vec![Host::new("y1", 4000), Host::new("y2", 2181)]);
        assert_eq!(config.session_timeout, Duration::from_millis(2000));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(config.read_only);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        clear_env();
        let err = ClientConfig::from_env_or_yaml(Some("/nonexistent/zk-client.yaml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("read client config"));
    }
}
