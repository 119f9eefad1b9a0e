//! Address parsing and the configuration option set.

use std::str::FromStr;

use crate::error::{Error, ErrorKind};

/// Which of the four wire implementations an address/endpoint uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
    Ipc,
    Inproc,
}

/// A parsed `scheme://body` endpoint address.
///
/// `tcp://host:port`, `udp://host:port`, `ipc://path`, `inproc://name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub kind: TransportKind,
    /// host:port for tcp/udp, filesystem path for ipc, registry name for inproc.
    pub body: String,
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (scheme, body) = raw.split_once("://").ok_or_else(|| {
            Error::new(ErrorKind::InvalidParam, format!("address '{raw}' is missing a scheme"))
        })?;
        if body.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParam, format!("address '{raw}' has an empty body")));
        }
        let kind = match scheme {
            "tcp" => TransportKind::Tcp,
            "udp" => TransportKind::Udp,
            "ipc" => TransportKind::Ipc,
            "inproc" => TransportKind::Inproc,
            other => {
                return Err(Error::new(ErrorKind::InvalidParam, format!("unknown transport scheme '{other}'")))
            }
        };
        if matches!(kind, TransportKind::Tcp | TransportKind::Udp) {
            validate_host_port(raw, body)?;
        }
        Ok(Self { kind, body: body.to_string() })
    }
}

fn validate_host_port(raw: &str, body: &str) -> Result<(), Error> {
    let (_host, port) = body.rsplit_once(':').ok_or_else(|| {
        Error::new(ErrorKind::InvalidParam, format!("address '{raw}' is missing a port"))
    })?;
    let port: u16 = u16::from_str(port)
        .map_err(|_| Error::new(ErrorKind::InvalidParam, format!("address '{raw}' has an invalid port")))?;
    if port == 0 {
        return Err(Error::new(ErrorKind::InvalidParam, format!("address '{raw}' has port 0")));
    }
    Ok(())
}

/// Whether an endpoint is for request/response RPC or broadcast pub/sub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommType {
    RequestResponse,
    Broadcast,
}

/// Advisory send-coalescing hint; the transport layer treats this as a hint,
/// never a correctness requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceMode {
    LowLatency,
    HighThroughput,
}

/// The full configuration option set. `reactor` is deliberately
/// not part of this struct: it is supplied separately as a `Reactor`/
/// `ReactorHandle` the way every other component takes one.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: Option<Address>,
    pub transport: Option<TransportKind>,
    pub comm_type: CommType,
    pub performance_mode: PerformanceMode,
    pub pool_size: usize,
    pub max_concurrent: usize,
    pub max_pending_callbacks: usize,
    pub timeout_ms: u64,
    pub msgid_offset: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: None,
            transport: None,
            comm_type: CommType::RequestResponse,
            performance_mode: PerformanceMode::LowLatency,
            pool_size: 4,
            max_concurrent: 64,
            max_pending_callbacks: 1024,
            timeout_ms: 5_000,
            msgid_offset: 0,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The effective transport kind: explicit `transport`, else derived from
    /// `address`'s scheme.
    pub fn resolved_transport(&self) -> Result<TransportKind, Error> {
        if let Some(t) = self.transport {
            return Ok(t);
        }
        self.address
            .as_ref()
            .map(|a| a.kind)
            .ok_or_else(|| Error::new(ErrorKind::InvalidParam, "no transport and no address to derive one from"))
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.max_pending_callbacks.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidParam,
                format!("max_pending_callbacks ({}) must be a power of two", self.max_pending_callbacks),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    pub fn address(mut self, addr: &str) -> Result<Self, Error> {
        self.inner.address = Some(Address::parse(addr)?);
        Ok(self)
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.inner.transport = Some(kind);
        self
    }

    pub fn comm_type(mut self, comm_type: CommType) -> Self {
        self.inner.comm_type = comm_type;
        self
    }

    pub fn performance_mode(mut self, mode: PerformanceMode) -> Self {
        self.inner.performance_mode = mode;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.inner.pool_size = n;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.inner.max_concurrent = n;
        self
    }

    pub fn max_pending_callbacks(mut self, n: usize) -> Self {
        self.inner.max_pending_callbacks = n;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.inner.timeout_ms = ms;
        self
    }

    pub fn msgid_offset(mut self, offset: u32) -> Self {
        self.inner.msgid_offset = offset;
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_four_schemes() {
        assert_eq!(Address::parse("tcp://127.0.0.1:5555").unwrap().kind, TransportKind::Tcp);
        assert_eq!(Address::parse("udp://127.0.0.1:5556").unwrap().kind, TransportKind::Udp);
        assert_eq!(Address::parse("ipc:///tmp/sock").unwrap().kind, TransportKind::Ipc);
        assert_eq!(Address::parse("inproc://bus-name").unwrap().kind, TransportKind::Inproc);
    }

    #[test]
    fn missing_scheme_is_invalid_param() {
        let err = Address::parse("127.0.0.1:5555").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn tcp_without_port_is_rejected() {
        let err = Address::parse("tcp://127.0.0.1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn max_pending_callbacks_must_be_power_of_two() {
        let err = Config::builder().max_pending_callbacks(100).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert!(Config::builder().max_pending_callbacks(128).build().is_ok());
    }

    #[test]
    fn transport_is_derived_from_address_when_unset() {
        let cfg = Config::builder().address("udp://127.0.0.1:9").unwrap().build().unwrap();
        assert_eq!(cfg.resolved_transport().unwrap(), TransportKind::Udp);
    }
}
