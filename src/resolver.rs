//! Startup-time validation of backend hosts.
//!
//! A host is accepted when it is an IP literal, when DNS knows it, or when it
//! is a short service name published through `<NAME>_SERVICE_HOST` and
//! `<NAME>_SERVICE_PORT`. A DNS hit keeps the original hostname so that
//! request-time dialing resolves the name again.

use crate::env::Environment;
use crate::error::ResolutionError;
use std::fmt;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use tracing::debug;

pub trait HostLookup {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Blocking lookup through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDns;

impl HostLookup for SystemDns {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = (host, 0).to_socket_addrs()?.map(|a| a.ip()).collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        Ok(addrs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub host: String,
    pub port: Option<String>,
}

impl ResolvedHost {
    pub fn new(host: impl Into<String>, port: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host[:port]` suitable for a URI authority, with IPv6 bracketed.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match &self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }
}

impl fmt::Display for ResolvedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

pub struct HostResolver<'a> {
    dns: &'a dyn HostLookup,
    env: &'a dyn Environment,
}

impl<'a> HostResolver<'a> {
    pub fn new(dns: &'a dyn HostLookup, env: &'a dyn Environment) -> Self {
        Self { dns, env }
    }

    pub fn resolve(&self, host_port: &str) -> Result<ResolvedHost, ResolutionError> {
        let (host, port) = split_host_port(host_port);

        if host.parse::<IpAddr>().is_ok() {
            return Ok(ResolvedHost::new(host, port));
        }

        match self.dns.lookup(&host) {
            Ok(_) => return Ok(ResolvedHost::new(host, port)),
            Err(e) => debug!("DNS lookup for {} failed: {}", host, e),
        }

        if host.contains('.') {
            return Err(ResolutionError { host });
        }

        let name = service_env_name(&host);
        let service_host = self.env.var(&format!("{}_SERVICE_HOST", name));
        match service_host {
            Some(ip) if ip.parse::<IpAddr>().is_ok() => {
                let service_port = self
                    .env
                    .var(&format!("{}_SERVICE_PORT", name))
                    .filter(|p| !p.is_empty())
                    .or(port);
                debug!("Resolved {} through {}_SERVICE_HOST", host, name);
                Ok(ResolvedHost::new(ip, service_port))
            }
            _ => Err(ResolutionError { host }),
        }
    }
}

/// `my-service` becomes `MY_SERVICE`.
pub fn service_env_name(host: &str) -> String {
    host.to_uppercase().replace('-', "_")
}

/// Splits `host[:port]`, accepting bracketed IPv6 and bare IPv6 without a port.
pub fn split_host_port(host_port: &str) -> (String, Option<String>) {
    if let Some(rest) = host_port.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').filter(|p| !p.is_empty());
            return (host.to_string(), port.map(str::to_string));
        }
    }

    match host_port.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            let port = Some(port.to_string()).filter(|p| !p.is_empty());
            (host.to_string(), port)
        }
        _ => (host_port.to_string(), None),
    }
}
