use crate::logging::AccessLogFormat;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

#[cfg(test)]
mod tests;

/// Every startup option, parsed once from the command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "kuisp")]
#[command(about = "Serves static content and reverse proxies to services")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 80)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Directory to serve static content from
    #[arg(short, long, default_value = ".")]
    pub www: PathBuf,

    /// URL prefix static content is served under
    #[arg(long, default_value = "/")]
    pub www_prefix: String,

    /// Serve static content
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub serve_www: bool,

    /// Default page to send if the requested page is not found
    #[arg(short, long)]
    pub default_page: Option<String>,

    /// Cache-Control max-age for static content, e.g. 24h
    #[arg(long)]
    pub max_age: Option<humantime::Duration>,

    /// Service to proxy, as <prefix>=<url>
    #[arg(short, long = "service")]
    pub services: Vec<String>,

    /// Config template to render, as <template>=<output>
    #[arg(short = 'c', long = "config-file")]
    pub config_files: Vec<String>,

    /// Extra CA certificate (PEM) trusted for backend connections
    #[arg(long = "ca-cert")]
    pub ca_certs: Vec<PathBuf>,

    /// TLS certificate for the listener
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key for the listener
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Don't validate backend TLS certificates
    #[arg(long)]
    pub skip_cert_validation: bool,

    /// Write an access log line per request to stdout
    #[arg(short = 'l', long)]
    pub access_logging: bool,

    #[arg(long, value_enum, default_value_t = AccessLogFormat::Combined)]
    pub access_log_format: AccessLogFormat,

    /// Compress static responses
    #[arg(long)]
    pub compress: bool,

    /// Refuse to start when a service host can't be resolved
    #[arg(long)]
    pub fail_on_unknown_services: bool,

    /// File holding a bearer token sent to services lacking Authorization
    #[arg(long)]
    pub bearer_token_file: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Log in JSON
    #[arg(long)]
    pub log_json: bool,

    /// Check the configuration and exit
    #[arg(long)]
    pub test_config: bool,
}

impl Config {
    /// The default page as a file name under the static root. A leading
    /// `/` is dropped, so `/index.html` and `index.html` name the same file.
    pub fn default_page_name(&self) -> Option<&str> {
        self.default_page
            .as_deref()
            .map(|page| page.trim_start_matches('/'))
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_address()?;

        if !self.www_prefix.starts_with('/') {
            return Err(anyhow::anyhow!(
                "www prefix '{}' must start with '/'",
                self.www_prefix
            ));
        }

        if let Some(ref page) = self.default_page {
            let name = page.trim_start_matches('/');
            if name.is_empty() || name.contains('/') {
                return Err(anyhow::anyhow!(
                    "default page '{}' must be a plain file name",
                    page
                ));
            }
        }

        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) => return Err(anyhow::anyhow!("--tls-cert requires --tls-key")),
            (None, Some(_)) => return Err(anyhow::anyhow!("--tls-key requires --tls-cert")),
            _ => {}
        }

        Ok(())
    }

    pub fn listen_address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// The static prefix, when static content is being served.
    pub fn static_prefix(&self) -> Option<&str> {
        self.serve_www.then_some(self.www_prefix.as_str())
    }
}
