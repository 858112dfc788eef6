use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A malformed `--service`, `--config-file` or related declaration.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    #[error("invalid service definition '{0}': expected <prefix>=<url>")]
    InvalidServiceDefinition(String),

    #[error("invalid service URL '{url}': {reason}")]
    InvalidServiceUrl { url: String, reason: String },

    #[error("invalid service prefix '{0}': must start with '/'")]
    InvalidPrefix(String),

    #[error("duplicate service prefix '{0}'")]
    DuplicatePrefix(String),

    #[error("service prefix '{0}' collides with the static content prefix")]
    StaticPrefixCollision(String),

    #[error("invalid config definition '{0}': expected <template>=<output>")]
    InvalidConfigDefinition(String),
}

#[derive(Debug, Error)]
pub enum CertificateLoadError {
    #[error("couldn't read certificate file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't load PEM data from {}: {reason}", path.display())]
    InvalidPem { path: PathBuf, reason: String },

    #[error("no private key found in {}", .0.display())]
    MissingPrivateKey(PathBuf),

    #[error("failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// The host is not an IP literal, not resolvable through DNS and not published
/// through the `<NAME>_SERVICE_HOST` environment convention.
#[derive(Debug, Error)]
#[error("unknown service host: {host}")]
pub struct ResolutionError {
    pub host: String,
}

#[derive(Debug, Error)]
pub enum BearerTokenError {
    #[error("couldn't read bearer token file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bearer token file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("bearer token in {} is not a valid header value", .0.display())]
    InvalidHeaderValue(PathBuf),
}

#[derive(Debug, Error)]
pub enum TemplateRenderError {
    #[error("couldn't read template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unterminated action at offset {0}")]
    Unterminated(usize),

    #[error("unsupported template action '{0}'")]
    UnsupportedAction(String),
}

/// Any condition that must stop the process before it starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    ConfigParse(#[from] ConfigParseError),

    #[error(transparent)]
    CertificateLoad(#[from] CertificateLoadError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    BearerToken(#[from] BearerTokenError),

    #[error(transparent)]
    TemplateRender(#[from] TemplateRenderError),
}

/// A single forwarded request failed. Never fatal to the process.
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("invalid backend URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: hyper::http::uri::InvalidUri,
    },

    #[error("backend request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}
