use crate::env::{expand, Environment};
use crate::error::ConfigParseError;
use std::collections::HashSet;
use url::Url;

/// One `<prefix>=<url>` service declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMapping {
    pub prefix: String,
    pub target: Url,
}

impl ServiceMapping {
    pub fn parse(declaration: &str, env: &dyn Environment) -> Result<Self, ConfigParseError> {
        let (prefix, target) = declaration
            .split_once('=')
            .filter(|(prefix, target)| !prefix.is_empty() && !target.is_empty())
            .ok_or_else(|| ConfigParseError::InvalidServiceDefinition(declaration.to_string()))?;

        let prefix = expand(prefix, env);
        let target = expand(target, env);

        if !prefix.starts_with('/') {
            return Err(ConfigParseError::InvalidPrefix(prefix));
        }

        let url = Url::parse(&target).map_err(|e| ConfigParseError::InvalidServiceUrl {
            url: target.clone(),
            reason: e.to_string(),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigParseError::InvalidServiceUrl {
                url: target,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if !url.has_host() {
            return Err(ConfigParseError::InvalidServiceUrl {
                url: target,
                reason: "missing host".to_string(),
            });
        }

        Ok(Self {
            prefix,
            target: url,
        })
    }

    /// The `host[:port]` part of the target, as it would be dialed.
    pub fn host_port(&self) -> String {
        let host = self.target.host_str().unwrap_or_default();
        match self.target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

/// The immutable, declaration-ordered set of service mappings.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    mappings: Vec<ServiceMapping>,
}

impl ServiceRegistry {
    pub fn parse<S: AsRef<str>>(
        declarations: &[S],
        env: &dyn Environment,
    ) -> Result<Self, ConfigParseError> {
        let mut seen = HashSet::new();
        let mut mappings = Vec::with_capacity(declarations.len());

        for declaration in declarations {
            let mapping = ServiceMapping::parse(declaration.as_ref(), env)?;
            if !seen.insert(mapping.prefix.clone()) {
                return Err(ConfigParseError::DuplicatePrefix(mapping.prefix));
            }
            mappings.push(mapping);
        }

        Ok(Self { mappings })
    }

    pub fn mappings(&self) -> &[ServiceMapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }
}
