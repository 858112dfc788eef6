//! Startup preparation: everything the listener needs is built here, once,
//! before a socket is bound.

use crate::config::Config;
use crate::env::Environment;
use crate::error::{ConfigParseError, StartupError, TemplateRenderError};
use crate::proxy::{BearerToken, ProxyHandler, ServiceRoute, TrustManager};
use crate::registry::ServiceRegistry;
use crate::resolver::{split_host_port, HostLookup, HostResolver, ResolvedHost};
use crate::server::RequestHandler;
use crate::templates::ConfigTemplate;
use rustls::ClientConfig;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Gateway {
    routes: Vec<ServiceRoute>,
    client_tls: Arc<ClientConfig>,
    bearer_token: Option<BearerToken>,
    templates: Vec<ConfigTemplate>,
}

impl Gateway {
    /// Parses declarations, resolves hosts, builds the trust pool and loads
    /// the bearer token, in that order. Nothing is written and no socket is
    /// opened.
    pub fn prepare(
        config: &Config,
        env: &dyn Environment,
        dns: &dyn HostLookup,
    ) -> Result<Self, StartupError> {
        let trust = TrustManager::new(&config.ca_certs, config.skip_cert_validation);
        Self::prepare_with(config, env, dns, trust)
    }

    pub fn prepare_with(
        config: &Config,
        env: &dyn Environment,
        dns: &dyn HostLookup,
        trust: TrustManager,
    ) -> Result<Self, StartupError> {
        let registry = ServiceRegistry::parse(&config.services, env)?;

        if let Some(static_prefix) = config.static_prefix() {
            if let Some(mapping) = registry
                .mappings()
                .iter()
                .find(|mapping| mapping.prefix == static_prefix)
            {
                return Err(ConfigParseError::StaticPrefixCollision(mapping.prefix.clone()).into());
            }
        }

        let templates = config
            .config_files
            .iter()
            .map(|declaration| ConfigTemplate::parse(declaration, env))
            .collect::<Result<Vec<_>, _>>()?;

        let resolver = HostResolver::new(dns, env);
        let mut routes = Vec::with_capacity(registry.len());

        for mapping in registry.mappings() {
            info!(
                "Creating service proxy: {} => {}",
                mapping.prefix, mapping.target
            );

            let host_port = mapping.host_port();
            let backend = match resolver.resolve(&host_port) {
                Ok(resolved) => resolved,
                Err(e) if config.fail_on_unknown_services => return Err(e.into()),
                Err(e) => {
                    warn!("{}", e);
                    let (host, port) = split_host_port(&host_port);
                    ResolvedHost::new(host, port)
                }
            };

            routes.push(ServiceRoute::new(mapping, backend));
        }

        let client_tls = trust.build()?;

        let bearer_token = config
            .bearer_token_file
            .as_deref()
            .map(BearerToken::load)
            .transpose()?;

        if bearer_token.is_some() {
            info!("Bearer token will be sent to services");
        }

        Ok(Self {
            routes,
            client_tls,
            bearer_token,
            templates,
        })
    }

    pub fn routes(&self) -> &[ServiceRoute] {
        &self.routes
    }

    pub fn templates(&self) -> &[ConfigTemplate] {
        &self.templates
    }

    /// Renders every declared config template in declaration order.
    pub fn materialize_templates(&self, env: &dyn Environment) -> Result<(), TemplateRenderError> {
        for template in &self.templates {
            template.materialize(env)?;
        }
        Ok(())
    }

    pub fn into_request_handler(self, config: &Config) -> RequestHandler {
        let proxy = ProxyHandler::new(self.routes, self.client_tls, self.bearer_token);
        RequestHandler::new(config, proxy)
    }
}
