/// What a request path is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Index into the proxy handler's service routes.
    Service(usize),
    Static,
}

/// Prefix table consulted once per request. Entries are kept longest first so
/// the first match is the most specific one.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: Vec<(String, RouteTarget)>,
}

impl RoutingTable {
    pub fn new<'a>(
        service_prefixes: impl IntoIterator<Item = &'a str>,
        static_prefix: Option<&str>,
    ) -> Self {
        let mut entries: Vec<(String, RouteTarget)> = service_prefixes
            .into_iter()
            .enumerate()
            .map(|(index, prefix)| (prefix.to_string(), RouteTarget::Service(index)))
            .collect();

        if let Some(prefix) = static_prefix {
            entries.push((prefix.to_string(), RouteTarget::Static));
        }

        // Stable sort keeps declaration order among equal lengths
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self { entries }
    }

    pub fn dispatch(&self, path: &str) -> Option<RouteTarget> {
        self.entries
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, target)| *target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
