//! Pluggable URL resolution: per-scheme functions turning one URL into a
//! set of canonical URLs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::net::SocketAddress;
use crate::util::Url;

/// A resolution function for one scheme.
///
/// Takes the API instance, the result set to add to, and the URL to
/// resolve. A single input URL may resolve to several output URLs, e.g. a
/// host name to multiple IPv4 and IPv6 addresses. Returns
/// [`Error::InvalidValue`] when the input URL is missing the part to
/// resolve; a URL that is already canonical simply resolves to itself.
pub type ResolutionFn = Arc<dyn Fn(&Api, &mut BTreeSet<Url>, &Url) -> Result<()> + Send + Sync>;

/// Scheme-keyed registry of resolution functions.
///
/// In principle this is broader than resolving host names to IP addresses,
/// though in practice that is the most used case. Like the connector
/// registry, the mapping is append-only for the lifetime of the process.
///
/// The built-in IP schemes come with a literal-address function: URLs whose
/// authority already is an IP address resolve to themselves, anything else
/// is refused, since actual name lookup is left to user-registered
/// functions. The path-style and anonymous schemes resolve to themselves
/// unconditionally.
pub struct Resolver {
    functions: HashMap<String, ResolutionFn>,
}

fn literal_ip(_: &Api, results: &mut BTreeSet<Url>, query: &Url) -> Result<()> {
    if query.authority.is_empty() {
        return Err(Error::InvalidValue);
    }
    SocketAddress::parse(&query.authority)?;
    results.insert(query.clone());
    Ok(())
}

fn identity(_: &Api, results: &mut BTreeSet<Url>, query: &Url) -> Result<()> {
    results.insert(query.clone());
    Ok(())
}

impl Resolver {
    pub(crate) fn new() -> Resolver {
        let mut resolver = Resolver {
            functions: HashMap::new(),
        };

        for scheme in ["tcp4", "tcp6", "tcp", "udp4", "udp6", "udp"] {
            resolver
                .register_resolution_function(scheme, Arc::new(literal_ip))
                .expect("built-in resolution function registered twice");
        }
        for scheme in ["local", "pipe", "fifo", "anon"] {
            resolver
                .register_resolution_function(scheme, Arc::new(identity))
                .expect("built-in resolution function registered twice");
        }

        resolver
    }

    /// Registers a resolution function for a scheme.
    ///
    /// Fails with [`Error::InvalidValue`] if the scheme is empty or already
    /// has a function; the built-in schemes count as registered. There is
    /// no deregistration.
    pub fn register_resolution_function(
        &mut self,
        scheme: &str,
        function: ResolutionFn,
    ) -> Result<()> {
        if scheme.is_empty() {
            return Err(Error::InvalidValue);
        }
        let key = scheme.to_lowercase();
        if self.functions.contains_key(&key) {
            return Err(Error::InvalidValue);
        }

        self.functions.insert(key, function);
        Ok(())
    }

    pub(crate) fn function_for(&self, scheme: &str) -> Option<ResolutionFn> {
        self.functions.get(&scheme.to_lowercase()).cloned()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("Resolver").field("schemes", &schemes).finish()
    }
}
