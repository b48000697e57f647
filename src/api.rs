use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use crate::connector::{
    anon::AnonConnector, fifo::FifoConnector, local::LocalConnector, tcp::TcpConnector,
    udp::UdpConnector, ConnectorOptions, ConnectorType,
};
use crate::error::{Error, Result};
use crate::net::SocketAddress;
use crate::registry::{OptionMapper, Registry, SchemeFactory, SchemeInfo};
use crate::resolver::{ResolutionFn, Resolver};
use crate::util::Url;

#[derive(Clone, Copy, PartialEq, Eq)]
enum IpFamily {
    V4,
    V6,
    Any,
}

fn ip_address_from(url: &Url, family: IpFamily) -> Result<SocketAddress> {
    if url.authority.is_empty() {
        return Err(Error::InvalidValue);
    }
    let addr = SocketAddress::parse(&url.authority)?;
    let matches = match (&addr, family) {
        (SocketAddress::Inet4(_), IpFamily::V4 | IpFamily::Any) => true,
        (SocketAddress::Inet6(_), IpFamily::V6 | IpFamily::Any) => true,
        _ => false,
    };
    if !matches {
        return Err(Error::InvalidValue);
    }
    Ok(addr)
}

fn path_address_from(url: &Url) -> Result<SocketAddress> {
    if url.path.is_empty() {
        return Err(Error::InvalidValue);
    }
    Ok(SocketAddress::from_path(&url.path))
}

fn tcp_factory(family: IpFamily) -> SchemeFactory {
    Box::new(move |url, _ctype, options| {
        let addr = ip_address_from(url, family)?;
        Ok(Box::new(TcpConnector::new(addr, options)?))
    })
}

fn udp_factory(family: IpFamily) -> SchemeFactory {
    Box::new(move |url, _ctype, options| {
        let addr = ip_address_from(url, family)?;
        Ok(Box::new(UdpConnector::new(addr, options)?))
    })
}

fn stream_info(ctype: ConnectorType, factory: SchemeFactory) -> SchemeInfo {
    SchemeInfo {
        ctype,
        default_options: ConnectorOptions::STREAM | ConnectorOptions::NON_BLOCKING,
        possible_options: ConnectorOptions::STREAM
            | ConnectorOptions::BLOCKING
            | ConnectorOptions::NON_BLOCKING,
        factory,
    }
}

fn datagram_info(ctype: ConnectorType, factory: SchemeFactory) -> SchemeInfo {
    SchemeInfo {
        ctype,
        default_options: ConnectorOptions::DATAGRAM | ConnectorOptions::NON_BLOCKING,
        possible_options: ConnectorOptions::DATAGRAM
            | ConnectorOptions::BLOCKING
            | ConnectorOptions::NON_BLOCKING,
        factory,
    }
}

/// The entry point tying the crate's pieces together: an `Api` owns the
/// [`Registry`] and is shared (as `Arc<Api>`) by connectors and schedulers.
///
/// A fresh `Api` comes with the built-in schemes registered: `tcp4`,
/// `tcp6`, `tcp`, `udp4`, `udp6`, `udp`, `local`, `pipe`, `fifo` and
/// `anon`. User schemes and query parameters are added through
/// [`Api::add_scheme`] and [`Api::add_parameter`].
pub struct Api {
    registry: RwLock<Registry>,
    resolver: RwLock<Resolver>,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api").finish_non_exhaustive()
    }
}

impl Api {
    /// Creates an API instance with the built-in schemes registered.
    pub fn new() -> Result<Arc<Api>> {
        let mut registry = Registry::new();

        registry.add_scheme("tcp4", stream_info(ConnectorType::TCP4, tcp_factory(IpFamily::V4)))?;
        registry.add_scheme("tcp6", stream_info(ConnectorType::TCP6, tcp_factory(IpFamily::V6)))?;
        registry.add_scheme("tcp", stream_info(ConnectorType::TCP, tcp_factory(IpFamily::Any)))?;

        registry.add_scheme("udp4", datagram_info(ConnectorType::UDP4, udp_factory(IpFamily::V4)))?;
        registry.add_scheme("udp6", datagram_info(ConnectorType::UDP6, udp_factory(IpFamily::V6)))?;
        registry.add_scheme("udp", datagram_info(ConnectorType::UDP, udp_factory(IpFamily::Any)))?;

        registry.add_scheme(
            "local",
            SchemeInfo {
                ctype: ConnectorType::LOCAL,
                default_options: ConnectorOptions::STREAM | ConnectorOptions::NON_BLOCKING,
                possible_options: ConnectorOptions::STREAM
                    | ConnectorOptions::DATAGRAM
                    | ConnectorOptions::BLOCKING
                    | ConnectorOptions::NON_BLOCKING,
                factory: Box::new(|url, _ctype, options| {
                    let addr = path_address_from(url)?;
                    Ok(Box::new(LocalConnector::new(addr, options)?))
                }),
            },
        )?;

        // On POSIX platforms named pipes are FIFOs; both schemes share the
        // implementation.
        for (scheme, ctype) in [("pipe", ConnectorType::PIPE), ("fifo", ConnectorType::FIFO)] {
            registry.add_scheme(
                scheme,
                stream_info(
                    ctype,
                    Box::new(|url, _ctype, options| {
                        let addr = path_address_from(url)?;
                        Ok(Box::new(FifoConnector::new(addr, options)?))
                    }),
                ),
            )?;
        }

        registry.add_scheme(
            "anon",
            stream_info(
                ConnectorType::ANON,
                Box::new(|url, _ctype, options| {
                    if !url.authority.is_empty() || !url.path.is_empty() {
                        return Err(Error::InvalidValue);
                    }
                    Ok(Box::new(AnonConnector::new(options)?))
                }),
            ),
        )?;

        Ok(Arc::new(Api {
            registry: RwLock::new(registry),
            resolver: RwLock::new(Resolver::new()),
        }))
    }

    /// Registers a user-defined connector scheme. See
    /// [`Registry::add_scheme`].
    pub fn add_scheme(&self, scheme: &str, info: SchemeInfo) -> Result<()> {
        self.registry
            .write()
            .map_err(|_| Error::Aborted)?
            .add_scheme(scheme, info)
    }

    /// Registers a user-defined query parameter mapper. See
    /// [`Registry::add_parameter`].
    pub fn add_parameter(&self, parameter: &str, mapper: OptionMapper) -> Result<()> {
        self.registry
            .write()
            .map_err(|_| Error::Aborted)?
            .add_parameter(parameter, mapper)
    }

    /// Registers a resolution function for a URL scheme. See
    /// [`Resolver::register_resolution_function`].
    pub fn add_resolution_function(&self, scheme: &str, function: ResolutionFn) -> Result<()> {
        self.resolver
            .write()
            .map_err(|_| Error::Aborted)?
            .register_resolution_function(scheme, function)
    }

    /// Resolves `query` through the function registered for its scheme,
    /// adding the outcome to `results` (the set is not cleared first).
    ///
    /// Fails with [`Error::InvalidOption`] if no function is registered
    /// for the scheme; resolution-specific errors pass through.
    pub fn resolve(&self, results: &mut BTreeSet<Url>, query: &Url) -> Result<()> {
        let function = self
            .resolver
            .read()
            .map_err(|_| Error::Aborted)?
            .function_for(&query.scheme)
            .ok_or(Error::InvalidOption)?;
        function(self, results, query)
    }

    pub(crate) fn lookup_scheme(
        &self,
        scheme: &str,
        query: &BTreeMap<String, String>,
    ) -> Result<(Arc<SchemeInfo>, ConnectorOptions)> {
        let registry = self.registry.read().map_err(|_| Error::Aborted)?;
        let info = registry
            .info_for_scheme(scheme)
            .ok_or(Error::InvalidOption)?;
        let options = registry.options_from_query(query);
        Ok((info, options))
    }
}
