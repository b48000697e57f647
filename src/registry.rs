//! Maps URL schemes to connector implementations and query parameters to
//! connector options.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::trace;

use crate::connector::{ConnectorImpl, ConnectorOptions, ConnectorType};
use crate::error::{Error, Result};
use crate::util::Url;

/// Creates a connector implementation for a URL. Invoked with the parsed
/// URL, the type registered for the scheme, and the fully resolved options.
pub type SchemeFactory =
    Box<dyn Fn(&Url, ConnectorType, ConnectorOptions) -> Result<Box<dyn ConnectorImpl>> + Send + Sync>;

/// Maps a query parameter value to connector options. The second argument
/// is true iff the parameter was present in the URL at all, so a mapper can
/// distinguish a missing parameter from one without a value.
pub type OptionMapper = Box<dyn Fn(&str, bool) -> ConnectorOptions + Send + Sync>;

/// What the registry stores per scheme.
pub struct SchemeInfo {
    /// The connector type to report for this scheme.
    pub ctype: ConnectorType,
    /// Options assumed when the URL does not specify them.
    pub default_options: ConnectorOptions,
    /// The options a connector of this scheme may be created with; the
    /// resolved options must be a subset.
    pub possible_options: ConnectorOptions,
    /// Creates the implementation.
    pub factory: SchemeFactory,
}

/// Process-wide extension point: scheme to implementation factory, query
/// parameter to options mapper.
///
/// Both mappings are append-only for the lifetime of the process; there is
/// no deregistration.
pub struct Registry {
    schemes: HashMap<String, Arc<SchemeInfo>>,
    parameters: Vec<(String, OptionMapper)>,
}

impl std::fmt::Debug for SchemeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeInfo")
            .field("ctype", &self.ctype)
            .field("default_options", &self.default_options)
            .field("possible_options", &self.possible_options)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.schemes.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        let parameters: Vec<&str> = self.parameters.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Registry")
            .field("schemes", &schemes)
            .field("parameters", &parameters)
            .finish()
    }
}

impl Registry {
    pub(crate) fn new() -> Registry {
        let mut registry = Registry {
            schemes: HashMap::new(),
            parameters: Vec::new(),
        };

        // Built-in parameters; user registrations see them as taken.
        registry
            .add_parameter(
                "blocking",
                Box::new(|value, found| {
                    if !found {
                        ConnectorOptions::empty()
                    } else if value == "1" {
                        ConnectorOptions::BLOCKING
                    } else {
                        ConnectorOptions::NON_BLOCKING
                    }
                }),
            )
            .expect("built-in parameter registered twice");
        registry
            .add_parameter(
                "behaviour",
                Box::new(|value, _found| match value {
                    "stream" => ConnectorOptions::STREAM,
                    "datagram" => ConnectorOptions::DATAGRAM,
                    _ => ConnectorOptions::empty(),
                }),
            )
            .expect("built-in parameter registered twice");

        registry
    }

    /// Registers a connector scheme.
    ///
    /// Fails with [`Error::InvalidValue`] if the scheme name is empty, the
    /// type is [`ConnectorType::UNSPEC`], or the scheme is already
    /// registered.
    pub fn add_scheme(&mut self, scheme: &str, info: SchemeInfo) -> Result<()> {
        if scheme.is_empty() || info.ctype == ConnectorType::UNSPEC {
            return Err(Error::InvalidValue);
        }
        let key = scheme.to_lowercase();
        if self.schemes.contains_key(&key) {
            return Err(Error::InvalidValue);
        }

        trace!("registering scheme {} as type {}", key, info.ctype);
        self.schemes.insert(key, Arc::new(info));
        Ok(())
    }

    /// Registers a query parameter mapper.
    ///
    /// Fails with [`Error::InvalidValue`] if the name is empty or already
    /// registered; the built-in `blocking` and `behaviour` parameters count
    /// as registered.
    pub fn add_parameter(&mut self, parameter: &str, mapper: OptionMapper) -> Result<()> {
        if parameter.is_empty() {
            return Err(Error::InvalidValue);
        }
        let key = parameter.to_lowercase();
        if self.parameters.iter().any(|(name, _)| *name == key) {
            return Err(Error::InvalidValue);
        }

        self.parameters.push((key, mapper));
        Ok(())
    }

    /// Looks up the info registered for a scheme.
    pub fn info_for_scheme(&self, scheme: &str) -> Option<Arc<SchemeInfo>> {
        self.schemes.get(&scheme.to_lowercase()).cloned()
    }

    /// Resolves connector options from URL query parameters.
    ///
    /// Every registered parameter's mapper is folded over the query and the
    /// results OR'd together; unrecognized parameters are ignored to keep
    /// URLs extensible. If no mapper decided on a blocking mode, the
    /// default `NON_BLOCKING` is applied.
    pub fn options_from_query(&self, query: &BTreeMap<String, String>) -> ConnectorOptions {
        let mut options = ConnectorOptions::empty();

        for (name, mapper) in &self.parameters {
            let value = query.get(name);
            options |= mapper(value.map(String::as_str).unwrap_or(""), value.is_some());
        }

        if !options.intersects(ConnectorOptions::BLOCKING_MASK) {
            options |= ConnectorOptions::NON_BLOCKING;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Accepted, ConnectorImpl};
    use crate::handle::Handle;
    use crate::net::SocketAddress;

    struct NullConnector;

    impl ConnectorImpl for NullConnector {
        fn listen(&mut self) -> Result<()> {
            Ok(())
        }
        fn listening(&self) -> bool {
            false
        }
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        fn connected(&self) -> bool {
            false
        }
        fn accept(&mut self) -> Result<Accepted> {
            Err(Error::UnsupportedAction)
        }
        fn read_handle(&self) -> Handle {
            Handle::INVALID
        }
        fn write_handle(&self) -> Handle {
            Handle::INVALID
        }
        fn read(&mut self, _: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn write(&mut self, _: &[u8]) -> Result<usize> {
            Ok(0)
        }
        fn receive(&mut self, _: &mut [u8]) -> Result<(usize, SocketAddress)> {
            Err(Error::UnsupportedAction)
        }
        fn send(&mut self, _: &[u8], _: &SocketAddress) -> Result<usize> {
            Err(Error::UnsupportedAction)
        }
        fn peek(&self) -> Result<usize> {
            Ok(0)
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_blocking(&mut self, _: bool) -> Result<()> {
            Ok(())
        }
        fn is_blocking(&self) -> bool {
            false
        }
        fn options(&self) -> ConnectorOptions {
            ConnectorOptions::NON_BLOCKING
        }
        fn address(&self) -> SocketAddress {
            SocketAddress::Unspec
        }
    }

    fn null_info(ctype: ConnectorType) -> SchemeInfo {
        SchemeInfo {
            ctype,
            default_options: ConnectorOptions::STREAM | ConnectorOptions::NON_BLOCKING,
            possible_options: ConnectorOptions::STREAM
                | ConnectorOptions::BLOCKING
                | ConnectorOptions::NON_BLOCKING,
            factory: Box::new(|_, _, _| Ok(Box::new(NullConnector))),
        }
    }

    #[test]
    fn add_scheme_validation() {
        let mut registry = Registry::new();

        assert_eq!(
            registry.add_scheme("", null_info(ConnectorType::user(0))),
            Err(Error::InvalidValue)
        );
        assert_eq!(
            registry.add_scheme("test", null_info(ConnectorType::UNSPEC)),
            Err(Error::InvalidValue)
        );

        assert!(registry
            .add_scheme("test", null_info(ConnectorType::user(0)))
            .is_ok());
        assert_eq!(
            registry.add_scheme("TEST", null_info(ConnectorType::user(1))),
            Err(Error::InvalidValue)
        );

        assert!(registry.info_for_scheme("TeSt").is_some());
        assert!(registry.info_for_scheme("unknown").is_none());
    }

    #[test]
    fn add_parameter_validation() {
        let mut registry = Registry::new();

        assert_eq!(
            registry.add_parameter("", Box::new(|_, _| ConnectorOptions::empty())),
            Err(Error::InvalidValue)
        );
        // Built-ins count as registered.
        assert_eq!(
            registry.add_parameter("blocking", Box::new(|_, _| ConnectorOptions::empty())),
            Err(Error::InvalidValue)
        );

        assert!(registry
            .add_parameter("custom", Box::new(|_, _| ConnectorOptions::USER))
            .is_ok());
        assert_eq!(
            registry.add_parameter("custom", Box::new(|_, _| ConnectorOptions::empty())),
            Err(Error::InvalidValue)
        );
    }

    #[test]
    fn options_from_query_defaults_to_non_blocking() {
        let registry = Registry::new();

        let query = BTreeMap::new();
        assert_eq!(
            registry.options_from_query(&query),
            ConnectorOptions::NON_BLOCKING
        );
    }

    #[test]
    fn options_from_query_folds_parameters() {
        let mut registry = Registry::new();
        registry
            .add_parameter(
                "custom",
                Box::new(|value, found| {
                    if found && value == "1" {
                        ConnectorOptions::USER
                    } else {
                        ConnectorOptions::empty()
                    }
                }),
            )
            .unwrap();

        let mut query = BTreeMap::new();
        query.insert("blocking".to_string(), "1".to_string());
        query.insert("custom".to_string(), "1".to_string());
        query.insert("unknown".to_string(), "whatever".to_string());

        let options = registry.options_from_query(&query);
        assert!(options.contains(ConnectorOptions::BLOCKING));
        assert!(options.contains(ConnectorOptions::USER));
        assert!(!options.contains(ConnectorOptions::NON_BLOCKING));
    }

    #[test]
    fn behaviour_parameter() {
        let registry = Registry::new();

        let mut query = BTreeMap::new();
        query.insert("behaviour".to_string(), "datagram".to_string());
        let options = registry.options_from_query(&query);
        assert!(options.contains(ConnectorOptions::DATAGRAM));
        assert!(!options.contains(ConnectorOptions::STREAM));
    }
}
