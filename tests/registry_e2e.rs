//! End-to-end dispatch through the global and explicit registries.

use preserve::backends::MemoryConnector;
use preserve::{
    BackendDescriptor, Connector, Lifecycle, Mapping, Params, Plugin, PreserveError, Registry,
    Value,
};

#[test]
fn test_memory_uri_resolves() {
    let connector = preserve::from_uri("memory:").unwrap();
    assert_eq!(connector.scheme(), "memory");
    assert!(!connector.is_closed());
}

#[test]
fn test_unknown_scheme() {
    let err = preserve::from_uri("bogus://x").unwrap_err();
    assert!(matches!(err, PreserveError::UnknownBackend { ref scheme } if scheme == "bogus"));
    assert!(err.is_configuration());
}

#[test]
fn test_uri_without_scheme() {
    let err = preserve::from_uri("just-a-path.db").unwrap_err();
    assert!(matches!(err, PreserveError::InvalidUri { .. }));
}

#[test]
fn test_open_by_name_with_params() {
    let mut connector =
        preserve::open("memory", Params::from([("keyencoding", "utf-16be")])).unwrap();
    connector.set("k", Value::from(true)).unwrap();
    assert_eq!(connector.keys().unwrap(), vec!["k".to_string()]);

    let err = preserve::open("memory", Params::from([("nonsense", "1")])).unwrap_err();
    assert!(matches!(err, PreserveError::InvalidConfiguration { .. }));
}

#[test]
fn test_connectors_lists_bundled_backends() {
    let listed = preserve::connectors();
    let schemes: Vec<&str> = listed.iter().map(|d| d.scheme).collect();
    assert!(schemes.contains(&"memory"));
    #[cfg(feature = "shelf")]
    assert!(schemes.contains(&"shelf"));
    #[cfg(feature = "sqlite")]
    {
        assert!(schemes.contains(&"sqlite"));
        // Aliases route but are not listed separately.
        assert!(!schemes.contains(&"file"));
        assert!(Registry::global().is_registered("file"));
    }
    #[cfg(feature = "mongodb")]
    assert!(schemes.contains(&"mongodb"));

    for descriptor in &listed {
        assert!(!descriptor.description.is_empty(), "{}", descriptor.scheme);
    }
}

#[cfg(feature = "shelf")]
#[test]
fn test_required_parameter_missing() {
    let err = preserve::open("shelf", Params::new()).unwrap_err();
    assert!(
        matches!(err, PreserveError::MissingConfiguration { ref field, .. } if field == "filename")
    );
}

#[cfg(feature = "sqlite")]
#[test]
fn test_scheme_mismatch_on_typed_constructor() {
    use preserve::backends::SqliteConnector;
    use preserve::Backend;

    let err = SqliteConnector::from_uri("memory:").unwrap_err();
    assert!(matches!(err, PreserveError::InvalidUri { .. }));
}

struct Namespaced;

impl Plugin for Namespaced {
    fn name(&self) -> &str {
        "namespaced"
    }

    fn register(&self, registry: &Registry) -> preserve::Result<()> {
        registry.register_as("scratch", BackendDescriptor::of::<MemoryConnector>());
        Ok(())
    }
}

#[test]
fn test_injected_registry_with_plugin() {
    let registry = Registry::builder().plugin(Namespaced).build();
    assert!(registry.is_registered("scratch"));
    assert!(!Registry::global().is_registered("scratch"));

    let value = registry
        .with_uri("memory:", |c| {
            c.set("k", Value::from("v"))?;
            c.at("k")
        })
        .unwrap();
    assert_eq!(value, Value::from("v"));

    let scheme = registry
        .with_uri("scratch:", |c| {
            c.set("n", Value::from(2))?;
            assert_eq!(c.at("n")?, Value::Int(2));
            Ok(c.scheme().to_string())
        })
        .unwrap();
    assert_eq!(scheme, "memory");
}

#[test]
fn test_register_takes_effect_immediately() {
    let registry = Registry::empty();
    assert!(matches!(
        registry.from_uri("memory:"),
        Err(PreserveError::UnknownBackend { .. })
    ));
    registry.register_backend::<MemoryConnector>();
    let connector: Box<dyn Connector> = registry.from_uri("memory:").unwrap();
    assert!(connector.identity().starts_with("memory:#"));
}
