//! Mapping contract checks run against every embedded backend.
//!
//! Each backend must satisfy the same observable behaviour:
//! - set/at round-trips, overwrite, and idempotent delete
//! - len tracks distinct live keys
//! - iteration yields every entry once
//! - every operation fails with `ConnectorClosed` after close

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use preserve::{Connector, Lifecycle, Mapping, PreserveError, Value};
use tempfile::{tempdir, TempDir};

/// Opens a fresh connector of each available embedded backend.
fn fresh_connectors() -> Vec<(Box<dyn Connector>, Option<TempDir>)> {
    #[allow(unused_mut)]
    let mut connectors: Vec<(Box<dyn Connector>, Option<TempDir>)> =
        vec![(preserve::from_uri("memory:").unwrap(), None)];

    #[cfg(feature = "shelf")]
    {
        let dir = tempdir().unwrap();
        let uri = format!("shelf://{}", dir.path().join("contract.shelf").display());
        connectors.push((preserve::from_uri(&uri).unwrap(), Some(dir)));

        let dir = tempdir().unwrap();
        let uri = format!(
            "shelf://{}?writeback=true&protocol=1",
            dir.path().join("contract.shelf").display()
        );
        connectors.push((preserve::from_uri(&uri).unwrap(), Some(dir)));
    }

    #[cfg(feature = "sqlite")]
    {
        let dir = tempdir().unwrap();
        let uri = format!("sqlite://{}", dir.path().join("contract.db").display());
        connectors.push((preserve::from_uri(&uri).unwrap(), Some(dir)));
    }

    connectors
}

fn sample_document() -> Value {
    Value::object([
        ("name", Value::from("ada")),
        ("born", Value::from(1815)),
        ("ratio", Value::from(0.5)),
        ("alive", Value::from(false)),
        ("tags", Value::Array(vec![Value::from("math"), Value::Null])),
        (
            "noted",
            Value::from(Utc.with_ymd_and_hms(1843, 7, 10, 12, 0, 0).unwrap()),
        ),
    ])
}

#[test]
fn test_set_then_at_returns_value() {
    for (mut c, _dir) in fresh_connectors() {
        let scheme = c.scheme();
        c.set("doc", sample_document()).unwrap();
        c.set("scalar", Value::from("text")).unwrap();

        assert_eq!(c.at("doc").unwrap(), sample_document(), "{scheme}");
        assert_eq!(c.at("scalar").unwrap(), Value::from("text"), "{scheme}");
        assert!(c.contains("doc").unwrap(), "{scheme}");
        c.close().unwrap();
    }
}

#[test]
fn test_overwrite_keeps_one_entry() {
    for (mut c, _dir) in fresh_connectors() {
        c.set("k", Value::from(1)).unwrap();
        c.set("k", Value::from(2)).unwrap();
        assert_eq!(c.at("k").unwrap(), Value::Int(2), "{}", c.scheme());
        assert_eq!(c.len().unwrap(), 1, "{}", c.scheme());
    }
}

#[test]
fn test_missing_key_lookups() {
    for (c, _dir) in fresh_connectors() {
        assert_eq!(c.get("nope").unwrap(), None);
        assert_eq!(c.get_or("nope", Value::from(7)).unwrap(), Value::Int(7));
        let err = c.at("nope").unwrap_err();
        assert!(
            matches!(err, PreserveError::KeyNotFound { ref key } if key == "nope"),
            "{}: {err}",
            c.scheme()
        );
    }
}

#[test]
fn test_delete_is_idempotent() {
    for (mut c, _dir) in fresh_connectors() {
        c.set("a", Value::from(1)).unwrap();
        c.set("b", Value::from(2)).unwrap();

        c.delete("a").unwrap();
        c.delete("a").unwrap();
        c.delete("never-set").unwrap();

        assert!(!c.contains("a").unwrap());
        assert_eq!(c.len().unwrap(), 1, "{}", c.scheme());
    }
}

#[test]
fn test_len_counts_distinct_live_keys() {
    for (mut c, _dir) in fresh_connectors() {
        assert!(c.is_empty().unwrap());
        for i in 0..20 {
            c.set(&format!("k{}", i % 10), Value::from(i)).unwrap();
        }
        c.delete("k3").unwrap();
        assert_eq!(c.len().unwrap(), 9, "{}", c.scheme());
    }
}

#[test]
fn test_iteration_yields_every_entry_once() {
    for (mut c, _dir) in fresh_connectors() {
        let mut expected = BTreeMap::new();
        for i in 0..25 {
            let key = format!("key-{i:02}");
            c.set(&key, Value::from(i)).unwrap();
            expected.insert(key, Value::from(i));
        }

        let seen: BTreeMap<String, Value> = c.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(seen, expected, "{}", c.scheme());

        // Iterating again starts over.
        assert_eq!(c.iter().unwrap().count(), 25, "{}", c.scheme());
    }
}

#[test]
fn test_unicode_keys() {
    for (mut c, _dir) in fresh_connectors() {
        c.set("clé ☃", Value::from(1)).unwrap();
        assert_eq!(c.keys().unwrap(), vec!["clé ☃".to_string()], "{}", c.scheme());
    }
}

#[test]
fn test_closed_connector_rejects_operations() {
    for (mut c, _dir) in fresh_connectors() {
        c.set("k", Value::from(1)).unwrap();
        c.close().unwrap();
        c.close().unwrap();

        assert!(c.is_closed());
        assert!(c.set("k", Value::Null).unwrap_err().is_closed(), "{}", c.scheme());
        assert!(c.at("k").unwrap_err().is_closed(), "{}", c.scheme());
        assert!(c.contains("k").unwrap_err().is_closed(), "{}", c.scheme());
        assert!(c.delete("k").unwrap_err().is_closed(), "{}", c.scheme());
        assert!(c.len().unwrap_err().is_closed(), "{}", c.scheme());
        assert!(c.sync().unwrap_err().is_closed(), "{}", c.scheme());
    }
}

#[test]
fn test_scoped_closes_connector() {
    let connector = preserve::backends::MemoryConnector::new();
    let seen = preserve::scoped(connector, |c| {
        c.set("k", Value::from(1))?;
        c.len()
    })
    .unwrap();
    assert_eq!(seen, 1);
}
