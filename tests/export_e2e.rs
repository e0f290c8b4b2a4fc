//! Export between backends.

use std::collections::BTreeMap;

use preserve::backends::MemoryConnector;
use preserve::{export, export_uris, Lifecycle, Mapping, PreserveError, Registry, Value};

fn seeded_memory() -> MemoryConnector {
    let mut source = MemoryConnector::new();
    source.set("a", Value::from(1)).unwrap();
    source.set("b", Value::from(2)).unwrap();
    source
}

#[test]
fn test_memory_to_memory_copies_and_closes() {
    let mut source = seeded_memory();
    let mut destination = MemoryConnector::new();

    let report = export(&mut source, &mut destination).unwrap();
    assert_eq!(report.copied, 2);
    assert!(source.is_closed());
    assert!(destination.is_closed());
}

#[test]
fn test_identical_uris_refused_before_opening() {
    let err = export_uris(&Registry::new(), "bogus://never-opened", "bogus://never-opened")
        .unwrap_err();
    // The URI check runs before scheme lookup would report UnknownBackend.
    assert!(matches!(err, PreserveError::InvalidArguments { .. }));
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use preserve::backends::{SqliteConfig, SqliteConnector};
    use preserve::Backend;
    use tempfile::tempdir;

    #[test]
    fn test_memory_to_sqlite_exact_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.db");
        let mut source = seeded_memory();
        let mut destination =
            SqliteConnector::open(SqliteConfig::new(path.display().to_string())).unwrap();

        let report = export(&mut source, &mut destination).unwrap();
        assert_eq!(report.copied, 2);
        assert!(destination.is_closed());

        let reopened =
            SqliteConnector::open(SqliteConfig::new(path.display().to_string())).unwrap();
        let contents: BTreeMap<String, Value> =
            reopened.iter().unwrap().map(Result::unwrap).collect();
        let expected = BTreeMap::from([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]);
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_same_resource_refused_without_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("same.db");
        let config = SqliteConfig::new(path.display().to_string());

        let mut source = SqliteConnector::open(config.clone()).unwrap();
        source.set("a", Value::from(1)).unwrap();
        let mut destination = SqliteConnector::open(config).unwrap();

        let err = export(&mut source, &mut destination).unwrap_err();
        assert!(matches!(err, PreserveError::InvalidArguments { .. }));
        assert!(!source.is_closed());
        assert_eq!(destination.len().unwrap(), 1);
    }

    #[test]
    fn test_export_uris_to_fresh_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.db");
        let dst = dir.path().join("dst.db");
        let src_uri = format!("sqlite://{}", src.display());
        let dst_uri = format!("file://{}?protocol=iso", dst.display());

        Registry::global()
            .with_uri(&src_uri, |c| {
                c.set("x", Value::object([("n", 1)]))?;
                c.set("y", Value::from("z"))
            })
            .unwrap();

        let report = export_uris(Registry::global(), &src_uri, &dst_uri).unwrap();
        assert_eq!(report.copied, 2);

        let reopened = SqliteConnector::from_uri(&dst_uri).unwrap();
        assert_eq!(reopened.at("x").unwrap(), Value::object([("n", 1)]));
        assert_eq!(reopened.len().unwrap(), 2);
    }
}

#[cfg(feature = "shelf")]
mod shelf {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_shelf_to_memory() {
        let dir = tempdir().unwrap();
        let uri = format!("shelf://{}", dir.path().join("source.shelf").display());
        Registry::global()
            .with_uri(&uri, |c| {
                for i in 0..50 {
                    c.set(&format!("k{i}"), Value::from(i))?;
                }
                Ok(())
            })
            .unwrap();

        let report = export_uris(Registry::global(), &uri, "memory:").unwrap();
        assert_eq!(report.copied, 50);
    }

    #[test]
    fn test_same_shelf_under_two_spellings_refused() {
        let dir = tempdir().unwrap();
        let plain = format!("shelf://{}", dir.path().join("a.shelf").display());
        let dotted = format!("shelf://{}", dir.path().join(".").join("a.shelf").display());
        Registry::global()
            .with_uri(&plain, |c| c.set("k", Value::from(1)))
            .unwrap();

        let err = export_uris(Registry::global(), &plain, &dotted).unwrap_err();
        assert!(matches!(err, PreserveError::InvalidArguments { .. }), "{err}");

        // Refused before opening, so the shelf is still free and intact.
        let value = Registry::global().with_uri(&plain, |c| c.at("k")).unwrap();
        assert_eq!(value, Value::Int(1));
    }
}
