//! SQLite-backed storage across reopen.
//!
//! Run with: `cargo test --features persistence --test sqlite_store`

use tempfile::TempDir;
use trackview::{
    Bounds, GpsPoint, KeyValueStore, MapSession, SessionConfig, SqliteStore, TrackFeature,
    ValueRange,
};

fn setup() -> (TempDir, String) {
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("trackview.db");
    let path = db_path.to_str().expect("non-utf8 temp path").to_string();
    (tmp_dir, path)
}

fn viewport() -> Bounds {
    Bounds {
        min_lat: 46.0,
        max_lat: 47.0,
        min_lng: 6.5,
        max_lng: 7.5,
    }
}

fn features() -> Vec<TrackFeature> {
    vec![
        TrackFeature::new("1", vec![GpsPoint::new(46.2, 7.0)], ["cycling"], 40.0),
        TrackFeature::new("2", vec![GpsPoint::new(46.3, 7.1)], ["hiking"], 9.0),
    ]
}

#[test]
fn test_values_survive_reopen() {
    let (_tmp, path) = setup();

    {
        let mut store = SqliteStore::new(&path).expect("failed to open store");
        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        store.set("gone", "x").unwrap();
        store.remove("gone").unwrap();
    }

    let store = SqliteStore::new(&path).expect("failed to reopen store");
    assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
    assert_eq!(store.get("gone").unwrap(), None);
}

#[test]
fn test_session_state_survives_reopen() {
    let (_tmp, path) = setup();

    {
        let store = SqliteStore::new(&path).expect("failed to open store");
        let mut session = MapSession::open(store, SessionConfig::default(), viewport(), features());
        session.set_categories(["hiking"]);
        session
            .set_length_range(ValueRange::new(5.0, 10.0))
            .unwrap();
        assert!(session.save_map_position(GpsPoint::new(46.25, 7.05), 12.0));
    }

    let store = SqliteStore::new(&path).expect("failed to reopen store");
    let mut session = MapSession::open(store, SessionConfig::default(), viewport(), features());
    assert_eq!(session.visible_track_ids(), vec!["2"]);

    let position = session.restore_map_position().expect("position not restored");
    assert_eq!(position.zoom, 12.0);
}
