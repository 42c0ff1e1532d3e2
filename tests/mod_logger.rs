use bson::doc;
use querykit::MemoryDatabase;
use querykit::logger::{PIPELINE_TARGET, configure_logging};
use querykit::query::{Pagination, Select};

// log4rs installs once per process; this file holds the only test that configures it.
#[test]
fn executed_pipelines_land_in_pipeline_log() {
    let dir = tempfile::tempdir().unwrap();
    configure_logging(Some(dir.path()), Some("info"), Some(2)).unwrap();

    let db = MemoryDatabase::new();
    let items = db.collection("items");
    items.insert_one(doc! { "k": 1 }).unwrap();
    let out = Select::new(Pagination::from_raw(5, 1).unwrap()).filter(doc! { "k": 1 }).run(&items).unwrap();
    assert_eq!(out.total, 1);
    drop(out);
    log::info!("plain application line");
    log::logger().flush();

    let pipeline = std::fs::read_to_string(dir.path().join("pipeline.log")).unwrap();
    assert!(pipeline.contains(PIPELINE_TARGET));
    assert!(pipeline.contains(r#"{"$match":{"k":1}}"#));
    assert!(!pipeline.contains("plain application line"));

    let app = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
    assert!(app.contains("plain application line"));
    assert!(!app.contains("$match"));
}
