use bson::{Bson, doc};
use querykit::query::{EXPECTED_GROUPS, GroupCount, group_count};
use querykit::store::{ExecOptions, count};
use querykit::{DbError, MemoryDatabase, StoreError};

fn people() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    let rows = [("paris", true), ("oslo", true), ("paris", true), ("rome", false), ("paris", false), ("oslo", true)];
    db.collection("people")
        .insert_many(rows.iter().map(|(city, active)| doc! { "city": *city, "active": *active }))
        .unwrap();
    db.collection("people").insert_one(doc! { "active": true }).unwrap();
    db
}

#[test]
fn counts_per_value_most_frequent_first() {
    let db = people();
    let groups = group_count(&db.collection("people"), None, "city", &ExecOptions::default()).unwrap();
    assert_eq!(groups[0], GroupCount { field: Bson::String("paris".into()), count: 3 });
    assert_eq!(groups[1], GroupCount { field: Bson::String("oslo".into()), count: 2 });
    assert!(groups.windows(2).all(|w| w[0].count >= w[1].count));
    // The row without a city groups under null.
    assert!(groups.iter().any(|g| g.field == Bson::Null && g.count == 1));
    assert_eq!(db.open_cursors(), 0);
}

#[test]
fn filtered_counts_sum_to_the_filter_total() {
    let db = people();
    let people = db.collection("people");
    let filter = doc! { "active": true };
    let groups = group_count(&people, Some(filter.clone()), "city", &ExecOptions::default()).unwrap();
    let total = count(&people, Some(&filter), &ExecOptions::default()).unwrap();
    assert_eq!(groups.iter().map(|g| g.count).sum::<i64>(), i64::try_from(total).unwrap());
    assert!(groups.iter().all(|g| g.field != Bson::String("rome".into())));
}

#[test]
fn more_groups_than_the_capacity_hint() {
    let db = MemoryDatabase::new();
    let tags = db.collection("tags");
    tags.insert_many((0..150).flat_map(|k: i32| (0..=k % 4).map(move |_| doc! { "k": k }))).unwrap();

    let groups = group_count(&tags, None, "k", &ExecOptions::default()).unwrap();
    assert!(groups.len() > EXPECTED_GROUPS);
    assert_eq!(groups.len(), 150);
    assert!(groups.windows(2).all(|w| w[0].count >= w[1].count));
    let total = count(&tags, None, &ExecOptions::default()).unwrap();
    assert_eq!(groups.iter().map(|g| g.count).sum::<i64>(), i64::try_from(total).unwrap());
    assert_eq!(db.open_cursors(), 0);
}

#[test]
fn empty_collection_has_no_groups() {
    let db = MemoryDatabase::new();
    let groups = group_count(&db.collection("nothing"), None, "city", &ExecOptions::default()).unwrap();
    assert!(groups.is_empty());
}

#[test]
fn failures_carry_context() {
    let db = people();
    db.close();
    let err = group_count(&db.collection("people"), None, "city", &ExecOptions::default()).unwrap_err();
    match err {
        DbError::Aggregate { context, collection, source: StoreError::Unavailable(_) } => {
            assert_eq!(context, "group_count");
            assert_eq!(collection, "people");
        }
        other => panic!("unexpected error: {other}"),
    }
}
