use bson::doc;
use proptest::prelude::*;
use querykit::MemoryDatabase;
use querykit::query::group_count;
use querykit::store::{ExecOptions, count};

proptest! {
    #[test]
    fn prop_groups_descend_and_sum_to_total(values in proptest::collection::vec((0u8..6, any::<bool>()), 0..60)) {
        let db = MemoryDatabase::new();
        let coll = db.collection(&format!("g-{}", uuid::Uuid::new_v4()));
        coll.insert_many(values.iter().map(|(k, flag)| doc! { "k": i32::from(*k), "flag": *flag })).unwrap();

        let filter = doc! { "flag": true };
        let groups = group_count(&coll, Some(filter.clone()), "k", &ExecOptions::default()).unwrap();
        let total = count(&coll, Some(&filter), &ExecOptions::default()).unwrap();

        prop_assert!(groups.windows(2).all(|w| w[0].count >= w[1].count));
        prop_assert_eq!(groups.iter().map(|g| g.count).sum::<i64>(), i64::try_from(total).unwrap());
        prop_assert_eq!(db.open_cursors(), 0);
    }
}
