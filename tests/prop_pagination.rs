use proptest::prelude::*;
use querykit::query::pagination::UNLIMITED_LIMIT;
use querykit::query::{PageSize, Pagination, Stage};

proptest! {
    #[test]
    fn prop_numbered_pages_skip_whole_pages(size in 1i64..10_000, number in 1i64..10_000) {
        let stages = Pagination::from_raw(size, number).unwrap().stages().unwrap();
        prop_assert_eq!(stages, vec![Stage::Skip(size * (number - 1)), Stage::Limit(size)]);
    }

    #[test]
    fn prop_page_zero_never_skips(size in 1i64..i64::MAX) {
        let stages = Pagination::from_raw(size, 0).unwrap().stages().unwrap();
        prop_assert_eq!(stages, vec![Stage::Limit(size)]);
    }

    #[test]
    fn prop_unlimited_limit_is_positive(number in any::<u64>()) {
        let stages = Pagination::new(PageSize::Unlimited, number).unwrap().stages().unwrap();
        prop_assert!(matches!(stages.last(), Some(Stage::Limit(n)) if *n == UNLIMITED_LIMIT && *n > 0));
        match number {
            0 => prop_assert_eq!(stages.len(), 1),
            1 => prop_assert_eq!(&stages[0], &Stage::Skip(0)),
            _ => prop_assert_eq!(&stages[0], &Stage::Skip(i64::MAX)),
        }
    }

    #[test]
    fn prop_invalid_raw_sizes_are_rejected(size in i64::MIN..=0) {
        prop_assume!(size != -1);
        prop_assert!(Pagination::from_raw(size, 1).is_err());
    }

    #[test]
    fn prop_skip_never_wraps(size in any::<u64>(), number in any::<u64>()) {
        prop_assume!(size > 0);
        if let Ok(stages) = Pagination::new(PageSize::Limited(size), number).unwrap().stages() {
            for stage in stages {
                match stage {
                    Stage::Skip(s) => prop_assert!(s >= 0),
                    Stage::Limit(l) => prop_assert!(l > 0),
                    other => prop_assert!(false, "unexpected stage {:?}", other),
                }
            }
        }
    }
}
