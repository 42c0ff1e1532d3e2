use bson::{Bson, Document};
use proptest::prelude::*;
use querykit::DbError;
use querykit::query::condition::{ConditionOp, translate};

fn token() -> impl Strategy<Value = ConditionOp> {
    proptest::sample::select(ConditionOp::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_translation_keeps_values_and_order(entries in proptest::collection::vec((token(), any::<i64>()), 0..7)) {
        let mut input = Document::new();
        for (op, v) in &entries {
            input.insert(op.token(), *v);
        }
        let out = translate(&input).unwrap();
        prop_assert_eq!(out.len(), input.len());
        for ((token, value), (key, translated)) in input.iter().zip(out.iter()) {
            let op: ConditionOp = token.parse().unwrap();
            prop_assert_eq!(key.as_str(), op.key());
            prop_assert_eq!(value, translated);
        }
    }

    #[test]
    fn prop_unknown_tokens_are_rejected(s in "[a-z=<>!~$]{0,4}") {
        prop_assume!(ConditionOp::ALL.iter().all(|op| op.token() != s));
        let mut input = Document::new();
        input.insert(s.clone(), Bson::Int32(1));
        match translate(&input) {
            Err(DbError::UnsupportedOperator(t)) => prop_assert_eq!(t, s),
            other => prop_assert!(false, "expected rejection, got {:?}", other),
        }
    }
}
