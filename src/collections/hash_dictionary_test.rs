use super::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn v(i: i64) -> AtomValue {
    AtomValue::Int(i)
}

#[test]
fn get_and_set_round_trip() {
    let d = HashDictionary::new().set_at(5, v(50)).set_at(1, v(10)).set_at(3, v(30));
    assert_eq!(d.get_at(5).unwrap().as_i64(), Some(50));
    assert_eq!(d.get_at(1).unwrap().as_i64(), Some(10));
    assert!(d.get_at(42).is_none());
    assert_eq!(d.entries().iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1, 3, 5]);
}

#[test]
fn remove_on_two_child_node_matches_sorted_model_minus_removed() {
    let mut d = HashDictionary::new();
    for k in [5, 2, 8, 1, 3, 7, 9] {
        d = d.set_at(k, v(k));
    }
    let d = d.remove_at(5).unwrap();
    let keys: Vec<i64> = d.entries().iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![1, 2, 3, 7, 8, 9]);
}

#[test]
fn merge_lets_other_win_on_collision() {
    let a = HashDictionary::new().set_at(1, v(1)).set_at(2, v(2));
    let b = HashDictionary::new().set_at(2, v(99)).set_at(3, v(3));
    let merged = a.merge(&b);
    assert_eq!(merged.get_at(1).unwrap().as_i64(), Some(1));
    assert_eq!(merged.get_at(2).unwrap().as_i64(), Some(99));
    assert_eq!(merged.get_at(3).unwrap().as_i64(), Some(3));
}

#[test]
fn mutation_does_not_touch_prior_versions() {
    let a = HashDictionary::new().set_at(1, v(1));
    let b = a.set_at(1, v(2));
    assert_eq!(a.get_at(1).unwrap().as_i64(), Some(1));
    assert_eq!(b.get_at(1).unwrap().as_i64(), Some(2));
}

#[derive(Debug, Clone)]
enum Op {
    Set(i64, i64),
    Remove(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-20i64..20, any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
        (-20i64..20).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn models_a_btreemap_and_stays_balanced(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut model: BTreeMap<i64, i64> = BTreeMap::new();
        let mut dict = HashDictionary::new();
        for op in ops {
            match op {
                Op::Set(k, x) => {
                    model.insert(k, x);
                    dict = dict.set_at(k, v(x));
                }
                Op::Remove(k) => {
                    model.remove(&k);
                    dict = dict.remove_at(k).unwrap();
                }
            }
            prop_assert_eq!(dict.len(), model.len());
            let entries: Vec<(i64, i64)> = dict
                .entries()
                .into_iter()
                .map(|(k, val)| (k, val.as_i64().unwrap()))
                .collect();
            let expected: Vec<(i64, i64)> = model.iter().map(|(k, v)| (*k, *v)).collect();
            prop_assert_eq!(entries, expected);
            prop_assert!(dict.max_abs_balance() <= 1);
        }
    }
}
