use super::*;
use crate::atom::AtomValue;
use proptest::prelude::*;

fn v(i: i64) -> AtomValue {
    AtomValue::Int(i)
}

fn as_ints(list: &List) -> Vec<i64> {
    list.to_vec().iter().map(|x| x.as_i64().unwrap()).collect()
}

#[test]
fn negative_index_mirrors_python_semantics() {
    let list = List::from_vec(vec![v(9), v(10), v(15), v(20), v(21)]);
    assert_eq!(list.get_at(-1).unwrap().as_i64(), Some(21));
    assert_eq!(list.get_at(-5).unwrap().as_i64(), Some(9));
    assert!(list.get_at(-6).is_none());
    assert!(list.get_at(5).is_none());
}

#[test]
fn set_at_count_appends_set_at_beyond_raises() {
    let list = List::from_vec(vec![v(1), v(2)]);
    let appended = list.set_at(2, v(3)).unwrap();
    assert_eq!(as_ints(&appended), vec![1, 2, 3]);
    assert!(list.set_at(3, v(4)).is_err());
}

#[test]
fn repeated_set_at_count_appends_stay_balanced() {
    let mut list = List::new();
    for i in 0..50 {
        let len = list.len() as i64;
        list = list.set_at(len, v(i)).unwrap();
    }
    assert_eq!(as_ints(&list), (0..50).collect::<Vec<_>>());
    assert!(list.max_abs_balance() <= 1);
}

#[test]
fn insert_and_remove_shift_elements() {
    let list = List::from_vec(vec![v(1), v(2), v(4)]);
    let inserted = list.insert_at(2, v(3)).unwrap();
    assert_eq!(as_ints(&inserted), vec![1, 2, 3, 4]);
    let removed = inserted.remove_at(0).unwrap();
    assert_eq!(as_ints(&removed), vec![2, 3, 4]);
}

#[test]
fn head_tail_slice() {
    let list = List::from_vec((0..10).map(v).collect());
    assert_eq!(as_ints(&list.head(3)), vec![0, 1, 2]);
    assert_eq!(as_ints(&list.tail(7)), vec![7, 8, 9]);
    assert_eq!(as_ints(&list.slice(2, 5)), vec![2, 3, 4]);
}

#[test]
fn extend_preserves_order_and_does_not_mutate_operands() {
    let a = List::from_vec(vec![v(1), v(2)]);
    let b = List::from_vec(vec![v(3), v(4)]);
    let c = a.extend(&b);
    assert_eq!(as_ints(&a), vec![1, 2]);
    assert_eq!(as_ints(&b), vec![3, 4]);
    assert_eq!(as_ints(&c), vec![1, 2, 3, 4]);
}

#[test]
fn mutation_never_affects_prior_versions() {
    let a = List::from_vec(vec![v(1), v(2), v(3)]);
    let b = a.set_at(1, v(99)).unwrap();
    assert_eq!(as_ints(&a), vec![1, 2, 3]);
    assert_eq!(as_ints(&b), vec![1, 99, 3]);
}

#[derive(Debug, Clone)]
enum Op {
    Append(i64),
    InsertAt(usize, i64),
    RemoveAt(usize),
    SetAt(usize, i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i64>().prop_map(Op::Append),
        (0usize..50, any::<i64>()).prop_map(|(i, x)| Op::InsertAt(i, x)),
        (0usize..50).prop_map(Op::RemoveAt),
        (0usize..50, any::<i64>()).prop_map(|(i, x)| Op::SetAt(i, x)),
    ]
}

proptest! {
    #[test]
    fn models_a_plain_vec_and_stays_balanced(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut model: Vec<i64> = Vec::new();
        let mut list = List::new();
        for op in ops {
            match op {
                Op::Append(x) => {
                    model.push(x);
                    list = list.append_last(v(x));
                }
                Op::InsertAt(i, x) => {
                    let i = i.min(model.len());
                    model.insert(i, x);
                    list = list.insert_at(i as i64, v(x)).unwrap();
                }
                Op::RemoveAt(i) => {
                    if !model.is_empty() {
                        let i = i % model.len();
                        model.remove(i);
                        list = list.remove_at(i as i64).unwrap();
                    }
                }
                Op::SetAt(i, x) => {
                    if !model.is_empty() {
                        let i = i % model.len();
                        model[i] = x;
                        list = list.set_at(i as i64, v(x)).unwrap();
                    }
                }
            }
            prop_assert_eq!(list.len(), model.len());
            prop_assert_eq!(as_ints(&list), model.clone());
            prop_assert!(list.max_abs_balance() <= 1);
        }
    }
}
