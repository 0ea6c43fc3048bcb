use super::*;

fn v(i: i64) -> AtomValue {
    AtomValue::Int(i)
}

#[test]
fn set_and_get_preserve_sorted_order() {
    let d = Dictionary::new()
        .set_at("banana", v(2))
        .unwrap()
        .set_at("apple", v(1))
        .unwrap()
        .set_at("cherry", v(3))
        .unwrap();
    assert_eq!(d.keys(), vec!["apple", "banana", "cherry"]);
    assert_eq!(d.get_at("banana").unwrap().as_i64(), Some(2));
    assert!(d.get_at("missing").is_none());
}

#[test]
fn set_at_existing_key_replaces_without_duplicating() {
    let d = Dictionary::new().set_at("k", v(1)).unwrap().set_at("k", v(2)).unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d.get_at("k").unwrap().as_i64(), Some(2));
}

#[test]
fn remove_at_drops_key_and_is_noop_when_absent() {
    let d = Dictionary::new().set_at("a", v(1)).unwrap().set_at("b", v(2)).unwrap();
    let removed = d.remove_at("a").unwrap();
    assert_eq!(removed.keys(), vec!["b"]);
    let unchanged = removed.remove_at("zzz").unwrap();
    assert_eq!(unchanged.keys(), vec!["b"]);
}

#[test]
fn mutation_does_not_touch_prior_versions() {
    let a = Dictionary::new().set_at("x", v(1)).unwrap();
    let b = a.set_at("x", v(2)).unwrap();
    assert_eq!(a.get_at("x").unwrap().as_i64(), Some(1));
    assert_eq!(b.get_at("x").unwrap().as_i64(), Some(2));
}

#[test]
fn insertion_order_does_not_affect_final_iteration_order() {
    let mut a = Dictionary::new();
    for k in ["d", "b", "c", "a"] {
        a = a.set_at(k, v(1)).unwrap();
    }
    let mut b = Dictionary::new();
    for k in ["a", "b", "c", "d"] {
        b = b.set_at(k, v(1)).unwrap();
    }
    assert_eq!(a.keys(), b.keys());
}
