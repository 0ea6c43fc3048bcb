use super::*;

fn v(i: i64) -> AtomValue {
    AtomValue::Int(i)
}

#[test]
fn repeated_add_increments_count_without_duplicating_items() {
    let s = CountedSet::new().add(v(1)).add(v(1)).add(v(1)).add(v(2));
    assert_eq!(s.len(), 2);
    assert_eq!(s.count_of(&v(1)), 3);
    assert_eq!(s.count_of(&v(2)), 1);
    assert_eq!(s.total_count(), 4);
}

#[test]
fn first_add_and_last_remove_touch_items_intermediate_do_not() {
    let s = CountedSet::new().add(v(1)).add(v(1)).add(v(1));
    assert_eq!(s.len(), 1);
    let s = s.remove_at(&v(1)).unwrap();
    assert_eq!(s.count_of(&v(1)), 2);
    assert_eq!(s.len(), 1);
    let s = s.remove_at(&v(1)).unwrap();
    assert_eq!(s.count_of(&v(1)), 1);
    assert_eq!(s.len(), 1);
    let s = s.remove_at(&v(1)).unwrap();
    assert_eq!(s.count_of(&v(1)), 0);
    assert_eq!(s.len(), 0);
    assert!(!s.has(&v(1)));
}

#[test]
fn remove_absent_element_is_noop() {
    let s = CountedSet::new().add(v(1));
    let unchanged = s.remove_at(&v(42)).unwrap();
    assert_eq!(unchanged.len(), 1);
    assert_eq!(unchanged.total_count(), 1);
}

#[test]
fn mutation_does_not_touch_prior_versions() {
    let a = CountedSet::new().add(v(1));
    let b = a.add(v(1));
    assert_eq!(a.count_of(&v(1)), 1);
    assert_eq!(b.count_of(&v(1)), 2);
}
