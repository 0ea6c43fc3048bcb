use super::*;

fn v(i: i64) -> AtomValue {
    AtomValue::Int(i)
}

#[test]
fn add_is_idempotent_and_deduplicates() {
    let s = Set::new().add(v(1)).add(v(1)).add(v(2));
    assert_eq!(s.len(), 2);
    assert!(s.has(&v(1)));
    assert!(s.has(&v(2)));
    assert!(!s.has(&v(3)));
}

#[test]
fn remove_at_drops_from_both_staged_and_promoted() {
    let s = Set::new().add(v(1)).add(v(2));
    let removed = s.remove_at(&v(1)).unwrap();
    assert!(!removed.has(&v(1)));
    assert!(removed.has(&v(2)));

    let promoted = s.promote_staged();
    let removed2 = promoted.remove_at(&v(1)).unwrap();
    assert!(!removed2.has(&v(1)));
}

#[test]
fn promote_staged_preserves_membership() {
    let s = Set::new().add(v(1)).add(v(2));
    let promoted = s.promote_staged();
    assert_eq!(promoted.len(), 2);
    assert!(promoted.has(&v(1)));
    assert!(promoted.has(&v(2)));
}

#[test]
fn union_intersection_difference() {
    let a = Set::new().add(v(1)).add(v(2)).add(v(3));
    let b = Set::new().add(v(2)).add(v(3)).add(v(4));

    let u: std::collections::BTreeSet<i64> = a.union(&b).iter().map(|x| x.as_i64().unwrap()).collect();
    assert_eq!(u, [1, 2, 3, 4].into_iter().collect());

    let i: std::collections::BTreeSet<i64> = a.intersection(&b).iter().map(|x| x.as_i64().unwrap()).collect();
    assert_eq!(i, [2, 3].into_iter().collect());

    let d: std::collections::BTreeSet<i64> = a.difference(&b).iter().map(|x| x.as_i64().unwrap()).collect();
    assert_eq!(d, [1].into_iter().collect());
}

#[test]
fn mutation_does_not_touch_prior_versions() {
    let a = Set::new().add(v(1));
    let b = a.add(v(2));
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 2);
}
