use super::*;

fn v(i: i64) -> AtomValue {
    AtomValue::Int(i)
}

#[test]
fn set_at_creates_bucket_and_accumulates_values() {
    let d = RepeatedKeysDictionary::new()
        .set_at("bob", v(1))
        .unwrap()
        .set_at("bob", v(2))
        .unwrap()
        .set_at("alice", v(3))
        .unwrap();

    let bob: std::collections::BTreeSet<i64> = d.get_at("bob").iter().map(|x| x.as_i64().unwrap()).collect();
    assert_eq!(bob, [1, 2].into_iter().collect());
    assert!(d.get_at("alice").has(&v(3)));
    assert!(d.get_at("missing").is_empty());
}

#[test]
fn remove_record_at_drops_one_value_leaving_bucket() {
    let d = RepeatedKeysDictionary::new()
        .set_at("bob", v(1))
        .unwrap()
        .set_at("bob", v(2))
        .unwrap();
    let d = d.remove_record_at("bob", &v(1)).unwrap();
    assert!(!d.get_at("bob").has(&v(1)));
    assert!(d.get_at("bob").has(&v(2)));
}

#[test]
fn remove_at_drops_whole_bucket() {
    let d = RepeatedKeysDictionary::new().set_at("bob", v(1)).unwrap();
    let d = d.remove_at("bob").unwrap();
    assert!(!d.has("bob"));
}

#[test]
fn concurrent_distinct_inserts_into_same_key_yield_union() {
    let base = RepeatedKeysDictionary::new();
    let n = 8;
    let mut result = base.clone();
    for i in 0..n {
        result = result.set_at("shared", v(i)).unwrap();
    }
    let members: std::collections::BTreeSet<i64> = result.get_at("shared").iter().map(|x| x.as_i64().unwrap()).collect();
    assert_eq!(members, (0..n).collect());
    assert_eq!(result.get_at("shared").len(), n as usize);
}
