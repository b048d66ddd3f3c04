//! Subject tokenization and validation tests

use gnat_core::{Error, ErrorKind, Subject};

#[test]
fn test_tokenization_is_order_preserving_split() {
    for raw in ["a", "a.b", "orders.eu.created", "x.y.z.w.v.u", "1.2.3"] {
        let subject = Subject::parse_publish(raw).unwrap();
        let expected: Vec<&str> = raw.split('.').collect();
        assert_eq!(subject.tokens(), expected.as_slice());
        assert_eq!(subject.to_string(), raw);
    }
}

#[test]
fn test_publish_subject_wildcards_rejected() {
    for raw in ["*", ">", "foo.*", "foo.>", "*.foo", "foo.*.bar.>"] {
        let err = Subject::parse_publish(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPublishSubject, "{raw}");
        assert!(!err.is_fatal());
    }
}

#[test]
fn test_subscribe_subject_wildcards() {
    let subject = Subject::parse_subscribe("foo.bar.*.test.>").unwrap();
    assert_eq!(subject.tokens(), &["foo", "bar", "*", "test", ">"]);

    let subject = Subject::parse_subscribe("*.*").unwrap();
    assert_eq!(subject.tokens(), &["*", "*"]);
}

#[test]
fn test_subscribe_full_wildcard_not_last() {
    for raw in ["foo.>.bar", ">.>", ">.a"] {
        assert_eq!(
            Subject::parse_subscribe(raw),
            Err(Error::InvalidSubscribeSubject),
            "{raw}"
        );
    }
}

#[test]
fn test_subscribe_empty_token() {
    assert_eq!(
        Subject::parse_subscribe("foo..bar"),
        Err(Error::InvalidSubscribeSubject)
    );
}
