//! Wipe and purge against the in-process testkit library.

use fdb_core::{FdbError, ListOptions, PurgeOptions, WipeOptions};
use fdb_testkit::{base_request, count, populate, TestFdb};
use std::fs;

const DATABASES: &str = "class=rd,expver=xxxx";

fn drain<I: Iterator<Item = fdb_core::FdbResult<String>>>(report: I) -> Vec<String> {
    report.collect::<Result<_, _>>().unwrap()
}

fn pollute(test: &TestFdb) {
    for entry in fs::read_dir(test.root()).unwrap() {
        let dir = entry.unwrap().path();
        if dir.is_dir() {
            fs::write(dir.join("junk"), b"not ours").unwrap();
        }
    }
}

#[test]
fn dry_run_changes_nothing() {
    let test = TestFdb::new();
    assert_eq!(populate(&test).unwrap(), 4);
    let before = test.entries();

    let report = drain(test.wipe(DATABASES, WipeOptions::default()).unwrap());
    assert!(!report.is_empty());
    assert!(report.iter().any(|line| line.starts_with("Database: ")));

    assert_eq!(count(&test, None).unwrap(), 4);
    assert_eq!(test.entries(), before);
}

#[test]
fn doit_removes_everything_matched() {
    let test = TestFdb::new();
    populate(&test).unwrap();

    drain(test.wipe(DATABASES, WipeOptions::default().doit(true)).unwrap());
    assert_eq!(count(&test, None).unwrap(), 0);
    assert!(test.entries().is_empty(), "{:?}", test.entries());
}

#[test]
fn doit_removes_only_matching_fields() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    let matching = count(&test, Some("class=rd,expver=xxxx,step=1")).unwrap();
    assert_eq!(matching, 1);

    drain(
        test.wipe("class=rd,expver=xxxx,step=1", WipeOptions::default().doit(true))
            .unwrap(),
    );
    assert_eq!(count(&test, None).unwrap(), 4 - matching);
    assert_eq!(count(&test, Some("class=rd,step=1")).unwrap(), 0);
}

#[test]
fn porcelain_reports_paths_only() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    let report = drain(
        test.wipe(DATABASES, WipeOptions::default().porcelain(true))
            .unwrap(),
    );
    assert!(!report.is_empty());
    for line in &report {
        assert!(line.starts_with(test.root().to_str().unwrap()), "{line}");
    }
}

#[test]
fn unclean_databases_refuse_to_wipe() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    pollute(&test);
    let before = test.entries();

    let err = test
        .wipe(DATABASES, WipeOptions::default().doit(true))
        .unwrap_err();
    assert!(matches!(err, FdbError::NativeCall { ref function, .. } if function == "fdb_wipe"));
    assert_eq!(count(&test, None).unwrap(), 4);
    assert_eq!(test.entries(), before);

    let report = drain(test.wipe(DATABASES, WipeOptions::default()).unwrap());
    assert!(report.iter().any(|line| line.ends_with("junk")));

    drain(
        test.wipe(
            DATABASES,
            WipeOptions::default().doit(true).unsafe_wipe_all(true),
        )
        .unwrap(),
    );
    assert_eq!(count(&test, None).unwrap(), 0);
    assert!(test.entries().is_empty());
}

#[test]
fn purge_keeps_the_latest_duplicate() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    test.archive_key(b"replacement", base_request()).unwrap();
    test.flush().unwrap();

    let all = || {
        test.list(None, ListOptions::default().duplicates(true))
            .unwrap()
            .count()
    };
    assert_eq!(all(), 5);

    let report = drain(test.purge(DATABASES, PurgeOptions::default()).unwrap());
    assert_eq!(report.len(), 2);
    assert_eq!(all(), 5);

    drain(test.purge(DATABASES, PurgeOptions::default().doit(true)).unwrap());
    assert_eq!(all(), 4);

    let mut reader = test.retrieve(base_request()).unwrap();
    assert_eq!(reader.read_remaining().unwrap(), b"replacement");
}
