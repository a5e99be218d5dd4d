//! Session behaviour against the in-process testkit library.

use fdb_core::{
    Fdb, FdbConfig, FdbError, FdbOptions, Key, ListOptions, NativeLibrary, Request,
    HOME_CONFIG_PATH,
};
use fdb_testkit::{
    base_request, count, field_keys, message, mock_library, old_version_symbols, populate,
    TestFdb, FIELD_DATA, MOCK_LIBRARY_LABEL,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

fn blob() -> Vec<u8> {
    (0u8..=255).cycle().take(4096).collect()
}

fn key_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        ("class", "rd"),
        ("expver", "xxxx"),
        ("stream", "oper"),
        ("date", "20191110"),
        ("time", "0000"),
        ("domain", "g"),
        ("type", "an"),
        ("levtype", "pl"),
        ("step", "0"),
        ("levelist", "300"),
        ("param", "138"),
    ]
}

#[test]
fn archived_data_round_trips() {
    let test = TestFdb::new();
    let data = blob();

    let key = Key::from_fields(Arc::clone(test.api()), key_fields()).unwrap();
    test.archive_key(&data, &key).unwrap();
    test.flush().unwrap();

    let request: Vec<(&str, &str)> = key_fields();
    let mut reader = test.retrieve(request).unwrap();
    assert_eq!(reader.read_chunk(Some(10)).unwrap(), &data[..10]);

    reader.seek_to(0).unwrap();
    let mut all = Vec::new();
    reader.read_to_end(&mut all).unwrap();
    assert_eq!(all, data);
}

#[test]
fn mismatched_request_lists_nothing() {
    let test = TestFdb::new();
    test.archive_key(&blob(), key_fields()).unwrap();
    test.flush().unwrap();

    let mut request = key_fields();
    request.retain(|(k, _)| *k != "expver");
    request.push(("expver", "xxxy"));

    let mut listing = test.list(Some(request.clone().into()), ListOptions::default()).unwrap();
    assert!(listing.next().is_none());

    let mut reader = test.retrieve(request).unwrap();
    assert_eq!(reader.size().unwrap(), 0);
    assert!(reader.read_remaining().unwrap().is_empty());
}

#[test]
fn nothing_is_visible_before_flush() {
    let test = TestFdb::new();
    test.archive_key(FIELD_DATA, base_request()).unwrap();
    assert_eq!(count(&test, None).unwrap(), 0);
    test.flush().unwrap();
    assert_eq!(count(&test, None).unwrap(), 1);
}

#[test]
fn listing_counts_follow_duplicates() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    test.archive_key(b"newer", base_request()).unwrap();
    test.flush().unwrap();

    assert_eq!(count(&test, None).unwrap(), 4);
    let all = test
        .list(None, ListOptions::default().duplicates(true))
        .unwrap()
        .count();
    assert_eq!(all, 5);

    assert_eq!(count(&test, Some("class=rd,step=0")).unwrap(), 3);
    assert_eq!(count(&test, Some("class=rd,step=0/1")).unwrap(), 4);
    assert_eq!(count(&test, Some("class=rd,levtype=sfc")).unwrap(), 1);
    assert_eq!(count(&test, Some("class=rd,step=all")).unwrap(), 4);

    let mut reader = test.retrieve("class=rd,date=20000101,step=0,levtype=pl").unwrap();
    assert_eq!(reader.read_remaining().unwrap(), b"newer");
}

#[test]
fn unexpanded_all_matches_nothing() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    let listed = test
        .list(Some("class=rd,step=all".into()), ListOptions::default().expand(false))
        .unwrap()
        .count();
    assert_eq!(listed, 0);
}

#[test]
fn listing_decodes_keys_and_schema() {
    let test = TestFdb::new();
    populate(&test).unwrap();

    let options = ListOptions::default().keys(true).schema(true);
    let elements: Vec<_> = test
        .list(Some("class=rd,levtype=sfc".into()), options)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(elements.len(), 1);

    let element = &elements[0];
    assert_eq!(element.length, FIELD_DATA.len() as u64);
    assert!(element.path.ends_with("data.bin"));

    let keys = element.keys.as_ref().unwrap();
    let expected: BTreeMap<String, String> = field_keys()[3].iter().cloned().collect();
    assert_eq!(keys, &expected);

    let schema = element.schema.as_ref().unwrap();
    assert_eq!(schema[&0]["class"], "rd");
    assert_eq!(schema[&1]["levtype"], "sfc");
    assert_eq!(schema[&2]["param"], "138");
    assert_eq!(schema.len(), 3);
}

#[test]
fn plain_listing_omits_metadata() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    for element in test.list(None, ListOptions::default()).unwrap() {
        let element = element.unwrap();
        assert!(element.keys.is_none());
        assert!(element.schema.is_none());
    }
}

#[test]
fn reader_rewinds_and_rejects_relative_seeks() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    let mut reader = test.retrieve("class=rd,step=0/1").unwrap();
    assert!(!reader.is_open());

    let first = reader.read_chunk(Some(4)).unwrap();
    let rest = reader.read_remaining().unwrap();
    assert_eq!(reader.tell().unwrap(), (first.len() + rest.len()) as u64);

    assert_eq!(reader.seek(SeekFrom::Start(0)).unwrap(), 0);
    let again = reader.read_remaining().unwrap();
    assert_eq!(again, [first, rest].concat());

    let err = reader.seek_from(SeekFrom::Current(-1)).unwrap_err();
    assert!(matches!(err, FdbError::UnsupportedSeekMode));
    let err = reader.seek(SeekFrom::End(0)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
}

#[test]
fn closed_reader_reopens_from_the_start() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    let mut reader = test.retrieve(base_request()).unwrap();
    reader.skip(3).unwrap();
    assert_eq!(reader.read_remaining().unwrap(), &FIELD_DATA[3..]);

    reader.close().unwrap();
    reader.close().unwrap();
    assert!(!reader.is_open());
    assert_eq!(reader.read_remaining().unwrap(), FIELD_DATA);
}

#[test]
fn read_larger_than_the_stream_returns_what_is_left() {
    let test = TestFdb::new();
    populate(&test).unwrap();
    let mut reader = test.retrieve(base_request()).unwrap();
    assert_eq!(reader.size().unwrap(), FIELD_DATA.len() as u64);

    assert_eq!(reader.read_chunk(Some(1 << 50)).unwrap(), FIELD_DATA);
    assert!(reader.read_chunk(Some(usize::MAX)).unwrap().is_empty());
}

#[test]
fn request_archive_checks_the_data() {
    let test = TestFdb::new();
    let key = base_request();
    let data = message(&key, b"payload");

    test.archive_request(&data, "class=rd,expver=xxxx").unwrap();
    let err = test.archive_request(&data, "class=rd,expver=yyyy").unwrap_err();
    assert!(matches!(err, FdbError::NativeCall { ref function, .. } if function == "fdb_archive_multiple"));

    test.archive(&message(&field_keys()[1], b"second"), None, None).unwrap();
    test.flush().unwrap();
    assert_eq!(count(&test, None).unwrap(), 2);

    let mut reader = test.retrieve(key).unwrap();
    assert_eq!(reader.read_remaining().unwrap(), data);
}

#[test]
fn request_and_key_conflict() {
    let test = TestFdb::new();
    let request = Request::parse(Arc::clone(test.api()), "class=rd").unwrap();
    let err = test
        .archive(FIELD_DATA, Some((&request).into()), Some(base_request().into()))
        .unwrap_err();
    assert!(matches!(err, FdbError::ConflictingArguments { .. }));
    test.flush().unwrap();
    assert_eq!(count(&test, None).unwrap(), 0);
}

#[test]
fn native_errors_carry_function_and_message() {
    let test = TestFdb::new();
    let err = test.archive_key(FIELD_DATA, [("class", "rd")]).unwrap_err();
    match err {
        FdbError::NativeCall {
            function,
            code,
            message,
        } => {
            assert_eq!(function, "fdb_archive");
            assert_eq!(code, fdb_sys::FDB_ERROR_GENERAL_EXCEPTION);
            assert!(message.contains("expver"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn sessions_are_independent_per_root() {
    let api = mock_library();
    let a = TestFdb::with_api(Arc::clone(&api));
    let b = TestFdb::with_api(api);
    populate(&a).unwrap();
    assert_eq!(count(&a, None).unwrap(), 4);
    assert_eq!(count(&b, None).unwrap(), 0);
}

#[test]
fn dropping_a_session_flushes() {
    let test = TestFdb::new();
    {
        let other = test.reopen();
        other.archive_key(FIELD_DATA, base_request()).unwrap();
    }
    assert_eq!(count(&test, None).unwrap(), 1);
}

#[test]
fn home_directory_configuration() {
    let test = TestFdb::new();
    let home = test.scratch().join("home");
    let config_path = home.join(HOME_CONFIG_PATH);
    fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    fs::write(&config_path, serde_json::to_string(&test.config).unwrap()).unwrap();

    let fdb = Fdb::open(Arc::clone(test.api()), &FdbOptions::new().home(&home)).unwrap();
    populate(&fdb).unwrap();
    assert_eq!(count(&test, None).unwrap(), 4);

    let conflicting = FdbOptions::new().home(&home).config(test.config.clone());
    let err = Fdb::open(Arc::clone(test.api()), &conflicting).unwrap_err();
    assert!(matches!(err, FdbError::ConfigurationConflict));
}

#[test]
fn configuration_shapes_open_sessions() {
    let test = TestFdb::new();
    let api = test.api();
    let text = serde_json::to_string(&test.config).unwrap();
    let value = serde_json::to_value(&test.config).unwrap();

    for options in [
        FdbOptions::new().config(test.config.clone()),
        FdbOptions::new().config(text),
        FdbOptions::new().config(value),
    ] {
        let fdb = Fdb::open(Arc::clone(api), &options).unwrap();
        fdb.archive_key(FIELD_DATA, base_request()).unwrap();
        fdb.flush().unwrap();
    }
    assert_eq!(count(&test, None).unwrap(), 1);

    let missing = FdbConfig::local(test.scratch().join("missing"));
    let err = Fdb::open(Arc::clone(api), &FdbOptions::new().config(missing)).unwrap_err();
    assert!(matches!(err, FdbError::NativeCall { ref function, .. } if function == "fdb_new_handle_from_yaml"));
}

#[test]
fn old_libraries_are_rejected() {
    let err = NativeLibrary::from_symbols(old_version_symbols(), MOCK_LIBRARY_LABEL).unwrap_err();
    match err {
        FdbError::IncompatibleVersion { found, required, .. } => {
            assert_eq!(found, "5.10.0");
            assert_eq!(required, fdb_core::MIN_FDB_VERSION);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn library_reports_versions() {
    let api = mock_library();
    assert_eq!(api.version().unwrap(), fdb_testkit::MOCK_VERSION);
    assert_eq!(api.vcs_version().unwrap(), "mock");
    assert_eq!(api.library_path(), std::path::Path::new(MOCK_LIBRARY_LABEL));
}
