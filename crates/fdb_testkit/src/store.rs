//! The storage model behind the mock library.
//!
//! Each database (one combination of the first-level schema fields) is a
//! directory under the root holding `toc.json` and `data.bin`. Archived
//! fields are buffered in memory until flushed.

use fdb_core::FdbConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the root used when no configuration is given.
pub const MOCK_ROOT_VARIABLE: &str = "FDB_MOCK_ROOT";

/// Fields identifying a database directory.
pub const DATABASE_FIELDS: [&str; 6] = ["class", "expver", "stream", "date", "time", "domain"];

/// Fields identifying an index within a database.
pub const INDEX_FIELDS: [&str; 2] = ["type", "levtype"];

const TOC_FILE: &str = "toc.json";
const DATA_FILE: &str = "data.bin";

/// Field name to value.
pub type Fields = BTreeMap<String, String>;

/// A request as stored by the mock: field names with alternative values.
pub type Selection = Vec<(String, Vec<String>)>;

/// Errors raised by the mock store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A key lacks a field the schema requires.
    #[error("key is missing schema field '{0}'")]
    IncompleteKey(String),

    /// Archived data does not match the request it was archived with.
    #[error("data does not match request: {0}")]
    Mismatch(String),

    /// Archived data is not in the self-describing message format.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A database holds files the store does not recognise.
    #[error("cannot fully wipe unclean database {}: unrecognised files present", .0.display())]
    Unclean(PathBuf),

    /// Stored metadata is unreadable.
    #[error("corrupt table of contents {}: {1}", .0.display())]
    Corrupt(PathBuf, String),

    /// A caller misused the API.
    #[error("{0}")]
    Usage(String),
}

/// Result type for the mock store.
pub type StoreResult<T> = Result<T, StoreError>;

/// Schema level of a field.
pub fn level_of(field: &str) -> usize {
    if DATABASE_FIELDS.contains(&field) {
        0
    } else if INDEX_FIELDS.contains(&field) {
        1
    } else {
        2
    }
}

/// Key fields in schema order: by level, then declaration order, then name.
pub fn schema_order(key: &Fields) -> Vec<(&str, &str, usize)> {
    let rank = |name: &str| -> (usize, usize) {
        let level = level_of(name);
        let position = DATABASE_FIELDS
            .iter()
            .chain(INDEX_FIELDS.iter())
            .position(|f| *f == name)
            .unwrap_or(usize::MAX);
        (level, position)
    };
    let mut fields: Vec<_> = key
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str(), level_of(k)))
        .collect();
    fields.sort_by(|a, b| rank(a.0).cmp(&rank(b.0)).then_with(|| a.0.cmp(b.0)));
    fields
}

/// Builds a self-describing message: a JSON header line naming the key and
/// payload length, followed by the payload.
pub fn encode_message<K, V>(key: &[(K, V)], payload: &[u8]) -> Vec<u8>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let key: Fields = key
        .iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    let header = serde_json::json!({ "key": key, "length": payload.len() });
    let mut message = header.to_string().into_bytes();
    message.push(b'\n');
    message.extend_from_slice(payload);
    message
}

#[derive(Deserialize)]
struct Header {
    key: Fields,
    length: usize,
}

/// Splits concatenated messages. Each item holds the key and the whole
/// message bytes.
pub fn decode_messages(mut data: &[u8]) -> StoreResult<Vec<(Fields, Vec<u8>)>> {
    let mut messages = Vec::new();
    while !data.is_empty() {
        let newline = data
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StoreError::Malformed("missing header line".to_string()))?;
        let header: Header = serde_json::from_slice(&data[..newline])
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let end = newline + 1 + header.length;
        if end > data.len() {
            return Err(StoreError::Malformed("payload is truncated".to_string()));
        }
        messages.push((header.key, data[..end].to_vec()));
        data = &data[end..];
    }
    Ok(messages)
}

/// Drops fields whose values include `all`.
pub fn expand(selection: &mut Selection) {
    selection.retain(|(_, values)| !values.iter().any(|v| v.eq_ignore_ascii_case("all")));
}

fn matches(selection: &[(String, Vec<String>)], key: &Fields) -> bool {
    selection
        .iter()
        .all(|(name, values)| key.get(name).is_some_and(|v| values.contains(v)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TocEntry {
    key: Fields,
    offset: u64,
    length: u64,
}

/// One listed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    /// Data file holding the field.
    pub path: PathBuf,
    /// Byte offset in the data file.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
    /// Full key.
    pub key: Fields,
}

struct Database {
    dir: PathBuf,
    entries: Vec<TocEntry>,
}

impl Database {
    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    fn write_toc(&self) -> StoreResult<()> {
        let text = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StoreError::Corrupt(self.dir.clone(), e.to_string()))?;
        fs::write(self.dir.join(TOC_FILE), text)?;
        Ok(())
    }

    fn unrecognised_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name != TOC_FILE && name != DATA_FILE {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn owned_files(&self) -> Vec<PathBuf> {
        vec![self.dir.join(TOC_FILE), self.data_path()]
    }

    /// Entries with earlier duplicates of the same key removed, in order.
    fn latest(&self) -> Vec<&TocEntry> {
        let mut seen = HashSet::new();
        let mut kept: Vec<&TocEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| seen.insert(&e.key))
            .collect();
        kept.reverse();
        kept
    }
}

/// A mock FDB session's storage.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    pending: Vec<(Fields, Vec<u8>)>,
}

impl Store {
    /// Opens the store named by configuration text.
    ///
    /// Empty text falls back to `$FDB_MOCK_ROOT`.
    pub fn from_config(config: &str) -> StoreResult<Self> {
        let root = if config.trim().is_empty() {
            env::var_os(MOCK_ROOT_VARIABLE)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    StoreError::Config(format!(
                        "no configuration given and {MOCK_ROOT_VARIABLE} is not set"
                    ))
                })?
        } else {
            let config: FdbConfig = serde_json::from_str(config)
                .map_err(|e| StoreError::Config(e.to_string()))?;
            config
                .spaces
                .first()
                .and_then(|space| space.roots.first())
                .map(|root| root.path.clone())
                .ok_or_else(|| StoreError::Config("no storage roots configured".to_string()))?
        };
        if !root.is_dir() {
            return Err(StoreError::Config(format!(
                "root {} does not exist",
                root.display()
            )));
        }
        Ok(Self {
            root,
            pending: Vec::new(),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Buffers one field under `key`.
    pub fn archive(&mut self, key: Fields, data: &[u8]) -> StoreResult<()> {
        if let Some(missing) = DATABASE_FIELDS.iter().find(|f| !key.contains_key(**f)) {
            return Err(StoreError::IncompleteKey((*missing).to_string()));
        }
        self.pending.push((key, data.to_vec()));
        Ok(())
    }

    /// Buffers every message in `data`, checking each against `request`.
    pub fn archive_messages(&mut self, data: &[u8], request: Option<&Selection>) -> StoreResult<()> {
        let messages = decode_messages(data)?;
        if let Some(request) = request {
            for (key, _) in &messages {
                if !matches(request, key) {
                    return Err(StoreError::Mismatch(format!("{key:?}")));
                }
            }
        }
        for (key, message) in messages {
            self.archive(key, &message)?;
        }
        Ok(())
    }

    /// Writes buffered fields to their databases.
    pub fn flush(&mut self) -> StoreResult<()> {
        let mut databases: BTreeMap<PathBuf, Database> = BTreeMap::new();
        for (key, data) in self.pending.drain(..) {
            let dir = self.root.join(database_name(&key));
            if !databases.contains_key(&dir) {
                fs::create_dir_all(&dir)?;
                let db = load_database(&dir)?;
                databases.insert(dir.clone(), db);
            }
            let Some(db) = databases.get_mut(&dir) else {
                continue;
            };
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(db.data_path())?;
            let offset = file.seek(SeekFrom::End(0))?;
            file.write_all(&data)?;
            db.entries.push(TocEntry {
                key,
                offset,
                length: data.len() as u64,
            });
        }
        for db in databases.values() {
            db.write_toc()?;
        }
        Ok(())
    }

    fn databases(&self) -> StoreResult<Vec<Database>> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.join(TOC_FILE).is_file())
            .collect();
        dirs.sort();
        dirs.iter().map(|dir| load_database(dir)).collect()
    }

    /// Fields matching `request`, latest only unless `duplicates`.
    pub fn list(&self, request: Option<&Selection>, duplicates: bool) -> StoreResult<Vec<Listed>> {
        let empty = Selection::new();
        let request = request.unwrap_or(&empty);
        let mut listed = Vec::new();
        for db in self.databases()? {
            let entries: Vec<&TocEntry> = if duplicates {
                db.entries.iter().collect()
            } else {
                db.latest()
            };
            listed.extend(
                entries
                    .into_iter()
                    .filter(|e| matches(request, &e.key))
                    .map(|e| Listed {
                        path: db.data_path(),
                        offset: e.offset,
                        length: e.length,
                        key: e.key.clone(),
                    }),
            );
        }
        Ok(listed)
    }

    /// The data of the latest fields matching `request`, concatenated.
    pub fn retrieve(&self, request: &Selection) -> StoreResult<Vec<u8>> {
        let mut out = Vec::new();
        for field in self.list(Some(request), false)? {
            let mut file = fs::File::open(&field.path)?;
            file.seek(SeekFrom::Start(field.offset))?;
            let mut chunk = vec![0u8; field.length as usize];
            file.read_exact(&mut chunk)?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Removes the fields matching `request`, returning the report.
    ///
    /// A database left without fields is deleted. Nothing is touched when a
    /// database to be deleted holds unrecognised files, unless
    /// `unsafe_wipe_all` is set.
    pub fn wipe(
        &self,
        request: &Selection,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    ) -> StoreResult<Vec<String>> {
        struct Plan {
            db: Database,
            removed: usize,
            unrecognised: Vec<PathBuf>,
        }

        let mut plans = Vec::new();
        for mut db in self.databases()? {
            let before = db.entries.len();
            db.entries.retain(|e| !matches(request, &e.key));
            let removed = before - db.entries.len();
            if removed == 0 {
                continue;
            }
            let unrecognised = if db.entries.is_empty() {
                db.unrecognised_files()?
            } else {
                Vec::new()
            };
            plans.push(Plan {
                db,
                removed,
                unrecognised,
            });
        }

        if doit && !unsafe_wipe_all {
            if let Some(plan) = plans.iter().find(|p| !p.unrecognised.is_empty()) {
                return Err(StoreError::Unclean(plan.db.dir.clone()));
            }
        }

        let mut report = Vec::new();
        for plan in &plans {
            let whole = plan.db.entries.is_empty();
            let mut files = if whole { plan.db.owned_files() } else { Vec::new() };
            if unsafe_wipe_all {
                files.extend(plan.unrecognised.iter().cloned());
            }

            if porcelain {
                report.extend(files.iter().map(|f| f.display().to_string()));
            } else {
                report.push(format!("Database: {}", plan.db.dir.display()));
                report.push(format!("  Fields to wipe: {}", plan.removed));
                if !files.is_empty() {
                    report.push("  Files to delete:".to_string());
                    report.extend(files.iter().map(|f| format!("    {}", f.display())));
                }
                if !plan.unrecognised.is_empty() && !unsafe_wipe_all {
                    report.push("  Unrecognised files:".to_string());
                    report.extend(
                        plan.unrecognised
                            .iter()
                            .map(|f| format!("    {}", f.display())),
                    );
                }
            }

            if doit {
                if whole {
                    fs::remove_dir_all(&plan.db.dir)?;
                } else {
                    plan.db.write_toc()?;
                }
            }
        }
        if !doit && !porcelain && !plans.is_empty() {
            report.push("Dry run: nothing deleted. Pass doit to wipe.".to_string());
        }
        Ok(report)
    }

    /// Removes superseded duplicates of fields matching `request`.
    pub fn purge(&self, request: &Selection, doit: bool, porcelain: bool) -> StoreResult<Vec<String>> {
        let mut report = Vec::new();
        for mut db in self.databases()? {
            let latest: Vec<TocEntry> = db.latest().into_iter().cloned().collect();
            let superseded: Vec<TocEntry> = {
                let mut seen = HashSet::new();
                let mut out: Vec<TocEntry> = db
                    .entries
                    .iter()
                    .rev()
                    .filter(|e| !seen.insert(&e.key))
                    .filter(|e| matches(request, &e.key))
                    .cloned()
                    .collect();
                out.reverse();
                out
            };
            if superseded.is_empty() {
                continue;
            }

            let data = db.data_path();
            if porcelain {
                report.extend(
                    superseded
                        .iter()
                        .map(|e| format!("{}:{}:{}", data.display(), e.offset, e.length)),
                );
            } else {
                report.push(format!("Database: {}", db.dir.display()));
                report.push(format!("  Superseded fields: {}", superseded.len()));
            }

            if doit {
                let unmatched_duplicates = db.entries.len() - latest.len() - superseded.len();
                db.entries = if unmatched_duplicates == 0 {
                    latest
                } else {
                    db.entries
                        .iter()
                        .filter(|e| {
                            !superseded
                                .iter()
                                .any(|s| s.offset == e.offset && s.key == e.key)
                        })
                        .cloned()
                        .collect()
                };
                db.write_toc()?;
            }
        }
        Ok(report)
    }
}

fn database_name(key: &Fields) -> String {
    DATABASE_FIELDS
        .iter()
        .map(|f| key.get(*f).map(String::as_str).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

fn load_database(dir: &Path) -> StoreResult<Database> {
    let toc = dir.join(TOC_FILE);
    let entries = if toc.is_file() {
        let text = fs::read_to_string(&toc)?;
        serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(toc.clone(), e.to_string()))?
    } else {
        Vec::new()
    };
    Ok(Database {
        dir: dir.to_path_buf(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        let config = FdbConfig::local(dir.path());
        Store::from_config(&serde_json::to_string(&config).unwrap()).unwrap()
    }

    fn key(step: &str) -> Fields {
        [
            ("class", "rd"),
            ("expver", "xxxx"),
            ("stream", "oper"),
            ("date", "20000101"),
            ("time", "0000"),
            ("domain", "g"),
            ("type", "fc"),
            ("levtype", "sfc"),
            ("param", "138"),
            ("step", step),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn select(pairs: &[(&str, &str)]) -> Selection {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    #[test]
    fn data_is_invisible_until_flushed() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.archive(key("0"), b"abc").unwrap();
        assert!(store.list(None, false).unwrap().is_empty());
        store.flush().unwrap();
        assert_eq!(store.list(None, false).unwrap().len(), 1);
    }

    #[test]
    fn duplicates_keep_latest() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.archive(key("0"), b"old").unwrap();
        store.archive(key("0"), b"new").unwrap();
        store.flush().unwrap();
        assert_eq!(store.list(None, false).unwrap().len(), 1);
        assert_eq!(store.list(None, true).unwrap().len(), 2);
        assert_eq!(store.retrieve(&select(&[("step", "0")])).unwrap(), b"new");
    }

    #[test]
    fn messages_carry_their_key() {
        let fields = [("class", "rd"), ("expver", "xxxx")];
        let data = [encode_message(&fields, b"one"), encode_message(&fields, b"two")].concat();
        let messages = decode_messages(&data).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0["expver"], "xxxx");
        assert!(messages[1].1.ends_with(b"two"));
        assert!(decode_messages(b"{\"key\":{},\"length\":9}\nabc").is_err());
    }

    #[test]
    fn mismatched_request_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let data = encode_message(&[("class", "rd")], b"x");
        let err = store
            .archive_messages(&data, Some(&select(&[("class", "od")])))
            .unwrap_err();
        assert!(matches!(err, StoreError::Mismatch(_)));
    }

    #[test]
    fn expand_drops_all() {
        let mut selection = select(&[("class", "rd"), ("step", "all")]);
        expand(&mut selection);
        assert_eq!(selection, select(&[("class", "rd")]));
    }

    #[test]
    fn schema_order_groups_levels() {
        let key = key("0");
        let ordered = schema_order(&key);
        assert_eq!(ordered[0], ("class", "rd", 0));
        assert_eq!(ordered[6].2, 1);
        assert_eq!(ordered.last().unwrap().2, 2);
    }

    #[test]
    fn purge_removes_superseded() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.archive(key("0"), b"a").unwrap();
        store.archive(key("0"), b"b").unwrap();
        store.archive(key("1"), b"c").unwrap();
        store.flush().unwrap();

        let report = store.purge(&Selection::new(), false, true).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(store.list(None, true).unwrap().len(), 3);

        store.purge(&Selection::new(), true, false).unwrap();
        assert_eq!(store.list(None, true).unwrap().len(), 2);
        assert_eq!(store.retrieve(&select(&[("step", "0")])).unwrap(), b"b");
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let config = FdbConfig::local("/nonexistent/fdb/root");
        let err = Store::from_config(&serde_json::to_string(&config).unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
