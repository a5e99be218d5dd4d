//! Listing archived fields.

use crate::api::NativeApi;
use crate::error::FdbResult;
use crate::raw::{RawListIterator, RawSplitKey, Step};
use serde::Serialize;
use std::collections::BTreeMap;
use std::iter::FusedIterator;
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for [`Fdb::list`](crate::Fdb::list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// Also yield entries superseded by later archives of the same key.
    pub duplicates: bool,
    /// Decode every element's metadata into [`ListElement::keys`].
    pub keys: bool,
    /// Decode every element's metadata into [`ListElement::schema`].
    pub schema: bool,
    /// Expand a request built from fields or text before listing.
    pub expand: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            duplicates: false,
            keys: false,
            schema: false,
            expand: true,
        }
    }
}

impl ListOptions {
    /// Sets [`duplicates`](Self::duplicates).
    #[must_use]
    pub fn duplicates(mut self, duplicates: bool) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// Sets [`keys`](Self::keys).
    #[must_use]
    pub fn keys(mut self, keys: bool) -> Self {
        self.keys = keys;
        self
    }

    /// Sets [`schema`](Self::schema).
    #[must_use]
    pub fn schema(mut self, schema: bool) -> Self {
        self.schema = schema;
        self
    }

    /// Sets [`expand`](Self::expand).
    #[must_use]
    pub fn expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    fn wants_metadata(&self) -> bool {
        self.keys || self.schema
    }
}

/// Metadata fields of one schema level.
pub type LevelFields = BTreeMap<String, String>;

/// One listed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListElement {
    /// Storage path (or URI) holding the data.
    pub path: String,
    /// Byte offset within `path`.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
    /// All metadata fields, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<LevelFields>,
    /// Metadata fields grouped by schema level, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<BTreeMap<usize, LevelFields>>,
}

/// Lazy, single-pass iterator over listed fields.
///
/// The native iterator is created up front; each step pulls one element.
/// After the end, or after an error, the iterator yields nothing further.
pub struct ListIterator {
    api: Arc<dyn NativeApi>,
    raw: RawListIterator,
    options: ListOptions,
    exhausted: bool,
}

impl ListIterator {
    pub(crate) fn new(
        api: Arc<dyn NativeApi>,
        raw: RawListIterator,
        options: ListOptions,
    ) -> Self {
        debug!(duplicates = options.duplicates, "created list iterator");
        Self {
            api,
            raw,
            options,
            exhausted: false,
        }
    }

    fn advance(&mut self) -> FdbResult<Option<ListElement>> {
        if self.api.listiterator_next(self.raw)? == Step::Complete {
            return Ok(None);
        }

        let attrs = self.api.listiterator_attrs(self.raw)?;
        let mut element = ListElement {
            path: attrs.path,
            offset: attrs.offset,
            length: attrs.length,
            keys: None,
            schema: None,
        };

        if self.options.wants_metadata() {
            let mut keys = LevelFields::new();
            let mut schema: BTreeMap<usize, LevelFields> = BTreeMap::new();
            let split = SplitKey::new(Arc::clone(&self.api))?;
            self.api.listiterator_splitkey(self.raw, split.raw)?;
            while let Some(field) = self.api.splitkey_next_metadata(split.raw)? {
                schema
                    .entry(field.level)
                    .or_default()
                    .insert(field.key.clone(), field.value.clone());
                keys.insert(field.key, field.value);
            }
            if self.options.keys {
                element.keys = Some(keys);
            }
            if self.options.schema {
                element.schema = Some(schema);
            }
        }

        Ok(Some(element))
    }
}

impl Iterator for ListIterator {
    type Item = FdbResult<ListElement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.advance() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for ListIterator {}

impl Drop for ListIterator {
    fn drop(&mut self) {
        if let Err(e) = self.api.delete_listiterator(self.raw) {
            warn!(error = %e, "failed to release FDB list iterator");
        }
    }
}

struct SplitKey {
    api: Arc<dyn NativeApi>,
    raw: RawSplitKey,
}

impl SplitKey {
    fn new(api: Arc<dyn NativeApi>) -> FdbResult<Self> {
        let raw = api.new_splitkey()?;
        Ok(Self { api, raw })
    }
}

impl Drop for SplitKey {
    fn drop(&mut self) {
        if let Err(e) = self.api.delete_splitkey(self.raw) {
            warn!(error = %e, "failed to release FDB split key");
        }
    }
}
