//! Exact archival coordinates.

use crate::api::{same_api, NativeApi};
use crate::error::{FdbError, FdbResult};
use crate::raw::RawKey;
use crate::request::{check_token, Held};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A native key: field names mapped to single concrete values.
///
/// Fields are sent to the library as they are set. Setting a field twice
/// forwards both values; whether the second overrides the first is up to the
/// library.
pub struct Key {
    api: Arc<dyn NativeApi>,
    raw: RawKey,
    fields: Vec<(String, String)>,
}

impl Key {
    /// Creates an empty key.
    pub fn new(api: Arc<dyn NativeApi>) -> FdbResult<Self> {
        let raw = api.new_key()?;
        Ok(Self {
            api,
            raw,
            fields: Vec::new(),
        })
    }

    /// Creates a key holding `fields`, in order.
    ///
    /// The first rejected field aborts construction and releases the key.
    pub fn from_fields<I, K, V>(api: Arc<dyn NativeApi>, fields: I) -> FdbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut key = Self::new(api)?;
        for (param, value) in fields {
            key.set(param.as_ref(), value.as_ref())?;
        }
        Ok(key)
    }

    /// Sets one field.
    pub fn set(&mut self, param: &str, value: &str) -> FdbResult<()> {
        check_token("key field name", param)?;
        check_token("key value", value)?;
        self.api.key_add(self.raw, param, value)?;
        self.fields.push((param.to_string(), value.to_string()));
        Ok(())
    }

    /// Fields set so far, in the order they were set.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Native key handle.
    pub fn raw(&self) -> RawKey {
        self.raw
    }

    pub(crate) fn api(&self) -> &dyn NativeApi {
        self.api.as_ref()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        if let Err(e) = self.api.delete_key(self.raw) {
            warn!(error = %e, "failed to release FDB key");
        }
    }
}

/// Either an existing [`Key`] or the fields to build one from.
#[derive(Debug)]
pub enum KeyInput<'a> {
    /// Fields to build a fresh key from.
    Fields(Vec<(String, String)>),
    /// A key built by the caller.
    Key(&'a Key),
}

impl<'a> KeyInput<'a> {
    pub(crate) fn resolve(self, api: &Arc<dyn NativeApi>) -> FdbResult<Held<'a, Key>> {
        match self {
            Self::Fields(fields) => Ok(Held::Owned(Key::from_fields(Arc::clone(api), fields)?)),
            Self::Key(key) => {
                if !same_api(key.api(), api.as_ref()) {
                    return Err(FdbError::invalid_argument(
                        "key was created by a different FDB library",
                    ));
                }
                Ok(Held::Borrowed(key))
            }
        }
    }
}

impl<'a> From<&'a Key> for KeyInput<'a> {
    fn from(key: &'a Key) -> Self {
        Self::Key(key)
    }
}

impl<K, V> From<Vec<(K, V)>> for KeyInput<'_>
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(fields: Vec<(K, V)>) -> Self {
        Self::Fields(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for KeyInput<'_>
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(fields: [(K, V); N]) -> Self {
        Self::from(Vec::from(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    #[test]
    fn fields_are_forwarded_in_order() {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn NativeApi> = fake.clone();
        let key = Key::from_fields(Arc::clone(&api), [("class", "rd"), ("expver", "xxxx")]).unwrap();
        assert_eq!(
            key.fields(),
            &[
                ("class".to_string(), "rd".to_string()),
                ("expver".to_string(), "xxxx".to_string())
            ]
        );
        assert_eq!(fake.calls(), vec!["new_key", "key_add class=rd", "key_add expver=xxxx"]);
    }

    #[test]
    fn drop_releases_native_key() {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn NativeApi> = fake.clone();
        drop(Key::new(api).unwrap());
        assert_eq!(fake.calls().last().map(String::as_str), Some("delete_key"));
    }

    #[test]
    fn non_ascii_value_is_rejected_before_native_call() {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn NativeApi> = fake.clone();
        let err = Key::from_fields(api, [("class", "rdé")]).unwrap_err();
        assert!(matches!(err, FdbError::InvalidArgument { .. }));
        assert_eq!(fake.calls(), vec!["new_key", "delete_key"]);
    }

    #[test]
    fn key_from_another_library_is_rejected() {
        let other: Arc<dyn NativeApi> = Arc::new(FakeApi::default());
        let key = Key::new(other).unwrap();
        let api: Arc<dyn NativeApi> = Arc::new(FakeApi::default());
        assert!(KeyInput::from(&key).resolve(&api).is_err());
    }
}
