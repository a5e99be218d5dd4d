//! Query and archive descriptors.

use crate::api::{same_api, NativeApi};
use crate::error::{FdbError, FdbResult};
use crate::raw::RawRequest;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

/// Pseudo-field naming the request verb. It is never sent as a field.
pub const VERB: &str = "verb";

/// One request value before stringification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    /// Text value.
    Text(String),
    /// Integer value, sent in decimal.
    Integer(i64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Integer(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Scalar {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for Scalar {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

macro_rules! integer_scalars {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Scalar {
                fn from(n: $ty) -> Self {
                    Self::Integer(i64::from(n))
                }
            }
        )*
    };
}

integer_scalars!(i8, i16, i32, i64, u8, u16, u32);

/// The value of one request field: a single scalar or a list of
/// alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestValue {
    /// One value.
    Single(Scalar),
    /// Several alternative values.
    List(Vec<Scalar>),
}

impl RequestValue {
    /// The values as sent to the library.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Self::Single(scalar) => vec![scalar.to_string()],
            Self::List(scalars) => scalars.iter().map(ToString::to_string).collect(),
        }
    }
}

macro_rules! single_values {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for RequestValue {
                fn from(value: $ty) -> Self {
                    Self::Single(value.into())
                }
            }
        )*
    };
}

single_values!(Scalar, &str, String, &String, i8, i16, i32, i64, u8, u16, u32);

impl<T: Into<Scalar>> From<Vec<T>> for RequestValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Scalar>, const N: usize> From<[T; N]> for RequestValue {
    fn from(values: [T; N]) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Rejects names and values the library cannot receive.
pub(crate) fn check_token(what: &str, value: &str) -> FdbResult<()> {
    if !value.is_ascii() {
        return Err(FdbError::invalid_argument(format!(
            "{what} {value:?} is not ASCII"
        )));
    }
    if value.contains('\0') {
        return Err(FdbError::invalid_argument(format!(
            "{what} {value:?} contains a NUL byte"
        )));
    }
    Ok(())
}

/// Parses request text such as `class=rd,expver=xxxx,date=20200101/20200102`.
///
/// Fields are separated by `,` and the alternatives of one field by `/`.
/// Whitespace around names and values is ignored, as are empty fields.
pub fn parse_request_str(text: &str) -> FdbResult<Vec<(String, Vec<String>)>> {
    let mut fields = Vec::new();
    for token in text.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (name, values) = token.split_once('=').ok_or_else(|| {
            FdbError::invalid_argument(format!("request field {token:?} has no '='"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(FdbError::invalid_argument(format!(
                "request field {token:?} has no name"
            )));
        }
        let values: Vec<String> = values.split('/').map(|v| v.trim().to_string()).collect();
        if values.iter().any(String::is_empty) {
            return Err(FdbError::invalid_argument(format!(
                "request field {name:?} has an empty value"
            )));
        }
        fields.push((name.to_string(), values));
    }
    Ok(fields)
}

/// A native request: field names mapped to lists of alternative values.
pub struct Request {
    api: Arc<dyn NativeApi>,
    raw: RawRequest,
    fields: Vec<(String, Vec<String>)>,
    verb: Option<String>,
}

impl Request {
    /// Creates an empty request.
    pub fn new(api: Arc<dyn NativeApi>) -> FdbResult<Self> {
        let raw = api.new_request()?;
        Ok(Self {
            api,
            raw,
            fields: Vec::new(),
            verb: None,
        })
    }

    /// Creates a request holding `fields`, in order.
    pub fn from_fields<I, K, V>(api: Arc<dyn NativeApi>, fields: I) -> FdbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<RequestValue>,
    {
        let mut request = Self::new(api)?;
        for (param, value) in fields {
            request.set(param.as_ref(), value)?;
        }
        Ok(request)
    }

    /// Creates a request from its text form. See [`parse_request_str`].
    pub fn parse(api: Arc<dyn NativeApi>, text: &str) -> FdbResult<Self> {
        let fields = parse_request_str(text)?;
        Self::from_fields(api, fields)
    }

    /// Sets the values of one field.
    ///
    /// The `verb` pseudo-field is remembered but not sent; an empty name is
    /// ignored.
    pub fn set(&mut self, param: &str, value: impl Into<RequestValue>) -> FdbResult<()> {
        let values = value.into().to_strings();
        if param.is_empty() {
            return Ok(());
        }
        if param == VERB {
            self.verb = values.into_iter().next();
            return Ok(());
        }

        check_token("request field name", param)?;
        for value in &values {
            check_token("request value", value)?;
        }
        self.api.request_add(self.raw, param, &values)?;

        match self.fields.iter_mut().find(|(name, _)| name == param) {
            Some((_, slot)) => *slot = values,
            None => self.fields.push((param.to_string(), values)),
        }
        Ok(())
    }

    /// Values of one field as last set.
    pub fn value(&self, param: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, values)| values.as_slice())
    }

    /// Fields set so far, in the order they were first set.
    pub fn fields(&self) -> &[(String, Vec<String>)] {
        &self.fields
    }

    /// The verb given, if any.
    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Asks the library to resolve defaults and aliases.
    ///
    /// The local field record is not updated; the library owns the
    /// expanded form.
    pub fn expand(&mut self) -> FdbResult<()> {
        self.api.expand_request(self.raw)
    }

    /// Native request handle.
    pub fn raw(&self) -> RawRequest {
        self.raw
    }

    pub(crate) fn api(&self) -> &dyn NativeApi {
        self.api.as_ref()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(k, v)| (k, v.join("/"))))
            .finish()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, values)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={}", values.join("/"))?;
        }
        Ok(())
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Err(e) = self.api.delete_request(self.raw) {
            warn!(error = %e, "failed to release FDB request");
        }
    }
}

/// A value that is either borrowed from the caller or built for one call.
pub(crate) enum Held<'a, T> {
    Borrowed(&'a T),
    Owned(T),
}

impl<T> Deref for Held<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Borrowed(value) => value,
            Self::Owned(value) => value,
        }
    }
}

/// Either an existing [`Request`] or a description to build one from.
#[derive(Debug)]
pub enum RequestInput<'a> {
    /// Fields to build a fresh request from.
    Fields(Vec<(String, RequestValue)>),
    /// Request text, see [`parse_request_str`].
    Text(String),
    /// A request built by the caller, used as is.
    Request(&'a Request),
}

impl<'a> RequestInput<'a> {
    /// Builds (and optionally expands) a fresh request, or checks that a
    /// caller's request belongs to `api`.
    pub(crate) fn resolve(
        self,
        api: &Arc<dyn NativeApi>,
        expand: bool,
    ) -> FdbResult<Held<'a, Request>> {
        let mut request = match self {
            Self::Fields(fields) => Request::from_fields(Arc::clone(api), fields)?,
            Self::Text(text) => Request::parse(Arc::clone(api), &text)?,
            Self::Request(request) => {
                if !same_api(request.api(), api.as_ref()) {
                    return Err(FdbError::invalid_argument(
                        "request was created by a different FDB library",
                    ));
                }
                return Ok(Held::Borrowed(request));
            }
        };
        if expand {
            request.expand()?;
        }
        Ok(Held::Owned(request))
    }
}

impl<'a> From<&'a Request> for RequestInput<'a> {
    fn from(request: &'a Request) -> Self {
        Self::Request(request)
    }
}

impl From<&str> for RequestInput<'_> {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RequestInput<'_> {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl<K, V> From<Vec<(K, V)>> for RequestInput<'_>
where
    K: Into<String>,
    V: Into<RequestValue>,
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

impl<K, V, const N: usize> From<[(K, V); N]> for RequestInput<'_>
where
    K: Into<String>,
    V: Into<RequestValue>,
{
    fn from(fields: [(K, V); N]) -> Self {
        Self::from(Vec::from(fields))
    }
}

impl<K, V> From<BTreeMap<K, V>> for RequestInput<'_>
where
    K: Into<String>,
    V: Into<RequestValue>,
{
    fn from(fields: BTreeMap<K, V>) -> Self {
        Self::Fields(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use proptest::prelude::*;

    fn fake() -> (Arc<FakeApi>, Arc<dyn NativeApi>) {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn NativeApi> = fake.clone();
        (fake, api)
    }

    #[test]
    fn scalars_and_integers_are_normalised() {
        assert_eq!(RequestValue::from("rd").to_strings(), vec!["rd"]);
        assert_eq!(RequestValue::from(138).to_strings(), vec!["138"]);
        assert_eq!(
            RequestValue::from(vec![Scalar::from("0"), Scalar::from(12)]).to_strings(),
            vec!["0", "12"]
        );
    }

    #[test]
    fn verb_is_not_sent() {
        let (fake, api) = fake();
        let request = Request::from_fields(
            api,
            vec![
                ("verb", RequestValue::from("retrieve")),
                ("class", RequestValue::from("rd")),
                ("step", RequestValue::from([0, 6])),
            ],
        )
        .unwrap();
        assert_eq!(request.verb(), Some("retrieve"));
        assert_eq!(request.value("step"), Some(&["0".to_string(), "6".to_string()][..]));
        assert!(request.value("verb").is_none());
        assert_eq!(
            fake.calls(),
            vec!["new_request", "request_add class=rd", "request_add step=0/6"]
        );
    }

    #[test]
    fn setting_a_field_again_replaces_its_record() {
        let (_fake, api) = fake();
        let mut request = Request::from_fields(api, [("date", "20200101")]).unwrap();
        request.set("date", vec!["20200102", "20200103"]).unwrap();
        assert_eq!(request.fields().len(), 1);
        assert_eq!(request.to_string(), "date=20200102/20200103");
    }

    #[test]
    fn parse_splits_fields_and_values() {
        let fields = parse_request_str(" class = rd , date=20200101/20200102,, ").unwrap();
        assert_eq!(
            fields,
            vec![
                ("class".to_string(), vec!["rd".to_string()]),
                (
                    "date".to_string(),
                    vec!["20200101".to_string(), "20200102".to_string()]
                ),
            ]
        );
        assert!(parse_request_str("").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        assert!(matches!(
            parse_request_str("class"),
            Err(FdbError::InvalidArgument { .. })
        ));
        assert!(parse_request_str("=rd").is_err());
        assert!(parse_request_str("date=1//2").is_err());
    }

    #[test]
    fn text_input_expands_when_asked() {
        let (fake, api) = fake();
        let held = RequestInput::from("class=rd").resolve(&api, true).unwrap();
        drop(held);
        assert_eq!(
            fake.calls(),
            vec!["new_request", "request_add class=rd", "expand_request", "delete_request"]
        );
    }

    #[test]
    fn borrowed_request_is_not_expanded_again() {
        let (fake, api) = fake();
        let request = Request::from_fields(Arc::clone(&api), [("class", "rd")]).unwrap();
        let held = RequestInput::from(&request).resolve(&api, true).unwrap();
        assert_eq!(held.raw(), request.raw());
        assert!(!fake.calls().iter().any(|c| c == "expand_request"));
    }

    #[test]
    fn nul_in_value_is_rejected() {
        let (_fake, api) = fake();
        let err = Request::from_fields(api, [("class", "r\0d")]).unwrap_err();
        assert!(matches!(err, FdbError::InvalidArgument { .. }));
    }

    proptest! {
        #[test]
        fn rendered_requests_parse_back(
            fields in prop::collection::vec(
                ("[a-z]{1,8}", prop::collection::vec("[a-z0-9]{1,6}", 1..4)),
                0..6,
            )
        ) {
            let text = fields
                .iter()
                .map(|(name, values)| format!("{name}={}", values.join("/")))
                .collect::<Vec<_>>()
                .join(",");
            prop_assert_eq!(parse_request_str(&text).unwrap(), fields);
        }
    }
}
