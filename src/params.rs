use reqwest::Url;

use crate::ApiError;

/// A single query parameter value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    /// Omitted from the query string entirely.
    Null,
    /// Serialized as `key=value`.
    One(String),
    /// Serialized as `key=a&key=b`, one pair per element.
    Many(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::One(value.to_string())
    }
}

macro_rules! param_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    Self::One(value.to_string())
                }
            }
        )*
    };
}

param_from_number!(i32, i64, u32, u64, usize, f64);

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: ToString> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: ToString, const N: usize> From<[T; N]> for ParamValue {
    fn from(values: [T; N]) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

/// Ordered query parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, ParamValue)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter, keeping insertion order.
    pub fn append(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattens into `(key, value)` pairs: arrays repeat their key and nulls
    /// are dropped.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            match value {
                ParamValue::Null => {}
                ParamValue::One(value) => pairs.push((key.as_str(), value.as_str())),
                ParamValue::Many(values) => {
                    pairs.extend(values.iter().map(|value| (key.as_str(), value.as_str())));
                }
            }
        }
        pairs
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Joins `base_url` and `endpoint` and appends `params` as a query string.
pub(crate) fn build_url(
    base_url: &str,
    endpoint: &str,
    params: &QueryParams,
) -> Result<Url, ApiError> {
    let raw = format!("{base_url}{endpoint}");
    let mut url = Url::parse(&raw)
        .map_err(|err| ApiError::Config(format!("invalid request URL '{raw}': {err}")))?;

    let pairs = params.pairs();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}
