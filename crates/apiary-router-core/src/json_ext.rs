use serde::{Deserialize, Serialize};
use serde_json::map::Entry;
use serde_json::Map;
pub use serde_json::Value;
use std::fmt;

/// A JSON object.
pub type Object = Map<String, Value>;

/// Extension trait for [`serde_json::Value`].
pub trait ValueExt {
    /// Deep merge the JSON objects and arrays, overriding the values in
    /// `&mut self` if they already exist.
    fn deep_merge(&mut self, other: &Self);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: &Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.iter() {
                    match a.entry(key) {
                        Entry::Vacant(e) => {
                            e.insert(value.to_owned());
                        }
                        Entry::Occupied(e) => {
                            e.into_mut().deep_merge(value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (index, value) in a.iter_mut().enumerate() {
                    if let Some(b) = b.get(index) {
                        value.deep_merge(b);
                    }
                }
            }
            (a, b) => {
                *a = b.to_owned();
            }
        }
    }
}

/// An element of a path into a response document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

/// A path into the response document, used to locate GraphQL errors.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Path(Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{}", index)?,
                PathElement::Key(key) => write!(f, "{}", key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge() {
        let mut json = json!({"obj":{"arr":[{"prop1":1},{"prop2":2}]}});
        json.deep_merge(&json!({"obj":{"arr":[{"prop1":2,"prop3":3},{"prop4":4}]}}));
        assert_eq!(
            json,
            json!({"obj":{"arr":[{"prop1":2, "prop3":3},{"prop2":2, "prop4":4}]}})
        );
    }

    #[test]
    fn test_deep_merge_disjoint_roots() {
        let mut json = json!({"apiaries":[{"id":"a1"}]});
        json.deep_merge(&json!({"user":{"id":"u9"}}));
        assert_eq!(
            json,
            json!({"apiaries":[{"id":"a1"}],"user":{"id":"u9"}})
        );
    }

    #[test]
    fn test_path_from_str() {
        let path = Path::from("hives/0/id");
        assert_eq!(path.to_string(), "/hives/0/id");
        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            json!(["hives", 0, "id"])
        );
    }
}
