//! Multiple values
//!
//! `Varargs` is what calls return, what `...` evaluates to and what native
//! functions receive. Missing positions read as `nil`.

use crate::lua::value::Value;

/// An ordered, fixed-length sequence of values
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Varargs(Vec<Value>);

impl Varargs {
    pub fn empty() -> Self {
        Varargs(Vec::new())
    }

    pub fn one(value: impl Into<Value>) -> Self {
        Varargs(vec![value.into()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `index` (0-based), nil when out of range
    pub fn get(&self, index: usize) -> Value {
        self.0.get(index).cloned().unwrap_or(Value::Nil)
    }

    /// Truncation to a single value
    pub fn first(&self) -> Value {
        self.get(0)
    }

    /// Consuming truncation to a single value
    pub fn into_first(self) -> Value {
        self.0.into_iter().next().unwrap_or(Value::Nil)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Append every value of `other` (full expansion)
    pub fn extend(&mut self, other: Varargs) {
        self.0.extend(other.0);
    }

    /// Put `value` in front (implicit receiver / `__call` target)
    pub fn prepend(mut self, value: Value) -> Self {
        self.0.insert(0, value);
        self
    }

    /// Values from position `start` (0-based) on
    pub fn tail(&self, start: usize) -> Varargs {
        Varargs(self.0.get(start..).map(<[Value]>::to_vec).unwrap_or_default())
    }

    /// Exactly `n` values: extra values dropped, missing ones nil
    pub fn into_padded(mut self, n: usize) -> Vec<Value> {
        self.0.resize(n, Value::Nil);
        self.0
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Varargs {
    fn from(values: Vec<Value>) -> Self {
        Varargs(values)
    }
}

impl From<Value> for Varargs {
    fn from(value: Value) -> Self {
        Varargs(vec![value])
    }
}

impl FromIterator<Value> for Varargs {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Varargs(iter.into_iter().collect())
    }
}

impl IntoIterator for Varargs {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[f64]) -> Varargs {
        values.iter().map(|&n| Value::Number(n)).collect()
    }

    #[test]
    fn test_truncation_and_padding() {
        let v = nums(&[1.0, 2.0, 3.0]);
        assert_eq!(v.first(), Value::Number(1.0));
        assert_eq!(v.get(5), Value::Nil);

        let padded = nums(&[1.0]).into_padded(3);
        assert_eq!(padded, vec![Value::Number(1.0), Value::Nil, Value::Nil]);

        let truncated = v.into_padded(2);
        assert_eq!(truncated.len(), 2);
    }

    #[test]
    fn test_empty_first_is_nil() {
        assert_eq!(Varargs::empty().first(), Value::Nil);
        assert_eq!(Varargs::empty().into_first(), Value::Nil);
    }

    #[test]
    fn test_prepend_and_tail() {
        let v = nums(&[2.0, 3.0]).prepend(Value::Number(1.0));
        assert_eq!(v.len(), 3);
        assert_eq!(v.tail(1), nums(&[2.0, 3.0]));
        assert!(v.tail(10).is_empty());
    }
}
