use crate::firestore::value::{values_equal, FirestoreValue};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayValue {
    values: Vec<FirestoreValue>,
}

impl ArrayValue {
    pub fn new(values: Vec<FirestoreValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<FirestoreValue> {
        self.values
    }

    /// Membership test using the same equality the query engine uses.
    pub fn contains(&self, needle: &FirestoreValue) -> bool {
        self.values.iter().any(|candidate| values_equal(candidate, needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_numeric_aware() {
        let array = ArrayValue::new(vec![FirestoreValue::from_integer(1)]);
        assert!(array.contains(&FirestoreValue::from_double(1.0)));
        assert!(!array.contains(&FirestoreValue::from_string("1")));
    }
}
