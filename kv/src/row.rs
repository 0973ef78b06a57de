//! A table row: an ordered sequence of column values (spec.md §4.5,
//! component C5). Encoded with the same tagged scheme as
//! `encoding::keycode`, so a row survives schema evolution -- a column
//! added after some rows were written decodes as `Value::Null` for those
//! older rows rather than failing.

use crate::encoding::keycode;
use crate::error::CResult;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for value in &self.0 {
            out.extend_from_slice(&keycode::encode_value(value));
        }
        out
    }

    /// Decodes a row, padding any columns missing from `bytes` with
    /// `Value::Null` up to `column_count` (spec.md §4.5 "decoding a row
    /// written before a column was added must yield Null for it").
    pub fn decode(bytes: &[u8], column_count: usize) -> CResult<Self> {
        let mut values = keycode::decode_keys(bytes)?;
        while values.len() < column_count {
            values.push(Value::Null);
        }
        Ok(Row(values))
    }
}

/// Accumulates column values for a row under construction. Reuses its
/// allocation across rows: call `build` to take the values out as a `Row`,
/// which leaves the builder empty and ready for the next row.
#[derive(Default)]
pub struct RowBuilder {
    values: Vec<Value>,
}

impl RowBuilder {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { values: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, value: Value) -> &mut Self {
        self.values.push(value);
        self
    }

    pub fn build(&mut self) -> Row {
        Row(std::mem::take(&mut self.values))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_round_trips() {
        let row = Row::new(vec![Value::Integer(1), Value::Text("hi".into()), Value::Null]);
        let encoded = row.encode();
        let decoded = Row::decode(&encoded, 3).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn decode_pads_columns_added_after_the_row_was_written() {
        let row = Row::new(vec![Value::Integer(1)]);
        let encoded = row.encode();
        let decoded = Row::decode(&encoded, 3).unwrap();
        assert_eq!(decoded.values(), &[Value::Integer(1), Value::Null, Value::Null]);
    }

    #[test]
    fn builder_reuses_allocation_across_rows() {
        let mut builder = RowBuilder::new();
        builder.push(Value::Integer(1)).push(Value::Boolean(true));
        let first = builder.build();
        assert_eq!(first.values(), &[Value::Integer(1), Value::Boolean(true)]);

        builder.push(Value::Text("next".into()));
        let second = builder.build();
        assert_eq!(second.values(), &[Value::Text("next".into())]);
    }
}
