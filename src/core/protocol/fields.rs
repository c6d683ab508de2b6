//! Typed, mode-aware access to JSON objects.
//!
//! Absent and `null` fields always read as their default. A field that is
//! present with the wrong type reads as its default in lenient mode and is
//! reported as [`DecodeOutcome::InvalidField`] in strict mode.

use serde_json::{Map, Value};

use super::{DecodeMode, DecodeOutcome};
use crate::core::event::WordInfo;

#[derive(Clone, Copy)]
pub(crate) struct Fields<'a> {
    map: &'a Map<String, Value>,
    mode: DecodeMode,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(map: &'a Map<String, Value>, mode: DecodeMode) -> Self {
        Self { map, mode }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn mistyped<T: Default>(&self, key: &str) -> Result<T, DecodeOutcome> {
        if self.mode.is_lenient() {
            Ok(T::default())
        } else {
            Err(DecodeOutcome::InvalidField(key.to_string()))
        }
    }

    pub(crate) fn opt_str(&self, key: &str) -> Result<Option<String>, DecodeOutcome> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => self.mistyped(key),
        }
    }

    pub(crate) fn string(&self, key: &str) -> Result<String, DecodeOutcome> {
        Ok(self.opt_str(key)?.unwrap_or_default())
    }

    pub(crate) fn opt_i64(&self, key: &str) -> Result<Option<i64>, DecodeOutcome> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.as_i64() {
                Some(n) => Ok(Some(n)),
                None => self.mistyped(key),
            },
        }
    }

    pub(crate) fn i64(&self, key: &str) -> Result<i64, DecodeOutcome> {
        Ok(self.opt_i64(key)?.unwrap_or_default())
    }

    pub(crate) fn i32(&self, key: &str) -> Result<i32, DecodeOutcome> {
        let value = self.i64(key)?;
        match i32::try_from(value) {
            Ok(n) => Ok(n),
            Err(_) => self.mistyped(key),
        }
    }

    pub(crate) fn f64(&self, key: &str) -> Result<f64, DecodeOutcome> {
        match self.get(key) {
            None => Ok(0.0),
            Some(v) => match v.as_f64() {
                Some(n) => Ok(n),
                None => self.mistyped(key),
            },
        }
    }

    pub(crate) fn bool(&self, key: &str) -> Result<bool, DecodeOutcome> {
        match self.get(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => self.mistyped(key),
        }
    }

    pub(crate) fn object(&self, key: &str) -> Result<Option<Fields<'a>>, DecodeOutcome> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Fields::new(map, self.mode))),
            Some(_) => self.mistyped(key),
        }
    }

    pub(crate) fn array(&self, key: &str) -> Result<&'a [Value], DecodeOutcome> {
        match self.get(key) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => self.mistyped(key).map(|()| &[][..]),
        }
    }

    /// Parse a word list; `begin_key`/`end_key` differ between dialects.
    pub(crate) fn words(
        &self,
        key: &str,
        begin_key: &str,
        end_key: &str,
    ) -> Result<Vec<WordInfo>, DecodeOutcome> {
        let mut words = Vec::new();
        for item in self.array(key)? {
            let Value::Object(map) = item else {
                self.mistyped::<()>(key)?;
                continue;
            };
            let word = Fields::new(map, self.mode);
            words.push(WordInfo {
                text: word.string("text")?,
                start_time: word.i64(begin_key)?,
                end_time: word.i64(end_key)?,
            });
        }
        Ok(words)
    }
}
