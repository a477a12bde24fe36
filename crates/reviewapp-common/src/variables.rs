//! Free-form `key=value` variables declared on a ReviewApp
//!
//! The ReviewApp spec carries variables as plain lines. They are parsed once
//! into a validated mapping; a malformed line is rejected rather than skipped.

use std::collections::BTreeMap;

use crate::Error;

/// Validated, key-ordered mapping of template variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    /// Parse `key=value` lines.
    ///
    /// Whitespace around key and value is trimmed and blank lines are ignored.
    /// The value may itself contain `=`. A line without `=` or with an empty
    /// key is a validation error naming the offending line; a repeated key
    /// keeps the last value.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self, Error> {
        let mut map = BTreeMap::new();
        for (idx, raw) in lines.iter().enumerate() {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::validation_for_field(
                    "variables",
                    format!("spec.variables[{}]", idx),
                    format!("expected key=value, got {:?}", line),
                ));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::validation_for_field(
                    "variables",
                    format!("spec.variables[{}]", idx),
                    format!("empty key in {:?}", line),
                ));
            }
            map.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self(map))
    }

    /// Iterate variables in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
