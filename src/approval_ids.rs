//! Decoding of bulk-approval id lists.
//!
//! Two encodings reach the approval endpoints and both normalise to [`ApprovalIds`]:
//! a JSON body `{"approved_ids": [1, "2"]}` and a url-encoded form with repeated
//! `approved_ids[]=1&approved_ids[]=2` (or `approved_ids=`) fields.

use crate::error::{WorkflowError, WorkflowResult};
use serde_json::Value;
use std::collections::HashSet;

const FIELD: &str = "approved_ids";
const FORM_FIELD: &str = "approved_ids[]";

/// Non-empty list of distinct positive record ids, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalIds(Vec<i64>);

impl ApprovalIds {
    /// Keep the positive integer entries of `raw`; fail if none remain.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if nothing usable is left after filtering.
    pub fn from_raw<I, S>(raw: I) -> WorkflowResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = raw
            .into_iter()
            .filter_map(|entry| parse_id(entry.as_ref()))
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Err(WorkflowError::invalid("No valid record IDs provided."));
        }
        Ok(Self(ids))
    }

    /// # Errors
    ///
    /// `InvalidInput` for malformed JSON, a missing or non-array `approved_ids`,
    /// or no usable ids.
    pub fn from_json(body: &[u8]) -> WorkflowResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| WorkflowError::invalid(format!("Invalid JSON body: {e}")))?;
        let entries = value
            .get(FIELD)
            .and_then(Value::as_array)
            .ok_or_else(|| WorkflowError::invalid("Body must contain an 'approved_ids' array."))?;
        Self::from_raw(entries.iter().map(|entry| match entry {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        }))
    }

    /// # Errors
    ///
    /// `InvalidInput` if no usable ids are present.
    pub fn from_form(body: &[u8]) -> WorkflowResult<Self> {
        Self::from_raw(
            url::form_urlencoded::parse(body)
                .filter(|(key, _)| key == FORM_FIELD || key == FIELD)
                .map(|(_, value)| value.into_owned()),
        )
    }

    /// Pick the decoder from the request content type; JSON unless it is a form.
    ///
    /// # Errors
    ///
    /// As for [`ApprovalIds::from_json`] and [`ApprovalIds::from_form`].
    pub fn decode(content_type: Option<&str>, body: &[u8]) -> WorkflowResult<Self> {
        let is_form = content_type
            .map(|ct| ct.to_ascii_lowercase())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            Self::from_form(body)
        } else {
            Self::from_json(body)
        }
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn parse_id(entry: &str) -> Option<i64> {
    let entry = entry.trim();
    if entry.is_empty() || !entry.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    entry.parse::<i64>().ok().filter(|id| *id > 0)
}
