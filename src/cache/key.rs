//! Deterministic cache keys and invalidation tags.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::upstream::types::Operation;

/// A dependency under which cache entries are indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CacheTag {
    Caller(String),
    Category(String),
}

impl CacheTag {
    /// Category tags compare case- and whitespace-insensitively.
    pub fn category(name: &str) -> Self {
        CacheTag::Category(normalize(name))
    }

    pub fn caller(id: &str) -> Self {
        CacheTag::Caller(id.to_string())
    }
}

/// Builds `operation?name=value&...` with parameters in sorted order, so
/// the same logical request always maps to the same key.
#[derive(Debug, Clone)]
pub struct CacheKey {
    operation: Operation,
    params: BTreeMap<&'static str, String>,
}

impl CacheKey {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter verbatim. Identifiers are case-sensitive.
    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.insert(name, value.into());
        self
    }

    /// Add a free-text parameter, lowercased with whitespace collapsed.
    pub fn text(mut self, name: &'static str, value: &str) -> Self {
        self.params.insert(name, normalize(value));
        self
    }

    pub fn build(&self) -> String {
        if self.params.is_empty() {
            return self.operation.name().to_string();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();
        format!("{}?{}", self.operation.name(), query)
    }
}

/// Lowercase and collapse runs of whitespace to a single space.
pub fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_without_params() {
        assert_eq!(CacheKey::new(Operation::ListCategories).build(), "list_categories");
    }

    #[test]
    fn test_params_sorted_and_encoded() {
        let a = CacheKey::new(Operation::Search)
            .param("caller", "user-1")
            .text("q", "Meal  Planning & Prep")
            .build();
        let b = CacheKey::new(Operation::Search)
            .text("q", "meal planning & prep")
            .param("caller", "user-1")
            .build();
        assert_eq!(a, b);
        assert_eq!(a, "search?caller=user-1&q=meal+planning+%26+prep");
    }

    #[test]
    fn test_caller_ids_stay_case_sensitive() {
        let lower = CacheKey::new(Operation::ListCallerTemplates).param("caller", "abc").build();
        let upper = CacheKey::new(Operation::ListCallerTemplates).param("caller", "ABC").build();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_category_tag_normalized() {
        assert_eq!(CacheTag::category(" Meal   Planning "), CacheTag::category("meal planning"));
    }
}
