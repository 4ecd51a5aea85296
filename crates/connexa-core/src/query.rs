//! Query parameter builder for list requests.
//!
//! List endpoints take zero-based `page` and `size` parameters plus optional
//! resource-specific filters. Strategies and resource services assemble them here.

use std::fmt::Display;

/// Default page size used when walking list endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound for the page size accepted by the API.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Most pages a single paginated walk may request before giving up.
pub const MAX_LIST_PAGES: u32 = 1000;

/// Builder for assembling query parameter pairs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(&'static str, String)>,
}

impl QueryParams {
    /// Create a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Append a key/value pair when the value is present.
    pub fn push_opt<T>(&mut self, key: &'static str, value: Option<T>)
    where
        T: ToString,
    {
        if let Some(value) = value {
            self.pairs.push((key, value.to_string()));
        }
    }

    /// Append a required key/value pair.
    pub fn push<T>(&mut self, key: &'static str, value: T)
    where
        T: Display,
    {
        self.pairs.push((key, value.to_string()));
    }

    /// Replace (or add) the pagination pair, clamping the size.
    pub fn set_page(&mut self, page: u32, size: u32) {
        self.pairs.retain(|(key, _)| *key != "page" && *key != "size");
        self.pairs.push(("page", page.to_string()));
        self.pairs
            .push(("size", size.clamp(1, MAX_PAGE_SIZE).to_string()));
    }

    /// Look up the first value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Return the collected key/value pairs.
    #[must_use]
    pub fn into_pairs(self) -> Vec<(&'static str, String)> {
        self.pairs
    }

    /// Returns true if no parameters have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_opt_skips_none() {
        let mut params = QueryParams::new();
        params.push_opt("email", Option::<String>::None);
        assert!(params.is_empty());
    }

    #[test]
    fn set_page_replaces_previous_values() {
        let mut params = QueryParams::new();
        params.push("networkId", "n-1");
        params.set_page(0, 50);
        params.set_page(3, 5000);

        assert_eq!(params.get("page"), Some("3"));
        assert_eq!(params.get("size"), Some("1000"));
        assert_eq!(params.get("networkId"), Some("n-1"));
        assert_eq!(params.into_pairs().len(), 3);
    }
}
