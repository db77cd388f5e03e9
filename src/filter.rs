//! Filter and pagination rules shared by the online and offline `list` paths.
//!
//! The same [`ResourceFilter`] is turned into query parameters for the remote
//! service and evaluated locally against mirrored resources, so both paths
//! agree on what a filter means.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::Resource;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Fields scanned by the free-text `search` filter.
pub const SEARCH_FIELDS: [&str; 3] = ["title", "description", "content"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    /// 1-based page number; 0 is read as 1.
    pub page: u32,
    pub page_size: u32,
    /// Case-insensitive substring over title, description and content.
    pub search: Option<String>,
    /// Exact-match constraints keyed by field name.
    pub fields: BTreeMap<String, String>,
}

impl Default for ResourceFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            fields: BTreeMap::new(),
        }
    }
}

impl ResourceFilter {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn effective_page_size(&self) -> u32 {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Whether `resource` satisfies every constraint of this filter.
    pub fn matches(&self, resource: &Resource) -> bool {
        let fields_ok = self.fields.iter().all(|(name, expected)| {
            resource
                .field(name)
                .is_some_and(|v| value_matches(v, expected))
        });
        if !fields_ok {
            return false;
        }
        match self.search_term() {
            None => true,
            Some(term) => SEARCH_FIELDS.iter().any(|f| {
                resource
                    .field(f)
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.to_lowercase().contains(&term))
            }),
        }
    }

    /// Filter then slice out the requested page.
    pub fn apply(&self, resources: Vec<Resource>) -> Page<Resource> {
        let matched: Vec<Resource> = resources.into_iter().filter(|r| self.matches(r)).collect();
        paginate(matched, self.effective_page(), self.effective_page_size())
    }

    /// Query parameters understood by the remote list endpoint.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.effective_page().to_string()),
            ("pageSize".to_string(), self.effective_page_size().to_string()),
        ];
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            pairs.push(("search".to_string(), term.to_string()));
        }
        for (k, v) in &self.fields {
            pairs.push((k.clone(), v.clone()));
        }
        pairs
    }
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|v| value_matches(v, expected)),
        Value::Null | Value::Object(_) => false,
        other => other.to_string() == expected,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

pub fn paginate<T>(items: Vec<T>, page: u32, page_size: u32) -> Page<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total_items = items.len() as u64;
    let total_pages = total_items.div_ceil(page_size as u64) as u32;
    let start = (page as usize - 1).saturating_mul(page_size as usize);
    let data = items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();
    Page {
        data,
        meta: PageMeta {
            page,
            page_size,
            total_items,
            total_pages,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn res(v: Value) -> Resource {
        Resource::from_value(v).unwrap()
    }

    fn sample() -> Vec<Resource> {
        vec![
            res(json!({"id": "1", "title": "Saddle Stitching", "category": "guide", "skillLevel": "beginner"})),
            res(json!({"id": "2", "title": "Edge finishing", "description": "Burnish EDGES with gum", "category": "guide"})),
            res(json!({"id": "3", "title": "Tool care", "content": "Strop the knife", "category": "reference", "tags": ["tools", "care"]})),
            res(json!({"id": "4", "title": "Dyeing", "category": "guide", "published": true, "order": 3})),
        ]
    }

    #[test]
    fn exact_match_on_named_fields() {
        let f = ResourceFilter::default().field("category", "guide");
        let ids: Vec<_> = f.apply(sample()).data.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "4"]);

        let f = ResourceFilter::default().field("category", "Guide");
        assert!(f.apply(sample()).data.is_empty());
    }

    #[test]
    fn exact_match_on_scalars_and_arrays() {
        let f = ResourceFilter::default().field("published", "true");
        assert_eq!(f.apply(sample()).data.len(), 1);
        let f = ResourceFilter::default().field("order", "3");
        assert_eq!(f.apply(sample()).data.len(), 1);
        let f = ResourceFilter::default().field("tags", "care");
        assert_eq!(f.apply(sample()).data[0].id(), "3");
        let f = ResourceFilter::default().field("missing", "x");
        assert!(f.apply(sample()).data.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_across_text_fields() {
        let hits = |term: &str| -> Vec<String> {
            ResourceFilter::default()
                .search(term)
                .apply(sample())
                .data
                .iter()
                .map(|r| r.id().to_string())
                .collect()
        };
        assert_eq!(hits("stitch"), vec!["1"]);
        assert_eq!(hits("edges"), vec!["2"]);
        assert_eq!(hits("KNIFE"), vec!["3"]);
        assert_eq!(hits("   ").len(), 4);
    }

    #[test]
    fn search_and_fields_combine() {
        let f = ResourceFilter::default().search("e").field("category", "reference");
        let page = f.apply(sample());
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id(), "3");
    }

    #[test]
    fn pagination_meta() {
        let page = paginate((1..=45).collect::<Vec<_>>(), 3, 20);
        assert_eq!(page.data, (41..=45).collect::<Vec<_>>());
        assert_eq!(
            page.meta,
            PageMeta { page: 3, page_size: 20, total_items: 45, total_pages: 3 }
        );

        let beyond = paginate(vec![1, 2, 3], 5, 2);
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.meta.total_pages, 2);

        let empty = paginate(Vec::<u8>::new(), 0, 10);
        assert_eq!(empty.meta.page, 1);
        assert_eq!(empty.meta.total_pages, 0);
    }

    #[test]
    fn query_pairs_follow_filter() {
        let f = ResourceFilter::new(10).page(2).search(" dye ").field("category", "guide");
        assert_eq!(
            f.query_pairs(),
            vec![
                ("page".to_string(), "2".to_string()),
                ("pageSize".to_string(), "10".to_string()),
                ("search".to_string(), "dye".to_string()),
                ("category".to_string(), "guide".to_string()),
            ]
        );
    }

    #[test]
    fn page_meta_is_camel_case() {
        let meta = PageMeta { page: 1, page_size: 20, total_items: 2, total_pages: 1 };
        assert_eq!(
            serde_json::to_value(meta).unwrap(),
            json!({"page": 1, "pageSize": 20, "totalItems": 2, "totalPages": 1})
        );
    }
}
