//! Listing resources, query normalization and cache keys.
//!
//! Raw request parameters are normalized into a [`ListingQuery`] exactly
//! once; both the cache key and the source query are derived from that
//! normalized form, so the two cannot drift apart.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemehub_core::Collection;

use crate::config::PagingSettings;
use crate::error::CacheError;

// ============================================================================
// Resources
// ============================================================================

/// A cached listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// All states, sorted by name
    States,
    /// States with scheme and discussion counts
    StatesSummary,
    /// Categories with scheme counts
    CategoriesSummary,
    /// One page of categories
    Categories,
    /// One page of schemes, optionally filtered by state and category
    Schemes,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::States,
        Resource::StatesSummary,
        Resource::CategoriesSummary,
        Resource::Categories,
        Resource::Schemes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::States => "states",
            Resource::StatesSummary => "statesSummary",
            Resource::CategoriesSummary => "categoriesSummary",
            Resource::Categories => "categories",
            Resource::Schemes => "schemes",
        }
    }

    /// Whole aggregates take no parameters and live in every tier.
    pub fn is_whole(&self) -> bool {
        matches!(
            self,
            Resource::States | Resource::StatesSummary | Resource::CategoriesSummary
        )
    }

    /// Collections whose changes invalidate this resource.
    pub fn dependencies(&self) -> &'static [Collection] {
        match self {
            Resource::States => &[Collection::States],
            Resource::StatesSummary => &[
                Collection::States,
                Collection::Schemes,
                Collection::Discussions,
            ],
            Resource::CategoriesSummary => &[Collection::Categories, Collection::Schemes],
            Resource::Categories => &[Collection::Categories],
            Resource::Schemes => &[
                Collection::Schemes,
                Collection::States,
                Collection::Categories,
            ],
        }
    }

    pub fn depends_on(&self, collection: Collection) -> bool {
        self.dependencies().contains(&collection)
    }

    pub fn whole() -> impl Iterator<Item = Resource> {
        Self::ALL.into_iter().filter(Resource::is_whole)
    }

    /// Every collection some resource depends on, without duplicates.
    pub fn watched_collections() -> Vec<Collection> {
        let mut out: Vec<Collection> = Self::ALL
            .iter()
            .flat_map(|r| r.dependencies().iter().copied())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CacheError::UnknownResource(s.to_string()))
    }
}

// ============================================================================
// Cache keys
// ============================================================================

/// Normalized query parameters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Deterministic distributed cache key.
///
/// Format: `{namespace}:{resource}` or `{namespace}:{resource}?a=1&b=2`
/// with parameters in name order and `%`, `&`, `=`, `?` percent-escaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn build(namespace: &str, resource: &str, params: &QueryParams) -> Self {
        let mut key = format!("{namespace}:{resource}");
        for (i, (name, value)) in params.iter().enumerate() {
            key.push(if i == 0 { '?' } else { '&' });
            key.push_str(&escape(name));
            key.push('=');
            key.push_str(&escape(value));
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            c => out.push(c),
        }
    }
    out
}

// ============================================================================
// Listing queries
// ============================================================================

/// Pagination window of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
}

/// Scheme listing filters. A slug overrides the id of the same kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeFilter {
    pub state_id: Option<String>,
    pub state_slug: Option<String>,
    pub category_id: Option<String>,
    pub category_slug: Option<String>,
}

/// A fully normalized request for one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    resource: Resource,
    page: Option<Page>,
    filter: SchemeFilter,
}

impl ListingQuery {
    /// Query with every parameter at its default. Paginated resources get
    /// the first page at the default limit configured in `paging`.
    pub fn defaults(resource: Resource, paging: &PagingSettings) -> Self {
        let raw: [(&str, &str); 0] = [];
        Self::parse_resource(resource, raw, paging)
    }

    /// Normalizes raw request parameters for `resource_name`.
    ///
    /// Empty values count as absent, unknown names are dropped, a malformed
    /// or zero `limit` falls back to the default and a large one is clamped.
    /// Later duplicates replace earlier ones.
    pub fn parse<I, K, V>(
        resource_name: &str,
        raw: I,
        paging: &PagingSettings,
    ) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let resource = resource_name.parse::<Resource>()?;
        Ok(Self::parse_resource(resource, raw, paging))
    }

    pub fn parse_resource<I, K, V>(resource: Resource, raw: I, paging: &PagingSettings) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in raw {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            values.insert(name.as_ref().trim().to_string(), value.to_string());
        }
        let take = |name: &str| values.get(name).cloned();

        let default_limit = match resource {
            Resource::Schemes => paging.schemes_default_limit,
            _ => paging.categories_default_limit,
        };
        let page = (!resource.is_whole()).then(|| Page {
            skip: take("skip")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
            limit: take("limit")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|l| *l > 0)
                .unwrap_or(default_limit)
                .min(paging.max_page_limit),
        });

        let filter = if resource == Resource::Schemes {
            let state_slug = take("stateSlug");
            let category_slug = take("categorySlug");
            SchemeFilter {
                state_id: take("stateId").filter(|_| state_slug.is_none()),
                state_slug,
                category_id: take("categoryId").filter(|_| category_slug.is_none()),
                category_slug,
            }
        } else {
            SchemeFilter::default()
        };

        Self {
            resource,
            page,
            filter,
        }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn page(&self) -> Option<Page> {
        self.page
    }

    pub fn filter(&self) -> &SchemeFilter {
        &self.filter
    }

    pub fn is_whole(&self) -> bool {
        self.resource.is_whole()
    }

    /// The canonical parameters, defaults included.
    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        if let Some(page) = self.page {
            params.insert("skip", page.skip.to_string());
            params.insert("limit", page.limit.to_string());
        }
        let f = &self.filter;
        for (name, value) in [
            ("stateId", &f.state_id),
            ("stateSlug", &f.state_slug),
            ("categoryId", &f.category_id),
            ("categorySlug", &f.category_slug),
        ] {
            if let Some(value) = value {
                params.insert(name, value.clone());
            }
        }
        params
    }

    pub fn cache_key(&self, namespace: &str) -> CacheKey {
        CacheKey::build(namespace, self.resource.as_str(), &self.params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paging() -> PagingSettings {
        PagingSettings::default()
    }

    #[test]
    fn resource_names_round_trip() {
        for r in Resource::ALL {
            assert_eq!(r.as_str().parse::<Resource>().unwrap(), r);
        }
        assert_eq!(
            "STATESSUMMARY".parse::<Resource>().unwrap(),
            Resource::StatesSummary
        );
        assert!(matches!(
            "users".parse::<Resource>(),
            Err(CacheError::UnknownResource(_))
        ));
    }

    #[test]
    fn dependencies_cover_summary_counts() {
        assert!(Resource::StatesSummary.depends_on(Collection::Discussions));
        assert!(!Resource::States.depends_on(Collection::Schemes));
        assert_eq!(
            Resource::whole().collect::<Vec<_>>(),
            vec![
                Resource::States,
                Resource::StatesSummary,
                Resource::CategoriesSummary
            ]
        );
        assert_eq!(
            Resource::watched_collections(),
            vec![
                Collection::States,
                Collection::Categories,
                Collection::Schemes,
                Collection::Discussions
            ]
        );
    }

    #[test]
    fn key_ignores_parameter_order() {
        let a = ListingQuery::parse(
            "schemes",
            [("stateId", "s1"), ("limit", "4"), ("skip", "8")],
            &paging(),
        )
        .unwrap();
        let b = ListingQuery::parse(
            "schemes",
            [("skip", "8"), ("stateId", "s1"), ("limit", "4")],
            &paging(),
        )
        .unwrap();
        assert_eq!(a.cache_key("ns"), b.cache_key("ns"));
        assert_eq!(a.cache_key("ns").as_str(), "ns:schemes?limit=4&skip=8&stateId=s1");
    }

    #[test]
    fn omitted_defaults_match_explicit_defaults() {
        let omitted = ListingQuery::parse("categories", Vec::<(&str, &str)>::new(), &paging())
            .unwrap();
        let explicit =
            ListingQuery::parse("categories", [("skip", "0"), ("limit", "11")], &paging())
                .unwrap();
        let junk = ListingQuery::parse(
            "categories",
            [("skip", "-3"), ("limit", "abc"), ("sort", "name"), ("stateId", "s1")],
            &paging(),
        )
        .unwrap();
        assert_eq!(omitted.cache_key("ns"), explicit.cache_key("ns"));
        assert_eq!(omitted.cache_key("ns"), junk.cache_key("ns"));
    }

    #[test]
    fn empty_values_are_absent_and_limit_is_clamped() {
        let q = ListingQuery::parse(
            "schemes",
            [("stateId", ""), ("limit", "100000"), ("categoryId", "  ")],
            &paging(),
        )
        .unwrap();
        assert_eq!(q.page(), Some(Page { skip: 0, limit: 100 }));
        assert_eq!(q.filter(), &SchemeFilter::default());

        let zero = ListingQuery::parse("schemes", [("limit", "0")], &paging()).unwrap();
        assert_eq!(zero.page().unwrap().limit, 4);
    }

    #[test]
    fn slug_overrides_id() {
        let with_both = ListingQuery::parse(
            "schemes",
            [("stateId", "s1"), ("stateSlug", "kerala")],
            &paging(),
        )
        .unwrap();
        let slug_only = ListingQuery::parse("schemes", [("stateSlug", "kerala")], &paging())
            .unwrap();
        assert_eq!(with_both, slug_only);
        assert_eq!(with_both.filter().state_id, None);
    }

    #[test]
    fn whole_resources_take_no_parameters() {
        let q = ListingQuery::parse("statesSummary", [("limit", "2"), ("skip", "1")], &paging())
            .unwrap();
        assert!(q.is_whole());
        assert!(q.params().is_empty());
        assert_eq!(q.cache_key("schemehub").as_str(), "schemehub:statesSummary");
        assert_eq!(q, ListingQuery::defaults(Resource::StatesSummary, &paging()));
    }

    #[test]
    fn defaults_follow_configured_paging() {
        let paging = PagingSettings {
            categories_default_limit: 3,
            schemes_default_limit: 7,
            ..PagingSettings::default()
        };
        assert_eq!(
            ListingQuery::defaults(Resource::Categories, &paging).page(),
            Some(Page { skip: 0, limit: 3 })
        );
        assert_eq!(
            ListingQuery::defaults(Resource::Schemes, &paging)
                .cache_key("ns")
                .as_str(),
            "ns:schemes?limit=7&skip=0"
        );
        assert_eq!(ListingQuery::defaults(Resource::States, &paging).page(), None);
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let q = ListingQuery::parse("schemes", [("stateSlug", "a&b=c?d%")], &paging()).unwrap();
        assert_eq!(
            q.cache_key("ns").as_str(),
            "ns:schemes?limit=4&skip=0&stateSlug=a%26b%3Dc%3Fd%25"
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const PARAM_NAMES: [&str; 7] = [
            "skip",
            "limit",
            "stateId",
            "stateSlug",
            "categoryId",
            "categorySlug",
            "sort",
        ];

        fn arb_resource() -> impl Strategy<Value = Resource> {
            prop::sample::select(Resource::ALL.to_vec())
        }

        /// Distinct parameters in sorted order, plus the same set shuffled.
        fn arb_params() -> impl Strategy<Value = (Vec<(String, String)>, Vec<(String, String)>)> {
            prop::collection::btree_map(
                prop::sample::select(PARAM_NAMES.to_vec()).prop_map(str::to_string),
                "[a-z0-9-]{1,8}",
                0..PARAM_NAMES.len(),
            )
            .prop_flat_map(|params| {
                let ordered: Vec<(String, String)> = params.into_iter().collect();
                (Just(ordered.clone()), Just(ordered).prop_shuffle())
            })
        }

        fn default_limit(resource: Resource, paging: &PagingSettings) -> u64 {
            match resource {
                Resource::Schemes => paging.schemes_default_limit,
                _ => paging.categories_default_limit,
            }
        }

        proptest! {
            #[test]
            fn equivalent_requests_share_a_key(
                resource in arb_resource(),
                (ordered, shuffled) in arb_params(),
                blanks in prop::collection::vec(prop::sample::select(PARAM_NAMES.to_vec()), 0..4),
            ) {
                let paging = PagingSettings::default();
                let base = ListingQuery::parse_resource(resource, ordered.clone(), &paging);

                let mut variant: Vec<(String, String)> = blanks
                    .iter()
                    .map(|name| (name.to_string(), String::new()))
                    .collect();
                variant.extend(shuffled);
                let has = |name: &str| ordered.iter().any(|(n, _)| n == name);
                if !has("skip") {
                    variant.push(("skip".to_string(), "0".to_string()));
                }
                if !has("limit") {
                    variant.push(("limit".to_string(), default_limit(resource, &paging).to_string()));
                }
                variant.extend(blanks.iter().map(|name| (name.to_string(), " ".to_string())));

                let other = ListingQuery::parse_resource(resource, variant, &paging);
                prop_assert_eq!(base.cache_key("ns"), other.cache_key("ns"));
            }

            #[test]
            fn keys_differ_across_resources(
                a in arb_resource(),
                b in arb_resource(),
                (ordered, _) in arb_params(),
            ) {
                prop_assume!(a != b);
                let paging = PagingSettings::default();
                let ka = ListingQuery::parse_resource(a, ordered.clone(), &paging).cache_key("ns");
                let kb = ListingQuery::parse_resource(b, ordered, &paging).cache_key("ns");
                prop_assert_ne!(ka, kb);
            }
        }
    }
}
