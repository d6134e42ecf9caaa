//! Source adapter contract.
//!
//! Each scraping site plugs into the pipeline through [`SourceAdapter`]:
//! fetch a target under the rate governor, parse an index page into further
//! targets, and parse a detail page into canonical bronze records. Adapters
//! are stateless given their configuration; all rate/robots state lives in
//! the governor and all persistence in the bronze store. Adapters never
//! write to silver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{ScrapeType, SourceId};

/// A fetchable unit of work: a URL plus scheduling hints.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRef {
    pub url: String,
    pub priority: u8,
    /// Whether this target is an index (yields more targets) or a detail
    /// page (yields bronze records).
    pub kind: TargetKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Index,
    Detail,
}

/// Raw bytes plus transport metadata from a fetch.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl RawResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A canonical bronze record produced by an adapter, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScrapeRecord {
    pub scrape_type: ScrapeType,
    pub raw_data: Value,
}

/// Per-source interval hints consumed by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct IntervalHints {
    pub min: Duration,
    pub max: Duration,
}

/// The contract every site-specific scraper implements.
///
/// The scheduler takes the per-host governor lease (robots check included)
/// before calling `fetch` and releases it afterward, so adapters stay a
/// plain transport + parser. Parsing is pure: any network or site-layout
/// failure is returned as a typed error, never a panic.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source identifier.
    fn name(&self) -> SourceId;

    /// Hosts this adapter may touch.
    fn allowed_domains(&self) -> Vec<String>;

    /// Relative scheduling priority (higher runs first).
    fn priority_hint(&self) -> u8 {
        5
    }

    /// Suggested min/max scheduling intervals.
    fn interval_hints(&self) -> IntervalHints {
        IntervalHints {
            min: Duration::from_secs(7_200),
            max: Duration::from_secs(86_400),
        }
    }

    /// Fetch one target, honoring the governor.
    async fn fetch(&self, target: &TargetRef) -> Result<RawResponse>;

    /// Extract next-level targets from an index response (e.g. playlist URLs
    /// from a search page).
    fn parse_index(&self, response: &RawResponse) -> Result<Vec<TargetRef>>;

    /// Extract canonical bronze records from a detail response.
    fn parse_detail(&self, response: &RawResponse) -> Result<Vec<RawScrapeRecord>>;
}

/// Registry of adapters keyed by source, shared by scheduler and CLI.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A>(&mut self, adapter: A)
    where
        A: SourceAdapter + 'static,
    {
        self.adapters.insert(adapter.name(), Arc::new(adapter));
    }

    pub fn get(&self, source: SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
pub mod testing {
    //! A scripted adapter for scheduler and pipeline tests.

    use std::sync::Mutex;

    use super::*;

    pub struct ScriptedAdapter {
        pub source: SourceId,
        pub domains: Vec<String>,
        pub index_targets: Vec<TargetRef>,
        pub detail_records: Vec<RawScrapeRecord>,
        pub fetches: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        pub fn new(source: SourceId, domain: &str) -> Self {
            Self {
                source,
                domains: vec![domain.to_string()],
                index_targets: Vec::new(),
                detail_records: Vec::new(),
                fetches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn name(&self) -> SourceId {
            self.source
        }

        fn allowed_domains(&self) -> Vec<String> {
            self.domains.clone()
        }

        async fn fetch(&self, target: &TargetRef) -> Result<RawResponse> {
            self.fetches.lock().unwrap().push(target.url.clone());
            Ok(RawResponse {
                url: target.url.clone(),
                status: 200,
                headers: HashMap::new(),
                body: Vec::new(),
                elapsed: Duration::from_millis(5),
            })
        }

        fn parse_index(&self, _response: &RawResponse) -> Result<Vec<TargetRef>> {
            Ok(self.index_targets.clone())
        }

        fn parse_detail(&self, _response: &RawResponse) -> Result<Vec<RawScrapeRecord>> {
            Ok(self.detail_records.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedAdapter;
    use super::*;

    #[test]
    fn test_registry_round_trip() {
        let mut registry = AdapterRegistry::new();
        registry.register(ScriptedAdapter::new(
            SourceId::Tracklists1001,
            "www.1001tracklists.com",
        ));
        assert!(registry.get(SourceId::Tracklists1001).is_some());
        assert!(registry.get(SourceId::Mixesdb).is_none());
        assert_eq!(registry.sources(), vec![SourceId::Tracklists1001]);
    }

    #[tokio::test]
    async fn test_scripted_adapter_records_fetches() {
        let adapter = ScriptedAdapter::new(SourceId::Mixesdb, "www.mixesdb.com");
        let target = TargetRef {
            url: "https://www.mixesdb.com/w/Category:Tech_House".to_string(),
            priority: 5,
            kind: TargetKind::Index,
        };
        let response = adapter.fetch(&target).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            adapter.fetches.lock().unwrap().as_slice(),
            &[target.url.clone()]
        );
    }
}
