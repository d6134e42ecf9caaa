//! Robots.txt compliance and per-host rate governing.
//!
//! One token bucket per host: the refill interval is the larger of the host's
//! robots.txt crawl-delay and the configured minimum (conservative default
//! 10 s). At most one request per host is in flight at a time; callers take a
//! lease with [`RateGovernor::acquire`] and must release it with
//! [`RateGovernor::mark_complete`]. A 429 doubles the effective delay up to
//! 4x the base; sustained success relaxes it back toward the base.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::GovernorSettings;
use crate::error::{PipelineError, Result};

/// Parsed robots.txt rules for one host.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    pub disallow: Vec<String>,
    pub allow: Vec<String>,
    pub crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Longest-prefix-match allow/disallow decision for a URL path.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        let disallow_len = self
            .disallow
            .iter()
            .filter(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
            .map(|prefix| prefix.len())
            .max();
        let allow_len = self
            .allow
            .iter()
            .filter(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
            .map(|prefix| prefix.len())
            .max();
        match (disallow_len, allow_len) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(d), Some(a)) => a >= d,
        }
    }
}

/// Parse robots.txt for the group matching `user_agent`, falling back to the
/// `*` group. Only the directives we enforce are read.
pub fn parse_robots(body: &str, user_agent: &str) -> RobotsRules {
    let agent_token = user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or(user_agent)
        .to_lowercase();

    let mut star = RobotsRules::default();
    let mut matched = RobotsRules::default();
    let mut has_matched_group = false;

    let mut in_star = false;
    let mut in_matched = false;
    // A blank line or a new User-agent after directives ends a group; serial
    // User-agent lines share the following directives.
    let mut group_has_directives = false;

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                if group_has_directives {
                    in_star = false;
                    in_matched = false;
                    group_has_directives = false;
                }
                let agent = value.to_lowercase();
                if agent == "*" {
                    in_star = true;
                } else if agent_token.contains(&agent) || agent.contains(&agent_token) {
                    in_matched = true;
                    has_matched_group = true;
                }
            }
            "disallow" => {
                group_has_directives = true;
                if in_matched {
                    matched.disallow.push(value.to_string());
                }
                if in_star {
                    star.disallow.push(value.to_string());
                }
            }
            "allow" => {
                group_has_directives = true;
                if in_matched {
                    matched.allow.push(value.to_string());
                }
                if in_star {
                    star.allow.push(value.to_string());
                }
            }
            "crawl-delay" => {
                group_has_directives = true;
                let delay = value.parse::<f64>().ok().map(Duration::from_secs_f64);
                if in_matched {
                    matched.crawl_delay = delay;
                }
                if in_star {
                    star.crawl_delay = delay;
                }
            }
            _ => {
                group_has_directives = true;
            }
        }
    }

    if has_matched_group {
        matched
    } else {
        star
    }
}

/// Per-host request counters, exposed for the scheduler's adaptive intervals.
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rate_limit_hits: u64,
    pub last_response_time: Option<Duration>,
}

impl HostStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }
}

/// Outcome of a governed request, reported back when releasing the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    RateLimited,
    Failure,
}

#[derive(Debug)]
struct HostState {
    base_delay: Duration,
    effective_delay: Duration,
    next_allowed_at: Instant,
    in_flight: bool,
    stats: HostStats,
}

impl HostState {
    fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            effective_delay: base_delay,
            next_allowed_at: Instant::now(),
            in_flight: false,
            stats: HostStats::default(),
        }
    }
}

struct CachedRobots {
    rules: Arc<RobotsRules>,
    fetched_at: Instant,
}

/// The shared robots + rate-limit handle, one per process.
pub struct RateGovernor {
    settings: GovernorSettings,
    client: Client,
    robots: DashMap<String, CachedRobots>,
    hosts: Mutex<HashMap<String, HostState>>,
}

impl RateGovernor {
    pub fn new(settings: GovernorSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            settings,
            client,
            robots: DashMap::new(),
            hosts: Mutex::new(HashMap::new()),
        })
    }

    /// Host portion of a URL, or a validation error.
    pub fn host_of(url: &str) -> Result<String> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| PipelineError::Validation(format!("bad url {}: {}", url, e)))?;
        parsed
            .host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| PipelineError::Validation(format!("url without host: {}", url)))
    }

    /// Whether robots.txt permits fetching this URL.
    pub async fn is_allowed(&self, url: &str) -> Result<bool> {
        let host = Self::host_of(url)?;
        let rules = self.rules_for(&host).await;
        let path = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        Ok(rules.is_path_allowed(&path))
    }

    /// Effective crawl delay for a host: robots crawl-delay floored at the
    /// configured minimum.
    pub async fn crawl_delay(&self, host: &str) -> Duration {
        let rules = self.rules_for(host).await;
        rules
            .crawl_delay
            .map(|d| d.max(self.settings.default_crawl_delay))
            .unwrap_or(self.settings.default_crawl_delay)
    }

    /// Block until this URL may be fetched, honoring robots.txt and the host
    /// bucket, then take the host lease. Returns the host name for
    /// [`Self::mark_complete`].
    pub async fn acquire(&self, url: &str) -> Result<String> {
        if !self.is_allowed(url).await? {
            return Err(PipelineError::RobotsDenied {
                url: url.to_string(),
            });
        }
        let host = Self::host_of(url)?;
        let base_delay = self.crawl_delay(&host).await;

        loop {
            let wait = {
                let mut hosts = self.hosts.lock().await;
                let state = hosts
                    .entry(host.clone())
                    .or_insert_with(|| HostState::new(base_delay));
                let now = Instant::now();
                if !state.in_flight && now >= state.next_allowed_at {
                    state.in_flight = true;
                    state.stats.total_requests += 1;
                    return Ok(host);
                }
                if state.in_flight {
                    // Poll again shortly; the lease holder sets the next slot.
                    Duration::from_millis(250)
                } else {
                    state.next_allowed_at - now
                }
            };
            sleep(wait).await;
        }
    }

    /// Non-blocking variant of [`Self::acquire`] used by the URL queue:
    /// takes the lease only if the bucket currently has capacity.
    pub async fn try_acquire_host(&self, host: &str, base_delay: Duration) -> bool {
        let mut hosts = self.hosts.lock().await;
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(base_delay));
        if !state.in_flight && Instant::now() >= state.next_allowed_at {
            state.in_flight = true;
            state.stats.total_requests += 1;
            true
        } else {
            false
        }
    }

    /// Release the host lease and schedule the next permitted request.
    pub async fn mark_complete(
        &self,
        host: &str,
        outcome: RequestOutcome,
        response_time: Option<Duration>,
    ) {
        let mut hosts = self.hosts.lock().await;
        let Some(state) = hosts.get_mut(host) else {
            return;
        };
        state.in_flight = false;
        state.stats.last_response_time = response_time;

        match outcome {
            RequestOutcome::Success => {
                state.stats.successful_requests += 1;
                // Relax toward the base once the host looks healthy again.
                if state.stats.success_rate() > 0.95 && state.effective_delay > state.base_delay {
                    state.effective_delay =
                        (state.effective_delay / 2).max(state.base_delay);
                }
            }
            RequestOutcome::RateLimited => {
                state.stats.rate_limit_hits += 1;
                let cap = state.base_delay * 4;
                state.effective_delay = (state.effective_delay * 2).min(cap);
                warn!(
                    host = host,
                    delay_secs = state.effective_delay.as_secs(),
                    "rate limited, backing off"
                );
            }
            RequestOutcome::Failure => {}
        }

        state.next_allowed_at = Instant::now() + state.effective_delay;
    }

    /// Snapshot of a host's counters.
    pub async fn host_stats(&self, host: &str) -> HostStats {
        let hosts = self.hosts.lock().await;
        hosts.get(host).map(|s| s.stats.clone()).unwrap_or_default()
    }

    /// Aggregate counters across a set of hosts (one scraping source may span
    /// several domains).
    pub async fn aggregate_stats(&self, host_names: &[String]) -> HostStats {
        let hosts = self.hosts.lock().await;
        let mut total = HostStats::default();
        for name in host_names {
            if let Some(state) = hosts.get(name) {
                total.total_requests += state.stats.total_requests;
                total.successful_requests += state.stats.successful_requests;
                total.rate_limit_hits += state.stats.rate_limit_hits;
                total.last_response_time =
                    state.stats.last_response_time.or(total.last_response_time);
            }
        }
        total
    }

    async fn rules_for(&self, host: &str) -> Arc<RobotsRules> {
        if let Some(cached) = self.robots.get(host) {
            if cached.fetched_at.elapsed() < self.settings.robots_cache_ttl {
                return cached.rules.clone();
            }
        }
        let rules = Arc::new(self.fetch_robots(host).await);
        // Copy-on-write: replace the whole entry, readers keep their Arc.
        self.robots.insert(
            host.to_string(),
            CachedRobots {
                rules: rules.clone(),
                fetched_at: Instant::now(),
            },
        );
        rules
    }

    async fn fetch_robots(&self, host: &str) -> RobotsRules {
        let url = format!("https://{}/robots.txt", host);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    debug!(host = host, "fetched robots.txt");
                    parse_robots(&body, &self.settings.user_agent)
                }
                Err(e) => {
                    warn!(host = host, error = %e, "failed reading robots.txt body");
                    RobotsRules::default()
                }
            },
            Ok(response) => {
                debug!(host = host, status = %response.status(), "no usable robots.txt");
                RobotsRules::default()
            }
            Err(e) => {
                warn!(host = host, error = %e, "robots.txt fetch failed, assuming permissive");
                RobotsRules::default()
            }
        }
    }

    /// Seed the robots cache directly. Test hook and warm-start path.
    pub fn preload_robots(&self, host: &str, rules: RobotsRules) {
        self.robots.insert(
            host.to_string(),
            CachedRobots {
                rules: Arc::new(rules),
                fetched_at: Instant::now(),
            },
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedUrl {
    priority: u8,
    seq: u64,
    url: String,
    host: String,
}

impl Ord for QueuedUrl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on priority, FIFO within a priority level.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedUrl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending URLs layered over the governor. `next_ready`
/// only yields a URL whose host bucket currently has capacity; callers must
/// release the host with [`RateGovernor::mark_complete`].
pub struct UrlQueue {
    governor: Arc<RateGovernor>,
    heap: Mutex<BinaryHeap<QueuedUrl>>,
    seq: std::sync::atomic::AtomicU64,
}

impl UrlQueue {
    pub fn new(governor: Arc<RateGovernor>) -> Self {
        Self {
            governor,
            heap: Mutex::new(BinaryHeap::new()),
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn push(&self, url: &str, priority: u8) -> Result<()> {
        let host = RateGovernor::host_of(url)?;
        let seq = self
            .seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.heap.lock().await.push(QueuedUrl {
            priority,
            seq,
            url: url.to_string(),
            host,
        });
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    /// Pop the highest-priority URL whose host has capacity right now.
    /// Entries whose hosts are busy are retained for later calls.
    pub async fn next_ready(&self) -> Option<String> {
        let mut heap = self.heap.lock().await;
        let mut deferred = Vec::new();
        let mut ready = None;

        while let Some(entry) = heap.pop() {
            let delay = self.governor.crawl_delay(&entry.host).await;
            if self.governor.try_acquire_host(&entry.host, delay).await {
                ready = Some(entry.url);
                break;
            }
            deferred.push(entry);
        }

        for entry in deferred {
            heap.push(entry);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> GovernorSettings {
        GovernorSettings {
            default_crawl_delay: Duration::from_millis(10),
            robots_cache_ttl: Duration::from_secs(3600),
            user_agent: "music-metadata-pipeline/0.1 (+https://example.com/bot)".to_string(),
        }
    }

    #[test]
    fn test_parse_robots_star_group() {
        let body = "User-agent: *\nDisallow: /private\nCrawl-delay: 5\n";
        let rules = parse_robots(body, "music-metadata-pipeline/0.1");
        assert_eq!(rules.disallow, vec!["/private"]);
        assert_eq!(rules.crawl_delay, Some(Duration::from_secs(5)));
        assert!(rules.is_path_allowed("/public"));
        assert!(!rules.is_path_allowed("/private/page"));
    }

    #[test]
    fn test_parse_robots_specific_group_wins() {
        let body = concat!(
            "User-agent: *\n",
            "Disallow: /\n",
            "\n",
            "User-agent: music-metadata-pipeline\n",
            "Disallow: /admin\n",
            "Crawl-delay: 2\n",
        );
        let rules = parse_robots(body, "music-metadata-pipeline/0.1");
        assert_eq!(rules.disallow, vec!["/admin"]);
        assert!(rules.is_path_allowed("/tracklists"));
        assert!(!rules.is_path_allowed("/admin/x"));
    }

    #[test]
    fn test_allow_overrides_shorter_disallow() {
        let rules = RobotsRules {
            disallow: vec!["/dir".to_string()],
            allow: vec!["/dir/open".to_string()],
            crawl_delay: None,
        };
        assert!(!rules.is_path_allowed("/dir/closed"));
        assert!(rules.is_path_allowed("/dir/open/page"));
    }

    #[test]
    fn test_empty_robots_allows_everything() {
        let rules = RobotsRules::default();
        assert!(rules.is_path_allowed("/anything"));
    }

    #[tokio::test]
    async fn test_robots_denied_url_rejected() {
        let governor = RateGovernor::new(test_settings()).unwrap();
        governor.preload_robots(
            "example.com",
            RobotsRules {
                disallow: vec!["/blocked".to_string()],
                allow: vec![],
                crawl_delay: None,
            },
        );
        let result = governor.acquire("https://example.com/blocked/page").await;
        assert!(matches!(result, Err(PipelineError::RobotsDenied { .. })));
        assert!(governor
            .acquire("https://example.com/open/page")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_lease_serializes_host() {
        let governor = Arc::new(RateGovernor::new(test_settings()).unwrap());
        governor.preload_robots("example.com", RobotsRules::default());

        let host = governor.acquire("https://example.com/a").await.unwrap();
        // Second acquire on the same host must not succeed while in flight.
        assert!(
            !governor
                .try_acquire_host("example.com", Duration::from_millis(10))
                .await
        );
        governor
            .mark_complete(&host, RequestOutcome::Success, None)
            .await;
        // After release plus delay, capacity returns.
        sleep(Duration::from_millis(20)).await;
        assert!(
            governor
                .try_acquire_host("example.com", Duration::from_millis(10))
                .await
        );
    }

    #[tokio::test]
    async fn test_rate_limit_backoff_doubles_and_caps() {
        let governor = RateGovernor::new(test_settings()).unwrap();
        governor.preload_robots("example.com", RobotsRules::default());
        let base = Duration::from_millis(10);

        for _ in 0..5 {
            assert!(governor.try_acquire_host("example.com", base).await || {
                sleep(Duration::from_millis(50)).await;
                governor.try_acquire_host("example.com", base).await
            });
            governor
                .mark_complete("example.com", RequestOutcome::RateLimited, None)
                .await;
            sleep(Duration::from_millis(50)).await;
        }

        let stats = governor.host_stats("example.com").await;
        assert_eq!(stats.rate_limit_hits, 5);

        // Effective delay is capped at 4x base: after release the next slot
        // must be no further out than ~40ms.
        let hosts = governor.hosts.lock().await;
        let state = hosts.get("example.com").unwrap();
        assert_eq!(state.effective_delay, base * 4);
    }

    #[tokio::test]
    async fn test_url_queue_priority_and_host_capacity() {
        let governor = Arc::new(RateGovernor::new(test_settings()).unwrap());
        governor.preload_robots("a.com", RobotsRules::default());
        governor.preload_robots("b.com", RobotsRules::default());

        let queue = UrlQueue::new(governor.clone());
        queue.push("https://a.com/low", 1).await.unwrap();
        queue.push("https://a.com/high", 9).await.unwrap();
        queue.push("https://b.com/mid", 5).await.unwrap();

        // Highest priority first.
        assert_eq!(
            queue.next_ready().await.as_deref(),
            Some("https://a.com/high")
        );
        // a.com is leased, so the next ready URL comes from b.com.
        assert_eq!(
            queue.next_ready().await.as_deref(),
            Some("https://b.com/mid")
        );
        // Both hosts leased: nothing ready, entry retained.
        assert_eq!(queue.next_ready().await, None);
        assert_eq!(queue.len().await, 1);

        governor
            .mark_complete("a.com", RequestOutcome::Success, None)
            .await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(
            queue.next_ready().await.as_deref(),
            Some("https://a.com/low")
        );
    }
}
