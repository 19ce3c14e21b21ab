use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Dredge
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Looks up a site by name
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|site| site.name == name)
    }
}

/// Crawl driver behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of concurrent workers sharing the frontier
    pub workers: u32,

    /// Retries allowed after the first attempt for retryable failures
    pub retry_limit: u32,

    /// Stop after this many fetches
    pub max_pages: Option<u64>,

    /// Stop after this many seconds of wall-clock time
    pub max_duration_secs: Option<u64>,

    /// Timeout for a single request
    pub request_timeout_secs: u64,

    /// Minimum time between requests to the same host (milliseconds)
    pub default_delay_ms: u64,

    /// Base backoff after a 429/5xx (milliseconds)
    pub backoff_ms: u64,

    /// Backoff cap (milliseconds)
    pub max_backoff_ms: u64,

    /// Persist the frontier every this many pages
    pub checkpoint_interval: u64,

    /// Fetch and obey robots.txt for every host
    pub respect_robots: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            retry_limit: 3,
            max_pages: None,
            max_duration_secs: None,
            request_timeout_secs: 30,
            default_delay_ms: 1000,
            backoff_ms: 2000,
            max_backoff_ms: 60_000,
            checkpoint_interval: 25,
            respect_robots: false,
        }
    }
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One crawled site: where to start, how to fetch, how to extract
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Site name, used as the record collection
    pub name: String,

    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub domain: String,

    /// URLs to start crawling from
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Politeness delay override for this site's hosts (milliseconds)
    pub delay_ms: Option<u64>,

    /// Export column order; defaults to the key plus every field seen
    #[serde(default)]
    pub export_fields: Vec<String>,

    /// Extra request headers sent to this site
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub extractor: ExtractorConfig,
}

impl SiteConfig {
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }
}

/// Extractor selection, tagged by `kind`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExtractorConfig {
    /// CSS selectors over HTML pages
    Selector(SelectorConfig),
    /// JSON pointers over JSON API responses
    Json(JsonConfig),
    /// One record per page, follow every link
    Links(LinksConfig),
}

impl ExtractorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorConfig::Selector(_) => "selector",
            ExtractorConfig::Json(_) => "json",
            ExtractorConfig::Links(_) => "links",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectorConfig {
    /// Selector for repeated item containers; without it the page is one item
    pub item: Option<String>,

    /// Field holding the natural key; without it the page URL is the key
    pub key: Option<String>,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,

    /// Selectors for links to enqueue (pagination, detail pages)
    #[serde(default)]
    pub follow: Vec<String>,
}

/// How to read one field from an item
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldRule {
    pub selector: String,

    /// Read this attribute instead of the element text
    pub attr: Option<String>,

    #[serde(default)]
    pub value: ValueKind,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Type a field's text is parsed into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueKind {
    #[default]
    Text,
    Number,
    Integer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JsonConfig {
    /// Pointer to the array of items; without it the document is one item
    pub items: Option<String>,

    /// Field holding the natural key
    pub key: String,

    /// Field name to pointer within an item
    #[serde(default)]
    pub fields: BTreeMap<String, JsonFieldRule>,

    /// Pointers (from the document root) to next-page URLs
    #[serde(default)]
    pub next: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JsonFieldRule {
    pub pointer: String,

    #[serde(default = "default_required")]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LinksConfig {
    /// Selector for the title field (defaults to `title`)
    pub title: Option<String>,
}
