// src/enrich.rs
//! Enrichment adapter: provider abstraction + daily call limit.
//!
//! The external language-model service is a contract-only collaborator. A
//! provider turns one record into `{ summary, category, alignment }`; anything
//! malformed means no enrichment for that record, never a failed run. The
//! daily counter persists across invocations so repeated CLI runs share one
//! budget.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const ENV_AI_CONFIG_PATH: &str = "SCOUT_AI_CONFIG_PATH";
pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
const COUNTER_DIR: &str = "cache/enrichment";

/// Marker in `config/ai.json` meaning "read the key from the environment".
const API_KEY_FROM_ENV: &str = "ENV";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

const SUMMARY_CAP: usize = 240;
const CATEGORY_CAP: usize = 40;

/// What kind of record is being enriched; steers the prompt wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Project,
    Grant,
}

impl ItemType {
    fn label(self) -> &'static str {
        match self {
            ItemType::Project => "project",
            ItemType::Grant => "grant opportunity",
        }
    }
}

/// One record's worth of context sent to the provider.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest<'a> {
    pub title: &'a str,
    pub snippet: &'a str,
    pub item_type: ItemType,
}

/// Derived fields patched back onto the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub category: String,
    pub alignment: f32,
}

/// Client surface the pipeline holds. `None` means "leave the record as is".
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn enrich(&self, req: &EnrichmentRequest<'_>) -> Option<Enrichment>;
    fn provider_name(&self) -> &'static str;
}

pub type DynEnrichmentClient = Arc<dyn EnrichmentClient>;

/// Enrichment settings from `config/ai.json`. Absent or unreadable config
/// means disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// Currently only "openai" is implemented.
    pub provider: Option<String>,
    /// Per-day call budget; defaults to 20 if absent.
    pub daily_limit: Option<u32>,
    /// Literal key, or the marker "ENV" to read `OPENAI_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            daily_limit: Some(20),
            api_key: None,
        }
    }
}

impl AiConfig {
    pub fn load_default() -> Self {
        let path = std::env::var(ENV_AI_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.to_string());
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(target: "enrich", %path, error = %e, "invalid ai config; enrichment disabled");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn effective_daily_limit(&self) -> u32 {
        self.daily_limit.unwrap_or(20)
    }

    fn resolve_api_key(&self) -> String {
        match self.api_key.as_deref() {
            Some(API_KEY_FROM_ENV) | None => {
                std::env::var(ENV_OPENAI_API_KEY).unwrap_or_default()
            }
            Some(literal) => literal.to_string(),
        }
    }
}

/// Build a client from config + environment.
///
/// * `AI_TEST_MODE=mock` forces the deterministic mock provider.
/// * disabled config returns the no-op client.
/// * otherwise the named provider, wrapped with the daily limit.
pub fn build_client_from_config(config: &AiConfig) -> DynEnrichmentClient {
    if std::env::var("AI_TEST_MODE").map(|v| v == "mock").unwrap_or(false) {
        let mock = MockProvider::default();
        return Arc::new(LimitedClient::new(
            mock,
            PathBuf::from(COUNTER_DIR),
            config.effective_daily_limit(),
        ));
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_deref() {
        Some("openai") => {
            let provider = OpenAiProvider::new(config.resolve_api_key(), None);
            Arc::new(LimitedClient::new(
                provider,
                PathBuf::from(COUNTER_DIR),
                config.effective_daily_limit(),
            ))
        }
        other => {
            if let Some(name) = other {
                warn!(target: "enrich", provider = name, "unknown provider; enrichment disabled");
            }
            Arc::new(DisabledClient)
        }
    }
}

/// Convenience: read config from disk and build.
pub fn build_enrichment_client() -> DynEnrichmentClient {
    build_client_from_config(&AiConfig::load_default())
}

// ------------------------------------------------------------
// Providers
// ------------------------------------------------------------

/// Low-level provider making the real remote call; separated from the limit
/// wrapper so tests can reuse the wrapper with a mock.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn fetch(&self, req: &EnrichmentRequest<'_>) -> Option<Enrichment>;
    fn name(&self) -> &'static str;
}

/// Chat-completions provider. Asks for strict JSON and refuses anything else.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("opengov-scout/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model_override.unwrap_or("gpt-4o-mini").to_string(),
        }
    }
}

const SYSTEM_PROMPT: &str = "You review public-sector opportunity records for a civic consulting team focused on rural infrastructure, energy, education, and workforce programs. Reply with STRICT JSON only, no prose: {\"summary\": string (one sentence, <=240 ASCII chars), \"category\": string (one or two lowercase words), \"alignment\": number 0-100 rating fit for that practice}.";

#[async_trait]
impl Provider for OpenAiProvider {
    async fn fetch(&self, req: &EnrichmentRequest<'_>) -> Option<Enrichment> {
        if self.api_key.is_empty() {
            debug!(target: "enrich", "no api key; skipping call");
            return None;
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct ChatResp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user = format!(
            "Type: {}\nTitle: {}\nDetails: {}",
            req.item_type.label(),
            req.title,
            req.snippet
        );
        let body = ChatReq {
            model: &self.model,
            messages: vec![
                Msg { role: "system", content: SYSTEM_PROMPT },
                Msg { role: "user", content: &user },
            ],
            temperature: 0.2,
            max_tokens: 200,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            debug!(target: "enrich", status = %resp.status(), "provider returned non-success");
            return None;
        }
        let parsed: ChatResp = resp.json().await.ok()?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_enrichment_json(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Returns `None` always; the default when enrichment is off.
pub struct DisabledClient;

#[async_trait]
impl EnrichmentClient for DisabledClient {
    async fn enrich(&self, _req: &EnrichmentRequest<'_>) -> Option<Enrichment> {
        None
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic provider for tests and `AI_TEST_MODE=mock` runs.
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: Enrichment,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            fixed: Enrichment {
                summary: "Deterministic mock summary".to_string(),
                category: "general".to_string(),
                alignment: 75.0,
            },
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn fetch(&self, _req: &EnrichmentRequest<'_>) -> Option<Enrichment> {
        Some(self.fixed.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Daily-limit wrapper
// ------------------------------------------------------------

/// Wraps a provider with a persisted per-day call counter. Counter state is
/// guarded by a `Mutex` to keep it simple and safe.
pub struct LimitedClient<P: Provider> {
    inner: P,
    counter_dir: PathBuf,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: Provider> LimitedClient<P> {
    pub fn new(inner: P, counter_dir: PathBuf, daily_limit: u32) -> Self {
        let counter = Mutex::new(load_daily_counter(&counter_dir).unwrap_or_default());
        Self {
            inner,
            counter_dir,
            daily_limit,
            counter,
        }
    }
}

#[async_trait]
impl<P: Provider> EnrichmentClient for LimitedClient<P> {
    async fn enrich(&self, req: &EnrichmentRequest<'_>) -> Option<Enrichment> {
        {
            let Ok(mut guard) = self.counter.lock() else {
                return None;
            };
            if guard.is_stale() {
                guard.reset_to_today();
            }
            if guard.count >= self.daily_limit {
                debug!(target: "enrich", limit = self.daily_limit, "daily limit reached");
                return None;
            }
        }

        let mut fresh = self.inner.fetch(req).await?;
        fresh.summary = sanitize_line(&fresh.summary, SUMMARY_CAP);
        fresh.category = sanitize_line(&fresh.category, CATEGORY_CAP).to_ascii_lowercase();
        fresh.alignment = fresh.alignment.clamp(0.0, 100.0);
        if fresh.summary.is_empty() {
            return None;
        }

        // Count only successful real calls.
        if let Ok(mut guard) = self.counter.lock() {
            guard.count = guard.count.saturating_add(1);
            if let Err(e) = save_daily_counter(&self.counter_dir, &guard) {
                debug!(target: "enrich", error = %e, "could not persist daily counter");
            }
        }
        Some(fresh)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_stale(&self) -> bool {
        self.date != today()
    }

    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> Result<DailyCounter> {
    let raw = fs::read_to_string(counter_path(dir)).context("read daily counter")?;
    serde_json::from_str(&raw).context("decode daily counter")
}

fn save_daily_counter(dir: &Path, counter: &DailyCounter) -> Result<()> {
    fs::create_dir_all(dir).context("create counter dir")?;
    let path = counter_path(dir);
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_string(counter).context("encode daily counter")?;
    fs::write(&tmp, raw).context("write counter tmp")?;
    fs::rename(&tmp, &path).context("replace counter")?;
    Ok(())
}

// ------------------------------------------------------------
// Response parsing + sanitization
// ------------------------------------------------------------

/// Parse the provider's message content into an `Enrichment`. Tolerates a
/// fenced code block around the JSON; anything else malformed is `None`.
pub fn parse_enrichment_json(content: &str) -> Option<Enrichment> {
    let mut text = content.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }

    #[derive(Deserialize)]
    struct RawEnrichment {
        summary: Option<String>,
        category: Option<String>,
        alignment: Option<f32>,
    }

    let raw: RawEnrichment = serde_json::from_str(text.trim()).ok()?;
    let summary = sanitize_line(raw.summary.as_deref()?, SUMMARY_CAP);
    if summary.is_empty() {
        return None;
    }
    Some(Enrichment {
        summary,
        category: sanitize_line(raw.category.as_deref().unwrap_or(""), CATEGORY_CAP)
            .to_ascii_lowercase(),
        alignment: raw.alignment.unwrap_or(0.0).clamp(0.0, 100.0),
    })
}

/// Single ASCII line, collapsed whitespace, length-capped.
pub fn sanitize_line(input: &str, cap: usize) -> String {
    let mut out = String::with_capacity(cap.min(input.len()));
    let mut prev_space = false;
    for ch in input.chars() {
        let c = match ch {
            '\r' | '\n' | '\t' => ' ',
            c if c.is_ascii() => c,
            _ => ' ',
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.len() >= cap {
            break;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn request() -> EnrichmentRequest<'static> {
        EnrichmentRequest {
            title: "Rural Broadband Pilot",
            snippet: "Last-mile buildout for three counties.",
            item_type: ItemType::Grant,
        }
    }

    #[test]
    fn sanitize_collapses_and_caps() {
        assert_eq!(sanitize_line("  a\n\tb   c  ", 100), "a b c");
        assert_eq!(sanitize_line("caf\u{00E9}", 100), "caf");
        assert!(sanitize_line(&"x".repeat(600), 240).len() <= 240);
    }

    #[test]
    fn parses_strict_json() {
        let out = parse_enrichment_json(
            r#"{"summary": "Broadband buildout grant.", "category": "Broadband", "alignment": 88.5}"#,
        )
        .expect("parses");
        assert_eq!(out.summary, "Broadband buildout grant.");
        assert_eq!(out.category, "broadband");
        assert_eq!(out.alignment, 88.5);
    }

    #[test]
    fn parses_fenced_json_and_clamps_alignment() {
        let out = parse_enrichment_json(
            "```json\n{\"summary\": \"S\", \"category\": \"c\", \"alignment\": 140}\n```",
        )
        .expect("parses");
        assert_eq!(out.alignment, 100.0);
    }

    #[test]
    fn malformed_content_is_none() {
        assert!(parse_enrichment_json("Sure! Here's the analysis:").is_none());
        assert!(parse_enrichment_json(r#"{"category": "x"}"#).is_none());
        assert!(parse_enrichment_json("").is_none());
    }

    #[tokio::test]
    async fn disabled_client_returns_none() {
        let client = DisabledClient;
        assert!(client.enrich(&request()).await.is_none());
        assert_eq!(client.provider_name(), "disabled");
    }

    #[tokio::test]
    async fn limited_client_enforces_daily_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = LimitedClient::new(MockProvider::default(), dir.path().to_path_buf(), 2);

        assert!(client.enrich(&request()).await.is_some());
        assert!(client.enrich(&request()).await.is_some());
        assert!(client.enrich(&request()).await.is_none());
    }

    #[tokio::test]
    async fn limit_counter_persists_across_clients() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let client = LimitedClient::new(MockProvider::default(), dir.path().to_path_buf(), 3);
            assert!(client.enrich(&request()).await.is_some());
            assert!(client.enrich(&request()).await.is_some());
        }
        let client = LimitedClient::new(MockProvider::default(), dir.path().to_path_buf(), 3);
        assert!(client.enrich(&request()).await.is_some());
        assert!(client.enrich(&request()).await.is_none());
    }

    #[test]
    #[serial]
    fn factory_honors_disabled_config() {
        std::env::remove_var("AI_TEST_MODE");
        let client = build_client_from_config(&AiConfig::default());
        assert_eq!(client.provider_name(), "disabled");
    }

    #[test]
    #[serial]
    fn factory_honors_mock_mode() {
        std::env::set_var("AI_TEST_MODE", "mock");
        let client = build_client_from_config(&AiConfig::default());
        std::env::remove_var("AI_TEST_MODE");
        assert_eq!(client.provider_name(), "mock");
    }

    #[test]
    fn config_resolves_env_marker() {
        let cfg = AiConfig {
            enabled: true,
            provider: Some("openai".into()),
            daily_limit: None,
            api_key: Some("sk-literal".into()),
        };
        assert_eq!(cfg.resolve_api_key(), "sk-literal");
        assert_eq!(cfg.effective_daily_limit(), 20);
    }
}
