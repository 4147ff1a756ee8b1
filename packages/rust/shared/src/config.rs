//! Application configuration for jobrelay.
//!
//! Non-secret settings live at `~/.jobrelay/jobrelay.toml`. Secrets are read
//! from the environment; the file only names the variables that hold them.
//! Everything is resolved once at startup into an immutable [`RelaySettings`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RelayError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "jobrelay.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".jobrelay";

/// Env vars that override the configured channel names.
pub const JOB_CHANNEL_ENV: &str = "PUBNUB_JOB_CHANNEL";
pub const RESPONSE_CHANNEL_ENV: &str = "PUBNUB_RESPONSE_CHANNEL";

// ---------------------------------------------------------------------------
// Config structs (matching jobrelay.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub supabase: SupabaseConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub pubnub: PubNubConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Which storage backend holds context documents and response records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Hosted Postgres + pgvector through the PostgREST API.
    #[default]
    Supabase,
    /// Embedded libSQL file (offline mode).
    Local,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file for the local backend. `~` expands to the home directory.
    #[serde(default = "default_local_path")]
    pub local_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            local_path: default_local_path(),
        }
    }
}

fn default_local_path() -> String {
    "~/.jobrelay/jobrelay.db".into()
}

/// `[supabase]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Name of the env var holding the project URL.
    #[serde(default = "default_supabase_url_env")]
    pub url_env: String,

    /// Name of the env var holding the service key (never store the key itself).
    #[serde(default = "default_supabase_key_env")]
    pub key_env: String,

    /// Per-request timeout for REST calls.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url_env: default_supabase_url_env(),
            key_env: default_supabase_key_env(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_supabase_url_env() -> String {
    "SUPABASE_URL".into()
}
fn default_supabase_key_env() -> String {
    "SUPABASE_KEY".into()
}
fn default_store_timeout_secs() -> u64 {
    30
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Dimension of the embedding space; must match the context store.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> usize {
    1536
}
fn default_max_tokens() -> u32 {
    500
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[pubnub]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubNubConfig {
    #[serde(default = "default_publish_key_env")]
    pub publish_key_env: String,

    #[serde(default = "default_subscribe_key_env")]
    pub subscribe_key_env: String,

    #[serde(default = "default_pubnub_origin")]
    pub origin: String,

    /// Client identity reported to PubNub.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default = "default_job_channel")]
    pub job_channel: String,

    #[serde(default = "default_response_channel")]
    pub response_channel: String,

    /// Pause before re-opening a failed subscribe long-poll.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Timeout for a single publish. Subscribe long-polls are not bound by it.
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl Default for PubNubConfig {
    fn default() -> Self {
        Self {
            publish_key_env: default_publish_key_env(),
            subscribe_key_env: default_subscribe_key_env(),
            origin: default_pubnub_origin(),
            user_id: default_user_id(),
            job_channel: default_job_channel(),
            response_channel: default_response_channel(),
            reconnect_delay_ms: default_reconnect_delay(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

fn default_publish_key_env() -> String {
    "PUBNUB_PUBLISH_KEY".into()
}
fn default_subscribe_key_env() -> String {
    "PUBNUB_SUBSCRIBE_KEY".into()
}
fn default_pubnub_origin() -> String {
    "https://ps.pndsn.com".into()
}
fn default_user_id() -> String {
    "job-processor-worker".into()
}
fn default_job_channel() -> String {
    "job-requests".into()
}
fn default_response_channel() -> String {
    "job-responses".into()
}
fn default_reconnect_delay() -> u64 {
    1_000
}
fn default_publish_timeout_secs() -> u64 {
    10
}

/// `[resolver]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// `document_type` that exact and similarity lookups are restricted to.
    #[serde(default = "default_document_type")]
    pub document_type: String,

    /// When non-empty, similarity search spans these types instead of
    /// `document_type`. Exact lookups always use `document_type`.
    #[serde(default)]
    pub document_types: Vec<String>,

    /// Number of similarity matches requested from the store.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Matches scoring below this are discarded.
    #[serde(default)]
    pub min_similarity: f64,

    /// Upper bound on context text placed in the prompt.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            document_type: default_document_type(),
            document_types: Vec::new(),
            top_k: default_top_k(),
            min_similarity: 0.0,
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_document_type() -> String {
    "job".into()
}
fn default_top_k() -> usize {
    1
}
fn default_max_context_chars() -> usize {
    12_000
}

// ---------------------------------------------------------------------------
// Resolved runtime settings
// ---------------------------------------------------------------------------

/// Store connection, resolved from config + env.
#[derive(Debug, Clone)]
pub enum StoreSettings {
    Supabase {
        url: Url,
        key: String,
        timeout_secs: u64,
    },
    Local { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: Url,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PubNubSettings {
    pub publish_key: String,
    pub subscribe_key: String,
    pub origin: Url,
    pub user_id: String,
    pub job_channel: String,
    pub response_channel: String,
    pub reconnect_delay_ms: u64,
    pub publish_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub document_type: String,
    pub document_types: Vec<String>,
    pub top_k: usize,
    pub min_similarity: f64,
    pub max_context_chars: usize,
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            document_type: config.document_type.clone(),
            document_types: config.document_types.clone(),
            top_k: config.top_k,
            min_similarity: config.min_similarity,
            max_context_chars: config.max_context_chars,
        }
    }
}

/// Immutable process-wide settings, passed to each component at construction.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub store: StoreSettings,
    pub openai: OpenAiSettings,
    /// Present only when the command touches the channel.
    pub pubnub: Option<PubNubSettings>,
    pub resolver: ResolverSettings,
}

impl RelaySettings {
    /// Resolve settings from the process environment.
    pub fn from_env(config: &AppConfig, with_channel: bool) -> Result<Self> {
        Self::resolve(config, with_channel, |name| std::env::var(name).ok())
    }

    /// Resolve settings using `env` to look up variables.
    ///
    /// Every missing required variable is collected and reported in one
    /// `Config` error.
    pub fn resolve(
        config: &AppConfig,
        with_channel: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let mut missing: Vec<String> = Vec::new();
        let mut require = |name: &str| match lookup(name) {
            Some(v) => v,
            None => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let store_creds = match config.store.backend {
            StoreBackend::Supabase => Some((
                require(&config.supabase.url_env),
                require(&config.supabase.key_env),
            )),
            StoreBackend::Local => None,
        };
        let openai_key = require(&config.openai.api_key_env);
        let pubnub_keys = with_channel.then(|| {
            (
                require(&config.pubnub.publish_key_env),
                require(&config.pubnub.subscribe_key_env),
            )
        });

        if !missing.is_empty() {
            return Err(RelayError::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let store = match store_creds {
            Some((url, key)) => StoreSettings::Supabase {
                url: parse_url("supabase url", &url)?,
                key,
                timeout_secs: config.supabase.timeout_secs,
            },
            None => StoreSettings::Local {
                path: expand_home(&config.store.local_path)?,
            },
        };

        let openai = OpenAiSettings {
            api_key: openai_key,
            base_url: parse_url("openai.base_url", &config.openai.base_url)?,
            chat_model: config.openai.chat_model.clone(),
            embedding_model: config.openai.embedding_model.clone(),
            embedding_dimensions: config.openai.embedding_dimensions,
            max_tokens: config.openai.max_tokens,
            temperature: config.openai.temperature,
            timeout_secs: config.openai.timeout_secs,
        };

        let pubnub = match pubnub_keys {
            Some((publish_key, subscribe_key)) => Some(PubNubSettings {
                publish_key,
                subscribe_key,
                origin: parse_url("pubnub.origin", &config.pubnub.origin)?,
                user_id: config.pubnub.user_id.clone(),
                job_channel: lookup(JOB_CHANNEL_ENV)
                    .unwrap_or_else(|| config.pubnub.job_channel.clone()),
                response_channel: lookup(RESPONSE_CHANNEL_ENV)
                    .unwrap_or_else(|| config.pubnub.response_channel.clone()),
                reconnect_delay_ms: config.pubnub.reconnect_delay_ms,
                publish_timeout_secs: config.pubnub.publish_timeout_secs,
            }),
            None => None,
        };

        let settings = Self {
            store,
            openai,
            pubnub,
            resolver: ResolverSettings::from(&config.resolver),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.resolver.top_k == 0 {
            return Err(RelayError::config("resolver.top_k must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.resolver.min_similarity) {
            return Err(RelayError::config(
                "resolver.min_similarity must be within [0, 1]",
            ));
        }
        if self
            .resolver
            .document_types
            .iter()
            .any(|t| t.trim().is_empty())
        {
            return Err(RelayError::config(
                "resolver.document_types must not contain blank entries",
            ));
        }
        if let StoreSettings::Supabase { timeout_secs: 0, .. } = self.store {
            return Err(RelayError::config("supabase.timeout_secs must be positive"));
        }
        if self.openai.embedding_dimensions == 0 {
            return Err(RelayError::config(
                "openai.embedding_dimensions must be positive",
            ));
        }
        if let Some(pubnub) = &self.pubnub {
            if pubnub.publish_timeout_secs == 0 {
                return Err(RelayError::config(
                    "pubnub.publish_timeout_secs must be positive",
                ));
            }
            if pubnub.job_channel == pubnub.response_channel {
                return Err(RelayError::config(format!(
                    "job and response channels must differ (both are '{}')",
                    pubnub.job_channel
                )));
            }
        }
        Ok(())
    }
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| RelayError::config(format!("invalid {what} '{raw}': {e}")))
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| RelayError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.jobrelay/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RelayError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.jobrelay/jobrelay.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RelayError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RelayError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RelayError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| RelayError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RelayError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
