use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire and resource limits shared across the runtime.
pub const DEFAULT_PORT: u16 = 18720;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Frames queued per WS client before the slow-consumer policy drops.
pub const OUTBOUND_QUEUE_FRAMES: usize = 64;
pub const WS_WRITE_TIMEOUT_SECS: u64 = 5;
/// Fixed back-off applied after a channel fetch error.
pub const FETCH_BACKOFF_SECS: u64 = 5;
/// Server-side long-poll timeout passed to pull transports.
pub const POLL_TIMEOUT_SECS: u64 = 30;
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;
pub const MAX_CHAT_BODY_BYTES: usize = 1024 * 1024;
pub const MAX_SYNC_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_TOKEN_BODY_BYTES: usize = 64 * 1024;
/// Cached OAuth tokens are refreshed this long before their expiry.
pub const TOKEN_EARLY_REFRESH_SECS: i64 = 60;
/// Server-side wait for the HTTP channel's pending reply slot.
pub const HTTP_PENDING_TIMEOUT_SECS: u64 = 5;

/// Top-level config (alfred.toml + ALFRED_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlfredConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tenants: TenantsConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub texts: TextsConfig,
}

impl AlfredConfig {
    /// Load config from a TOML file with ALFRED_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AlfredConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ALFRED_").split("_"))
            .extract()
            .map_err(|e| crate::error::AlfredError::InvalidInput(e.to_string()))?;

        Ok(config)
    }
}

/// Identity reported on the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_agent_version")]
    pub version: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            version: default_agent_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Static client tokens accepted on WS upgrade and REST calls.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            tokens: Vec::new(),
        }
    }
}

/// One accepted client token. An empty role list means implicit admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding one JSON transcript file per session.
    #[serde(default = "default_sessions_dir")]
    pub dir: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: default_sessions_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantsConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Concurrent running sessions allowed per agent.
    #[serde(default = "default_process_max")]
    pub max_per_agent: usize,
    /// Byte capacity of each stdout/stderr ring buffer.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Finished sessions older than this are swept.
    #[serde(default = "default_process_ttl")]
    pub ttl_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_per_agent: default_process_max(),
            ring_capacity: default_ring_capacity(),
            ttl_secs: default_process_ttl(),
        }
    }
}

/// Help/privacy content served by the command interceptor. Data, not logic.
///
/// Help text is keyed per channel so e.g. the IRC reply can name the `!`
/// aliases while Telegram lists slash commands; channels without an entry
/// fall back to `help_default`. Privacy text is the same everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextsConfig {
    /// Per-channel overrides, keyed by channel name ("telegram", "irc", …).
    #[serde(default)]
    pub help: std::collections::HashMap<String, String>,
    #[serde(default = "default_help_text")]
    pub help_default: String,
    #[serde(default = "default_privacy_text")]
    pub privacy: String,
}

impl TextsConfig {
    /// The `/help` reply for a channel: its override, or the fallback.
    pub fn help_for(&self, channel: &str) -> &str {
        self.help
            .get(channel)
            .map(String::as_str)
            .unwrap_or(&self.help_default)
    }
}

impl Default for TextsConfig {
    fn default() -> Self {
        Self {
            help: std::collections::HashMap::new(),
            help_default: default_help_text(),
            privacy: default_privacy_text(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
    pub slack: Option<SlackConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub matrix: Option<MatrixConfig>,
    pub signal: Option<SignalConfig>,
    pub irc: Option<IrcConfig>,
    pub googlechat: Option<GoogleChatConfig>,
    pub teams: Option<TeamsConfig>,
    pub http: Option<HttpChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Gate group messages on an explicit @mention of the bot.
    #[serde(default)]
    pub mention_only: bool,
    /// Sender allow-list (user IDs or usernames). Empty = allow everyone.
    #[serde(default)]
    pub allow_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
    #[serde(default = "default_discord_gateway_url")]
    pub gateway_url: String,
    /// Restrict processing to this guild when set.
    pub guild_id: Option<String>,
    #[serde(default)]
    pub mention_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub bot_token: String,
    /// App-level token used for `apps.connections.open` (socket mode).
    pub app_token: String,
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub mention_only: bool,
    /// Channel allow-set. Empty = all channels the bot is in.
    #[serde(default)]
    pub channel_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Bind address of the webhook listener, e.g. "127.0.0.1:8441".
    pub webhook_addr: String,
    pub access_token: String,
    pub phone_id: String,
    /// App secret used to verify X-Hub-Signature-256.
    pub app_secret: String,
    /// Expected `hub.verify_token` on the GET verification challenge.
    pub verify_token: String,
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub homeserver: String,
    pub access_token: String,
    /// Our own MXID, e.g. "@alfred:example.org". Used for mention detection
    /// and to drop our own timeline events.
    pub user_id: String,
    #[serde(default)]
    pub mention_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Base URL of the signal-cli REST API.
    pub api_url: String,
    pub phone_number: String,
    #[serde(default)]
    pub allow_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    pub nick: String,
    pub password: Option<String>,
    /// Channels joined once per connection after RPL_WELCOME.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub mention_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleChatConfig {
    pub webhook_addr: String,
    /// Service account email — both `iss` and `sub` of the signed JWT.
    pub sa_email: String,
    /// PKCS8 PEM private key of the service account.
    pub private_key: String,
    #[serde(default = "default_google_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_googlechat_api_base")]
    pub api_base: String,
    /// Restrict processing to this space when set (e.g. "spaces/AAAA").
    pub space_id: Option<String>,
    #[serde(default)]
    pub mention_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsConfig {
    pub webhook_addr: String,
    pub app_id: String,
    pub client_secret: String,
    #[serde(default = "default_teams_token_url")]
    pub token_url: String,
    /// Restrict processing to this Azure tenant when set.
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub mention_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpChannelConfig {
    /// Bind address of the chat endpoint, e.g. "127.0.0.1:8440".
    pub addr: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_agent_name() -> String {
    "alfred".to_string()
}
fn default_agent_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_sessions_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.alfred/sessions", home)
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.alfred/alfred.db", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.alfred/alfred.toml", home)
}
fn default_process_max() -> usize {
    10
}
fn default_ring_capacity() -> usize {
    256 * 1024
}
fn default_process_ttl() -> u64 {
    3600
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}
fn default_discord_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}
fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}
fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com".to_string()
}
fn default_google_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_googlechat_api_base() -> String {
    "https://chat.googleapis.com".to_string()
}
fn default_teams_token_url() -> String {
    "https://login.microsoftonline.com/botframework.com/oauth2/v2.0/token".to_string()
}
fn default_irc_port() -> u16 {
    6667
}
fn default_help_text() -> String {
    "I'm Alfred, your assistant. Send me a message and I'll reply here.\n\
     Commands: /help — this message, /privacy — how your data is handled."
        .to_string()
}
fn default_privacy_text() -> String {
    "Conversations are stored to keep context between messages. \
     Ask an administrator to delete your session at any time."
        .to_string()
}
