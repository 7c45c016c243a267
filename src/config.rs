use std::path::PathBuf;

/// Default LINE Messaging API host.
pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";
/// Default LINE Notify endpoint, used as a fallback channel.
pub const DEFAULT_LINE_NOTIFY_URL: &str = "https://notify-api.line.me/api/notify";
/// Default table holding repair tickets.
pub const DEFAULT_TICKET_TABLE: &str = "repair_requests";
/// Default SQLite path, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".repairdesk/tickets.db";

/// Admin login and session signing settings.
#[derive(Debug, Clone, Default)]
pub struct AdminAuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie_secret: Option<String>,
    /// Add the `Secure` attribute to the session cookie.
    pub secure_cookie: bool,
}

/// LINE channel credentials and endpoints.
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub channel_secret: Option<String>,
    pub channel_access_token: Option<String>,
    /// User or group that receives new-ticket and status notifications.
    pub admin_user_id: Option<String>,
    pub notify_token: Option<String>,
    pub api_base: String,
    pub notify_url: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: None,
            channel_access_token: None,
            admin_user_id: None,
            notify_token: None,
            api_base: DEFAULT_LINE_API_BASE.to_string(),
            notify_url: DEFAULT_LINE_NOTIFY_URL.to_string(),
        }
    }
}

/// Where tickets live.
#[derive(Debug, Clone, PartialEq)]
pub enum DatastoreConfig {
    Sqlite {
        path: PathBuf,
    },
    Postgrest {
        url: String,
        service_key: String,
        table: String,
    },
}

/// Runtime configuration for the repair desk, assembled from the environment.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub admin: AdminAuthConfig,
    pub line: LineConfig,
    pub datastore: DatastoreConfig,
    /// Public base URL, used for status links in notifications.
    pub app_url: String,
}

impl DeskConfig {
    /// Read configuration from process environment variables.
    ///
    /// `db_path` is the SQLite location used when no PostgREST endpoint is
    /// configured. Call `dotenvy::dotenv()` beforehand to pick up a `.env` file.
    pub fn from_env(db_path: PathBuf) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), db_path)
    }

    /// Build configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, db_path: PathBuf) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let admin = AdminAuthConfig {
            username: get("ADMIN_USER"),
            password: get("ADMIN_PASS"),
            cookie_secret: get("ADMIN_COOKIE_SECRET"),
            secure_cookie: get("SECURE_COOKIES").is_some_and(|v| parse_flag(&v)),
        };

        let line = LineConfig {
            channel_secret: get("LINE_CHANNEL_SECRET"),
            channel_access_token: get("LINE_CHANNEL_ACCESS_TOKEN"),
            admin_user_id: get("LINE_USER_ID"),
            notify_token: get("LINE_NOTIFY_TOKEN"),
            api_base: get("LINE_API_BASE").unwrap_or_else(|| DEFAULT_LINE_API_BASE.to_string()),
            notify_url: get("LINE_NOTIFY_URL")
                .unwrap_or_else(|| DEFAULT_LINE_NOTIFY_URL.to_string()),
        };

        let datastore = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_key)) => DatastoreConfig::Postgrest {
                url,
                service_key,
                table: get("TICKET_TABLE").unwrap_or_else(|| DEFAULT_TICKET_TABLE.to_string()),
            },
            _ => DatastoreConfig::Sqlite { path: db_path },
        };

        Self {
            admin,
            line,
            datastore,
            app_url: get("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
