use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use meetly_auth::IdentityLookupConfig;

pub const MAX_OTP_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_path: String,
    pub store_timeout_ms: u64,
    pub identity: IdentityLookupConfig,
    pub model_provider: ModelProviderKind,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub model_timeout_ms: u64,
    pub mailer: MailerKind,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_base_url: String,
    pub mail_from: String,
    pub mail_from_name: String,
    pub mailer_timeout_ms: u64,
    pub otp_ttl_secs: u64,
    pub otp_send_limit_per_window: u32,
    pub otp_send_window_secs: u64,
    pub share_base_url: String,
    pub meetings_default_limit: u32,
    pub meetings_max_limit: u32,
    pub cors_allow_origins: CorsOrigins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProviderKind {
    Gemini,
    Mock,
}

impl ModelProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelProviderKind::Gemini => "gemini",
            ModelProviderKind::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailerKind {
    SendGrid,
    Log,
}

impl MailerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MailerKind::SendGrid => "sendgrid",
            MailerKind::Log => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServerConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("MEETLY_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("MEETLY_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "MEETLY_BIND_ADDR",
        )?;

        let db_path =
            optional_string(kv, "MEETLY_DB_PATH").unwrap_or_else(|| "meetings.db".to_string());
        let store_timeout_ms = parse_u64(
            kv.get("MEETLY_STORE_TIMEOUT_MS"),
            2000,
            "MEETLY_STORE_TIMEOUT_MS",
        )?;

        let identity = IdentityLookupConfig {
            lookup_url: optional_string(kv, "MEETLY_IDENTITY_LOOKUP_URL").unwrap_or_else(|| {
                "https://identitytoolkit.googleapis.com/v1/accounts:lookup".to_string()
            }),
            api_key: optional_string(kv, "MEETLY_IDENTITY_API_KEY"),
            timeout: Duration::from_millis(parse_u64(
                kv.get("MEETLY_IDENTITY_TIMEOUT_MS"),
                10_000,
                "MEETLY_IDENTITY_TIMEOUT_MS",
            )?),
        };

        let model_provider = parse_model_provider(kv.get("MEETLY_MODEL_PROVIDER"))?;
        let gemini_api_key = optional_string(kv, "MEETLY_GEMINI_API_KEY");
        if model_provider == ModelProviderKind::Gemini && gemini_api_key.is_none() {
            return Err(StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key MEETLY_GEMINI_API_KEY".to_string(),
            });
        }
        let gemini_model = optional_string(kv, "MEETLY_GEMINI_MODEL")
            .unwrap_or_else(|| "gemini-2.5-flash".to_string());
        let gemini_base_url = optional_string(kv, "MEETLY_GEMINI_BASE_URL")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string());
        let model_timeout_ms = parse_u64(
            kv.get("MEETLY_MODEL_TIMEOUT_MS"),
            60_000,
            "MEETLY_MODEL_TIMEOUT_MS",
        )?;

        let mailer = parse_mailer(kv.get("MEETLY_MAILER"))?;
        let sendgrid_api_key = optional_string(kv, "MEETLY_SENDGRID_API_KEY");
        if mailer == MailerKind::SendGrid && sendgrid_api_key.is_none() {
            return Err(StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key MEETLY_SENDGRID_API_KEY".to_string(),
            });
        }
        let sendgrid_base_url = optional_string(kv, "MEETLY_SENDGRID_BASE_URL")
            .unwrap_or_else(|| "https://api.sendgrid.com".to_string());
        let mail_from = optional_string(kv, "MEETLY_MAIL_FROM")
            .unwrap_or_else(|| "no-reply@meetly.ai".to_string());
        let mail_from_name = optional_string(kv, "MEETLY_MAIL_FROM_NAME")
            .unwrap_or_else(|| "Meetly.AI Dashboard".to_string());
        let mailer_timeout_ms = parse_u64(
            kv.get("MEETLY_MAILER_TIMEOUT_MS"),
            10_000,
            "MEETLY_MAILER_TIMEOUT_MS",
        )?;

        let otp_ttl_secs = parse_u64(kv.get("MEETLY_OTP_TTL_SECS"), 300, "MEETLY_OTP_TTL_SECS")?;
        if otp_ttl_secs == 0 || otp_ttl_secs > MAX_OTP_TTL_SECS {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!("MEETLY_OTP_TTL_SECS must be between 1 and {}", MAX_OTP_TTL_SECS),
            });
        }
        let otp_send_limit_per_window = parse_u32(
            kv.get("MEETLY_OTP_SEND_LIMIT"),
            5,
            "MEETLY_OTP_SEND_LIMIT",
        )?;
        let otp_send_window_secs = parse_u64(
            kv.get("MEETLY_OTP_SEND_WINDOW_SECS"),
            600,
            "MEETLY_OTP_SEND_WINDOW_SECS",
        )?;
        if otp_send_window_secs == 0 || otp_send_window_secs > MAX_OTP_TTL_SECS {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!(
                    "MEETLY_OTP_SEND_WINDOW_SECS must be between 1 and {}",
                    MAX_OTP_TTL_SECS
                ),
            });
        }

        let share_base_url = optional_string(kv, "MEETLY_SHARE_BASE_URL")
            .unwrap_or_else(|| "http://localhost:5173".to_string())
            .trim_end_matches('/')
            .to_string();

        let meetings_max_limit = parse_u32(
            kv.get("MEETLY_MEETINGS_MAX_LIMIT"),
            500,
            "MEETLY_MEETINGS_MAX_LIMIT",
        )?;
        let meetings_default_limit = parse_u32(
            kv.get("MEETLY_MEETINGS_DEFAULT_LIMIT"),
            50,
            "MEETLY_MEETINGS_DEFAULT_LIMIT",
        )?;
        if meetings_max_limit == 0
            || meetings_default_limit == 0
            || meetings_default_limit > meetings_max_limit
        {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "meeting limits must satisfy 1 <= MEETLY_MEETINGS_DEFAULT_LIMIT <= MEETLY_MEETINGS_MAX_LIMIT"
                    .to_string(),
            });
        }

        let cors_allow_origins = parse_cors_origins(kv.get("MEETLY_CORS_ALLOW_ORIGINS"));

        Ok(Self {
            bind_addr,
            db_path,
            store_timeout_ms,
            identity,
            model_provider,
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            model_timeout_ms,
            mailer,
            sendgrid_api_key,
            sendgrid_base_url,
            mail_from,
            mail_from_name,
            mailer_timeout_ms,
            otp_ttl_secs,
            otp_send_limit_per_window,
            otp_send_window_secs,
            share_base_url,
            meetings_default_limit,
            meetings_max_limit,
            cors_allow_origins,
        })
    }

    pub fn share_url(&self, token: &str) -> String {
        format!("{}/shared/{}", self.share_base_url, token)
    }

    /// Missing means the configured default; anything else is pulled into `[1, max]`.
    pub fn clamp_meetings_limit(&self, requested: Option<i64>) -> u32 {
        match requested {
            None => self.meetings_default_limit,
            Some(limit) => limit.clamp(1, i64::from(self.meetings_max_limit)) as u32,
        }
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn optional_string(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value.map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_model_provider(value: Option<&String>) -> Result<ModelProviderKind, StartupError> {
    let provider = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("gemini");

    match provider {
        "gemini" => Ok(ModelProviderKind::Gemini),
        "mock" => Ok(ModelProviderKind::Mock),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "MEETLY_MODEL_PROVIDER must be gemini or mock".to_string(),
        }),
    }
}

fn parse_mailer(value: Option<&String>) -> Result<MailerKind, StartupError> {
    let mailer = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("sendgrid");

    match mailer {
        "sendgrid" => Ok(MailerKind::SendGrid),
        "log" => Ok(MailerKind::Log),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "MEETLY_MAILER must be sendgrid or log".to_string(),
        }),
    }
}

fn parse_cors_origins(value: Option<&String>) -> CorsOrigins {
    let raw = value.map(|s| s.trim()).unwrap_or("");
    if raw.is_empty() || raw == "*" {
        return CorsOrigins::Any;
    }

    let mut origins = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != "*")
        .map(|s| s.trim_end_matches('/').to_string())
        .collect::<Vec<_>>();
    origins.sort();
    origins.dedup();

    if origins.is_empty() {
        CorsOrigins::Any
    } else {
        CorsOrigins::List(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ok_env() -> HashMap<String, String> {
        HashMap::from([
            ("MEETLY_GEMINI_API_KEY".to_string(), "gemini-key".to_string()),
            ("MEETLY_SENDGRID_API_KEY".to_string(), "sendgrid-key".to_string()),
        ])
    }

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let cfg = ServerConfig::from_kv(&minimal_ok_env()).expect("config should be valid");
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.db_path, "meetings.db");
        assert_eq!(cfg.model_provider, ModelProviderKind::Gemini);
        assert_eq!(cfg.gemini_model, "gemini-2.5-flash");
        assert_eq!(cfg.mailer, MailerKind::SendGrid);
        assert_eq!(cfg.otp_ttl_secs, 300);
        assert_eq!(cfg.otp_send_limit_per_window, 5);
        assert_eq!(cfg.otp_send_window_secs, 600);
        assert_eq!(cfg.identity.timeout, Duration::from_secs(10));
        assert_eq!(cfg.meetings_default_limit, 50);
        assert_eq!(cfg.cors_allow_origins, CorsOrigins::Any);
        assert_eq!(cfg.share_url("abc"), "http://localhost:5173/shared/abc");
    }

    #[test]
    fn gemini_requires_api_key() {
        let mut env = minimal_ok_env();
        env.remove("MEETLY_GEMINI_API_KEY");
        let err = ServerConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");

        env.insert("MEETLY_MODEL_PROVIDER".to_string(), "mock".to_string());
        let cfg = ServerConfig::from_kv(&env).expect("mock provider needs no key");
        assert_eq!(cfg.model_provider, ModelProviderKind::Mock);
    }

    #[test]
    fn sendgrid_requires_api_key_but_log_mailer_does_not() {
        let mut env = minimal_ok_env();
        env.remove("MEETLY_SENDGRID_API_KEY");
        let err = ServerConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");

        env.insert("MEETLY_MAILER".to_string(), "log".to_string());
        let cfg = ServerConfig::from_kv(&env).expect("log mailer needs no key");
        assert_eq!(cfg.mailer, MailerKind::Log);
    }

    #[test]
    fn unknown_provider_and_zero_ttl_are_rejected() {
        let mut env = minimal_ok_env();
        env.insert("MEETLY_MODEL_PROVIDER".to_string(), "gpt".to_string());
        assert_eq!(ServerConfig::from_kv(&env).unwrap_err().code, "ERR_INVALID_CONFIG");

        let mut env = minimal_ok_env();
        env.insert("MEETLY_OTP_TTL_SECS".to_string(), "0".to_string());
        assert_eq!(ServerConfig::from_kv(&env).unwrap_err().code, "ERR_INVALID_CONFIG");

        let mut env = minimal_ok_env();
        env.insert("MEETLY_STORE_TIMEOUT_MS".to_string(), "soon".to_string());
        assert_eq!(ServerConfig::from_kv(&env).unwrap_err().code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn otp_windows_are_bounded_above() {
        let mut env = minimal_ok_env();
        env.insert("MEETLY_OTP_TTL_SECS".to_string(), u64::MAX.to_string());
        assert_eq!(ServerConfig::from_kv(&env).unwrap_err().code, "ERR_INVALID_CONFIG");

        env.insert("MEETLY_OTP_TTL_SECS".to_string(), MAX_OTP_TTL_SECS.to_string());
        let cfg = ServerConfig::from_kv(&env).expect("a day is an acceptable ttl");
        assert_eq!(cfg.otp_ttl_secs, MAX_OTP_TTL_SECS);

        env.insert("MEETLY_OTP_SEND_WINDOW_SECS".to_string(), "0".to_string());
        assert_eq!(ServerConfig::from_kv(&env).unwrap_err().code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn default_limit_may_not_exceed_max() {
        let mut env = minimal_ok_env();
        env.insert("MEETLY_MEETINGS_DEFAULT_LIMIT".to_string(), "100".to_string());
        env.insert("MEETLY_MEETINGS_MAX_LIMIT".to_string(), "10".to_string());
        assert_eq!(ServerConfig::from_kv(&env).unwrap_err().code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn meetings_limit_is_clamped() {
        let cfg = ServerConfig::from_kv(&minimal_ok_env()).expect("config should be valid");
        assert_eq!(cfg.clamp_meetings_limit(None), 50);
        assert_eq!(cfg.clamp_meetings_limit(Some(0)), 1);
        assert_eq!(cfg.clamp_meetings_limit(Some(-7)), 1);
        assert_eq!(cfg.clamp_meetings_limit(Some(20)), 20);
        assert_eq!(cfg.clamp_meetings_limit(Some(10_000)), 500);
    }

    #[test]
    fn cors_origins_parse_list_or_wildcard() {
        let mut env = minimal_ok_env();
        env.insert(
            "MEETLY_CORS_ALLOW_ORIGINS".to_string(),
            " https://b.example/, https://a.example ,".to_string(),
        );
        let cfg = ServerConfig::from_kv(&env).expect("config should be valid");
        assert_eq!(
            cfg.cors_allow_origins,
            CorsOrigins::List(vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ])
        );

        env.insert("MEETLY_CORS_ALLOW_ORIGINS".to_string(), "*".to_string());
        let cfg = ServerConfig::from_kv(&env).expect("config should be valid");
        assert_eq!(cfg.cors_allow_origins, CorsOrigins::Any);
    }

    #[test]
    fn env_file_lines_support_comments_and_quotes() {
        let kv = parse_env_lines(
            "# local overrides\nMEETLY_DB_PATH=\"/tmp/meetly.db\"\n\nMEETLY_MAILER='log'\n",
        )
        .expect("env lines should parse");
        assert_eq!(kv.get("MEETLY_DB_PATH").map(String::as_str), Some("/tmp/meetly.db"));
        assert_eq!(kv.get("MEETLY_MAILER").map(String::as_str), Some("log"));

        let err = parse_env_lines("NOT_A_PAIR").unwrap_err();
        assert_eq!(err.code, "ERR_CONFIG_FILE_PARSE");
    }
}
