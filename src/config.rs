//! Process configuration, read once at startup
//!
//! Credentials and endpoints come from the environment. The resulting
//! `Settings` value is immutable and handed explicitly to whatever needs it
//! (adapter construction, the sheets client) instead of living in a global.

/// Credentials for an OAuth2-token platform (Marktplaats)
#[derive(Debug, Clone, Default)]
pub struct TokenCredentials {
    pub access_token: Option<String>,
    pub base_url: String,
}

/// Credentials for a session-login platform (Vinted, Depop, Facebook)
#[derive(Debug, Clone, Default)]
pub struct SessionCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
    pub base_url: String,
}

impl SessionCredentials {
    pub fn is_configured(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }
}

/// Google Sheets accounting sink configuration
#[derive(Debug, Clone, Default)]
pub struct SheetsSettings {
    pub access_token: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub base_url: String,
}

impl SheetsSettings {
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() && self.spreadsheet_id.is_some()
    }
}

/// Full application configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub marktplaats: TokenCredentials,
    pub vinted: SessionCredentials,
    pub depop: SessionCredentials,
    pub facebook: SessionCredentials,
    pub sheets: SheetsSettings,
    /// Per-request timeout applied by every adapter, in seconds
    pub request_timeout_secs: u64,
    pub sync_interval_minutes: u64,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.to_string())
}

impl Settings {
    /// Read configuration from the environment, falling back to defaults
    /// for everything but credentials.
    pub fn from_env() -> Self {
        let settings = Self {
            marktplaats: TokenCredentials {
                access_token: env_var("MARKTPLAATS_ACCESS_TOKEN"),
                base_url: env_or("MARKTPLAATS_API_BASE_URL", "https://api.marktplaats.nl/v1"),
            },
            vinted: SessionCredentials {
                email: env_var("VINTED_EMAIL"),
                password: env_var("VINTED_PASSWORD"),
                base_url: env_or("VINTED_BASE_URL", "https://www.vinted.nl"),
            },
            depop: SessionCredentials {
                email: env_var("DEPOP_USERNAME"),
                password: env_var("DEPOP_PASSWORD"),
                base_url: env_or("DEPOP_BASE_URL", "https://www.depop.com"),
            },
            facebook: SessionCredentials {
                email: env_var("FACEBOOK_EMAIL"),
                password: env_var("FACEBOOK_PASSWORD"),
                base_url: env_or("FACEBOOK_BASE_URL", "https://www.facebook.com"),
            },
            sheets: SheetsSettings {
                access_token: env_var("GOOGLE_SHEETS_ACCESS_TOKEN"),
                spreadsheet_id: env_var("GOOGLE_SHEETS_SPREADSHEET_ID"),
                base_url: env_or(
                    "GOOGLE_SHEETS_API_BASE_URL",
                    "https://sheets.googleapis.com/v4",
                ),
            },
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", "30")
                .parse()
                .unwrap_or(30),
            sync_interval_minutes: env_or("SYNC_INTERVAL_MINUTES", "15")
                .parse()
                .unwrap_or(15),
        };

        if settings.marktplaats.access_token.is_none() {
            log::warn!("MARKTPLAATS_ACCESS_TOKEN not set, marktplaats adapter disabled");
        }
        if !settings.sheets.is_configured() {
            log::warn!("Google Sheets credentials not set, sales will not be forwarded");
        }

        settings
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            marktplaats: TokenCredentials {
                access_token: None,
                base_url: "https://api.marktplaats.nl/v1".to_string(),
            },
            vinted: SessionCredentials {
                email: None,
                password: None,
                base_url: "https://www.vinted.nl".to_string(),
            },
            depop: SessionCredentials {
                email: None,
                password: None,
                base_url: "https://www.depop.com".to_string(),
            },
            facebook: SessionCredentials {
                email: None,
                password: None,
                base_url: "https://www.facebook.com".to_string(),
            },
            sheets: SheetsSettings {
                access_token: None,
                spreadsheet_id: None,
                base_url: "https://sheets.googleapis.com/v4".to_string(),
            },
            request_timeout_secs: 30,
            sync_interval_minutes: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_production_endpoints() {
        let settings = Settings::default();
        assert_eq!(settings.marktplaats.base_url, "https://api.marktplaats.nl/v1");
        assert_eq!(settings.sync_interval_minutes, 15);
        assert!(!settings.sheets.is_configured());
    }

    #[test]
    fn session_credentials_need_both_fields() {
        let mut creds = SessionCredentials {
            email: Some("user@example.com".to_string()),
            password: None,
            base_url: String::new(),
        };
        assert!(!creds.is_configured());
        creds.password = Some("secret".to_string());
        assert!(creds.is_configured());
    }
}
