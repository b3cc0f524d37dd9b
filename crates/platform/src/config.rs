use std::{collections::HashMap, fs};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub platform_url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
    pub oauth_provider: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            platform_url: "http://127.0.0.1:54321".into(),
            anon_key: "dev-anon-key".into(),
            access_token: None,
            oauth_provider: "google".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("bookmarks.toml") {
        apply_file_overlay(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("PLATFORM_URL") {
        settings.platform_url = v;
    }
    if let Ok(v) = std::env::var("APP__PLATFORM_URL") {
        settings.platform_url = v;
    }

    if let Ok(v) = std::env::var("PLATFORM_ANON_KEY") {
        settings.anon_key = v;
    }
    if let Ok(v) = std::env::var("APP__PLATFORM_ANON_KEY") {
        settings.anon_key = v;
    }

    if let Ok(v) = std::env::var("PLATFORM_ACCESS_TOKEN") {
        settings.access_token = Some(v);
    }
    if let Ok(v) = std::env::var("APP__PLATFORM_ACCESS_TOKEN") {
        settings.access_token = Some(v);
    }

    if let Ok(v) = std::env::var("APP__OAUTH_PROVIDER") {
        settings.oauth_provider = v;
    }

    settings
}

fn apply_file_overlay(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("platform_url") {
        settings.platform_url = v.clone();
    }
    if let Some(v) = file_cfg.get("anon_key") {
        settings.anon_key = v.clone();
    }
    if let Some(v) = file_cfg.get("access_token") {
        settings.access_token = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("oauth_provider") {
        settings.oauth_provider = v.clone();
    }
}
