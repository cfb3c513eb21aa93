use std::path::PathBuf;

use anyhow::Result;
use uuid::Uuid;

use crate::config::ProxyConfig;

/// Credentials for one render attempt. The rotation id is baked into the
/// username, so presenting these to the proxy on connect yields a fresh
/// egress IP. Never reused across attempts.
#[derive(Debug, Clone)]
pub struct ProxySession {
    pub rotation_id: String,
    pub username: String,
    pub password: String,
    pub server: String,
}

#[derive(Debug, Clone)]
pub struct ProxySessionProvider {
    base: ProxyConfig,
}

impl ProxySessionProvider {
    pub fn new(base: ProxyConfig) -> Self {
        Self { base }
    }

    /// Mint a session with a rotation id distinct from every previous call.
    pub fn next(&self) -> ProxySession {
        let rotation_id = format!(
            "session_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        ProxySession {
            username: format!("{}-session-{}", self.base.username, rotation_id),
            password: self.base.password.clone(),
            server: self.base.server(),
            rotation_id,
        }
    }
}

/// Chrome ignores `user:pass@host` proxy URLs, so authentication has to be
/// answered from an extension listening on onAuthRequired. Writes a throwaway
/// extension dir for this session and returns its path.
pub fn write_auth_extension(session: &ProxySession) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("proxy-auth-{}", session.rotation_id));
    std::fs::create_dir_all(&dir)?;

    let manifest = r#"{
  "manifest_version": 2,
  "name": "Proxy Auth",
  "version": "1.0",
  "permissions": ["webRequest", "webRequestBlocking", "<all_urls>"],
  "background": { "scripts": ["background.js"] }
}"#;

    let background = format!(
        r#"chrome.webRequest.onAuthRequired.addListener(
  function(details) {{
    return {{ authCredentials: {{ username: {user}, password: {pass} }} }};
  }},
  {{ urls: ["<all_urls>"] }},
  ["blocking"]
);"#,
        user = serde_json::to_string(&session.username)?,
        pass = serde_json::to_string(&session.password)?,
    );

    std::fs::write(dir.join("manifest.json"), manifest)?;
    std::fs::write(dir.join("background.js"), background)?;
    Ok(dir)
}
