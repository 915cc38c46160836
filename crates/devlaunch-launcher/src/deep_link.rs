//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Deep-link requests and launch options."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::LauncherError;

/// Opaque options passed at launch or alongside a deep link.
pub type LaunchOptions = IndexMap<String, Value>;

/// A navigation intent addressed to the app runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepLink {
    pub url: Url,
    #[serde(default)]
    pub options: LaunchOptions,
}

impl DeepLink {
    /// Parse `raw` into a deep link.
    ///
    /// Links must be absolute and carry something after the scheme;
    /// `myapp://` alone is rejected.
    pub fn parse(raw: &str, options: LaunchOptions) -> Result<Self, LauncherError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed)
            .map_err(|err| LauncherError::DeepLinkRejected(format!("'{trimmed}': {err}")))?;
        let has_target = url.host_str().is_some_and(|host| !host.is_empty())
            || !matches!(url.path(), "" | "/");
        if !has_target {
            return Err(LauncherError::DeepLinkRejected(format!(
                "'{trimmed}' has no target"
            )));
        }
        Ok(Self { url, options })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }
}

impl std::fmt::Display for DeepLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_custom_scheme_links() {
        let link = DeepLink::parse("myapp://project/123", LaunchOptions::new()).unwrap();
        assert_eq!(link.scheme(), "myapp");
        assert_eq!(link.url.host_str(), Some("project"));
        assert_eq!(link.url.path(), "/123");
        assert_eq!(link.to_string(), "myapp://project/123");
    }

    #[test]
    fn rejects_malformed_links() {
        for raw in ["", "not a url", "/relative/path", "myapp://"] {
            assert!(
                matches!(
                    DeepLink::parse(raw, LaunchOptions::new()),
                    Err(LauncherError::DeepLinkRejected(_))
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn keeps_options() {
        let mut options = LaunchOptions::new();
        options.insert("referrer".into(), Value::from("push"));
        let link = DeepLink::parse("myapp:settings", options.clone()).unwrap();
        assert_eq!(link.options, options);
    }
}
