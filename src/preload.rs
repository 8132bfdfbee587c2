use crate::error::{Error, Result};
use crate::poller::Poller;

/// Global the preload script assigns when no other name is given.
pub const DEFAULT_GLOBAL_NAME: &str = "__splitCachePreload";

/// Projection of a cache that has never synced.
pub const EMPTY_PROJECTION: &str = "{}";

/// Wraps a serialized projection in a `<script>` block assigning it to
/// `window.<global_name>`.
///
/// `global_name` is written as is; check it with [`is_valid_global_name`]
/// first unless it is trusted.
pub fn wrap_script(global_name: &str, serialized: &str) -> String {
    format!("<script>\n  {}\n</script>", assignment(global_name, serialized))
}

/// The `window.<global_name> = <payload>;` statement inside the script.
/// Like [`wrap_script`], `global_name` is not checked.
///
/// `<` is escaped so nothing inside the payload can close the script tag.
/// The escape is a valid JSON string escape, so the assigned value is
/// unchanged.
pub fn assignment(global_name: &str, serialized: &str) -> String {
    let payload = serialized
        .replace('<', "\\u003c")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029");
    format!("window.{} = {};", global_name, payload)
}

/// Whether `name` can be used as `window.<name>` without quoting.
pub fn is_valid_global_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Builds embeddable preload scripts from a poller's cache.
#[derive(Clone)]
pub struct PreloadScriptBuilder {
    poller: Poller,
    global_name: String,
}

impl PreloadScriptBuilder {
    /// Uses the global name from the poller's configuration.
    pub fn new(poller: Poller) -> Self {
        let global_name = poller.config().global_name.clone();
        PreloadScriptBuilder {
            poller,
            global_name,
        }
    }

    pub fn global_name(&self) -> &str {
        &self.global_name
    }

    /// Script for every split when `splits` is empty, otherwise for the
    /// named subset. Subsets are computed once and then served from cache.
    pub async fn script<S: AsRef<str>>(&self, splits: &[S]) -> Result<String> {
        self.script_for(&self.global_name, splits).await
    }

    /// Like [`script`](Self::script), assigning to `global_name` instead.
    /// Fails with [`Error::InvalidGlobalName`] unless `global_name` is a
    /// plain identifier.
    pub async fn script_for<S: AsRef<str>>(
        &self,
        global_name: &str,
        splits: &[S],
    ) -> Result<String> {
        if !is_valid_global_name(global_name) {
            return Err(Error::InvalidGlobalName(global_name.to_string()));
        }
        let serialized = self.poller.serialized_data(splits).await;
        Ok(wrap_script(global_name, &serialized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Feed, MockFeedClient, UnconfiguredClient};
    use crate::config::Config;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_wrap_empty_projection() {
        assert_eq!(
            wrap_script(DEFAULT_GLOBAL_NAME, EMPTY_PROJECTION),
            "<script>\n  window.__splitCachePreload = {};\n</script>"
        );
    }

    #[test]
    fn test_wrap_escapes_closing_tags() {
        let script = wrap_script("x", r#"{"a":"</script><b>"}"#);
        assert!(!script.contains("</script><b>"));
        assert!(script.contains(r#"{"a":"\u003c/script>\u003cb>"}"#));
        assert!(script.ends_with("\n</script>"));
    }

    #[test]
    fn test_global_name_validation() {
        assert!(is_valid_global_name("__splitCachePreload"));
        assert!(is_valid_global_name("$preload2"));
        assert!(!is_valid_global_name(""));
        assert!(!is_valid_global_name("2fast"));
        assert!(!is_valid_global_name("a.b"));
        assert!(!is_valid_global_name("a;alert(1)"));
    }

    #[tokio::test]
    async fn test_unsynced_script_assigns_empty_object() {
        let poller = Poller::new(Arc::new(UnconfiguredClient), Config::default());
        let builder = PreloadScriptBuilder::new(poller);
        assert_eq!(
            builder.script::<&str>(&[]).await.unwrap(),
            "<script>\n  window.__splitCachePreload = {};\n</script>"
        );
    }

    #[tokio::test]
    async fn test_alternate_global_name() {
        let client = Arc::new(MockFeedClient::new());
        client.set_page(
            Feed::Splits,
            -1,
            json!({"splits": [{"name": "a", "status": "ACTIVE"}], "till": 1}),
        );
        let poller = Poller::new(client, Config::default());
        poller.poll().await;

        let builder = PreloadScriptBuilder::new(poller);
        let script = builder.script_for("__otherPreload", &["a"]).await.unwrap();
        assert!(script.starts_with("<script>\n  window.__otherPreload = {"));
        assert!(script.contains(r#""since":1"#));
    }

    #[tokio::test]
    async fn test_script_for_rejects_unsafe_global_name() {
        let poller = Poller::new(Arc::new(UnconfiguredClient), Config::default());
        let builder = PreloadScriptBuilder::new(poller);

        let err = builder
            .script_for("x=1;fetch('//evil')//", &["a"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGlobalName(ref name) if name.starts_with("x=1")));
    }

    #[tokio::test]
    async fn test_script_rejects_unvalidated_configured_name() {
        // Poller::new skips Config::validate, so the configured name is
        // checked when the script is built.
        let poller = Poller::new(
            Arc::new(UnconfiguredClient),
            Config {
                global_name: "a</script>".into(),
                ..Config::default()
            },
        );
        let builder = PreloadScriptBuilder::new(poller);
        assert!(matches!(
            builder.script::<&str>(&[]).await,
            Err(Error::InvalidGlobalName(_))
        ));
    }
}
