//! Persona restyling of confirmation messages
//!
//! A cosmetic second LLM pass. The deterministic template is always the
//! fallback, so a slow or confused model never loses information.

use tracing::{debug, warn};

use crate::config::PersonaConfig;
use crate::llm::Completion;

/// Built-in style used when the config does not provide one
pub const DEFAULT_STYLE: &str =
    "あなたはタスク管理アプリの親しみやすいアシスタントです。日本語で親しみやすい口調で話します。";

const REWRITE_RULES: &str = "次のメッセージを、あなたの口調で一言か二言に言い換えてください。\
タスク名・日付・番号・絵文字は変えずにそのまま残してください。\
言い換えたメッセージだけを出力してください。";

#[derive(Debug, Clone)]
pub struct Persona {
    style: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Persona {
    pub fn new(style: Option<String>) -> Self {
        let style = style
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STYLE.to_string());
        Self { style }
    }

    /// `None` unless persona restyling is enabled
    pub fn from_config(config: &PersonaConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.style.clone()))
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    /// Rewrite `template` in the persona's voice. The rewrite is discarded
    /// unless it is non-empty and still contains `must_keep`.
    pub fn restyle(&self, llm: &dyn Completion, template: &str, must_keep: &str) -> String {
        let system = format!("{}\n{}", self.style, REWRITE_RULES);

        let reply = match llm.complete(&system, template) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "persona rewrite failed, keeping template");
                return template.to_string();
            }
        };

        let reply = reply.trim();
        if reply.is_empty() {
            debug!("persona rewrite empty, keeping template");
            return template.to_string();
        }
        if !must_keep.is_empty() && !reply.contains(must_keep) {
            debug!(must_keep, "persona rewrite dropped the task name, keeping template");
            return template.to_string();
        }
        reply.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::FakeLlm;

    const TEMPLATE: &str = "✅ タスク「レポート」を追加しました";

    #[test]
    fn test_accepts_rewrite_keeping_name() {
        let llm = FakeLlm::replying("  やったね！「レポート」を追加しておいたよ✅  ");
        let out = Persona::default().restyle(&llm, TEMPLATE, "レポート");
        assert_eq!(out, "やったね！「レポート」を追加しておいたよ✅");

        let calls = llm.calls.borrow();
        assert!(calls[0].0.starts_with(DEFAULT_STYLE));
        assert_eq!(calls[0].1, TEMPLATE);
    }

    #[test]
    fn test_failure_returns_template() {
        let out = Persona::default().restyle(&FakeLlm::failing(), TEMPLATE, "レポート");
        assert_eq!(out, TEMPLATE);
    }

    #[test]
    fn test_empty_or_lossy_rewrite_returns_template() {
        let persona = Persona::default();
        assert_eq!(persona.restyle(&FakeLlm::replying("   "), TEMPLATE, "レポート"), TEMPLATE);
        assert_eq!(
            persona.restyle(&FakeLlm::replying("追加したよ！"), TEMPLATE, "レポート"),
            TEMPLATE
        );
    }

    #[test]
    fn test_from_config() {
        let off = PersonaConfig::default();
        assert!(Persona::from_config(&off).is_none());

        let on = PersonaConfig {
            enabled: true,
            style: Some("関西弁で話す".to_string()),
        };
        assert_eq!(Persona::from_config(&on).unwrap().style(), "関西弁で話す");

        let blank = PersonaConfig {
            enabled: true,
            style: Some("  ".to_string()),
        };
        assert_eq!(Persona::from_config(&blank).unwrap().style(), DEFAULT_STYLE);
    }
}
