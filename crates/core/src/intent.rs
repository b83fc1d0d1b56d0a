//! Intent classification
//!
//! LLM extraction first; a deterministic keyword/regex extractor when the LLM
//! is absent, fails, or replies with nothing parseable.

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dates::DateResolver;
use crate::llm::{parse_first_json, Completion};
use crate::matcher::COMPLETE_FILLERS;
use crate::types::{parse_date, Action, Intent, IntentSource};

/// Confidence reported by the keyword extractor
pub const FALLBACK_CONFIDENCE: f32 = 0.7;

/// Confidence assumed when the LLM omits one
const DEFAULT_LLM_CONFIDENCE: f32 = 0.8;

const SYSTEM_PROMPT: &str = r#"あなたはタスク管理アプリの自然言語処理エンジンです。
ユーザーの入力を分析して、以下の操作のいずれかを特定してください：

1. ADD - タスクの追加
2. EDIT - タスクの編集
3. DELETE - タスクの削除
4. SHOW - タスクの表示
5. COMPLETE - タスクの完了
6. UNKNOWN - 不明な操作

また、タスク名や期限などの情報も抽出してください。
今日の日付は {{TODAY}} です。相対的な日付はこの日付を基準に YYYY-MM-DD に変換してください。

回答は以下のJSON形式のみで返してください：
{
    "action": "ADD|EDIT|DELETE|SHOW|COMPLETE|UNKNOWN",
    "task_name": "抽出されたタスク名",
    "due_date": "YYYY-MM-DD形式の期限（なければ null）",
    "task_index": "編集・削除・完了対象のタスク番号（なければ null）",
    "confidence": 0.0-1.0の確信度
}"#;

// Keyword sets, tested in this order
const ADD_KEYWORDS: &[&str] = &["追加", "作成", "新規", "登録", "add", "create", "new"];
pub const EDIT_KEYWORDS: &[&str] = &["編集", "修正", "変更", "更新", "edit", "modify", "update"];
const DELETE_KEYWORDS: &[&str] = &["削除", "消去", "remove", "delete"];
const SHOW_KEYWORDS: &[&str] = &["表示", "確認", "一覧", "show", "list", "view"];
const COMPLETE_KEYWORDS: &[&str] = &["完了", "終了", "done", "complete", "finish"];

const KEYWORD_TABLE: &[(Action, &[&str])] = &[
    (Action::Add, ADD_KEYWORDS),
    (Action::Edit, EDIT_KEYWORDS),
    (Action::Delete, DELETE_KEYWORDS),
    (Action::Show, SHOW_KEYWORDS),
    (Action::Complete, COMPLETE_KEYWORDS),
];

const STOPWORDS: &[&str] = &[
    "を", "の", "に", "で", "は", "が", "と", "から", "まで", "する", "した", "です", "ます",
];

static QUOTE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r#""([^"]+)""#, r"'([^']+)'", r"「([^」]+)」"]
        .into_iter()
        .map(|p| Regex::new(p).expect("valid quote regex"))
        .collect()
});

static INDEX_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(\d+)番目", r"(\d+)番", r"(?i)no\.\s*(\d+)", r"(\d+)つ目"]
        .into_iter()
        .map(|p| Regex::new(p).expect("valid index regex"))
        .collect()
});

// ============================================================================
// Raw LLM payload (more permissive than our strict types)
// ============================================================================

#[derive(Deserialize, Debug)]
struct RawIntent {
    action: String,
    #[serde(default)]
    task_name: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    task_index: Option<Value>,
    #[serde(default)]
    confidence: Option<Value>,
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize raw LLM output to our strict types
fn normalize_raw_intent(raw: RawIntent, dates: &DateResolver, today: NaiveDate) -> Intent {
    let due_date = raw
        .due_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .and_then(|s| parse_date(s).or_else(|| dates.resolve_on(s, today)));

    let task_index = raw
        .task_index
        .as_ref()
        .and_then(number_from)
        .filter(|n| n.fract() == 0.0 && *n >= 1.0)
        .map(|n| n as usize);

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(number_from)
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(DEFAULT_LLM_CONFIDENCE);

    Intent {
        action: Action::from_label(&raw.action),
        task_name: raw.task_name.unwrap_or_default().trim().to_string(),
        due_date,
        task_index,
        confidence,
        source: IntentSource::Llm,
    }
}

// ============================================================================
// Fallback extraction
// ============================================================================

/// Keyword table first; colloquial completion ("サッカーやった") only when
/// nothing else matched
fn classify_action(lower: &str) -> Action {
    KEYWORD_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(action, _)| *action)
        .or_else(|| {
            COMPLETE_FILLERS
                .iter()
                .any(|f| lower.contains(f))
                .then_some(Action::Complete)
        })
        .unwrap_or(Action::Unknown)
}

fn is_action_keyword(word: &str) -> bool {
    KEYWORD_TABLE
        .iter()
        .any(|(_, keywords)| keywords.contains(&word))
}

/// Quoted substring, else the first three content words
pub fn extract_task_name(text: &str) -> String {
    for re in QUOTE_PATTERNS.iter() {
        if let Some(name) = re
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .find(|s| !s.is_empty())
        {
            return name.to_string();
        }
    }

    text.split_whitespace()
        .filter(|w| w.chars().count() > 1)
        .filter(|w| !STOPWORDS.contains(w))
        .filter(|w| !is_action_keyword(&w.to_lowercase()))
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `N番目` / `N番` / `No.N` / `Nつ目`
pub fn extract_task_index(text: &str) -> Option<usize> {
    INDEX_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .filter(|n| *n >= 1)
    })
}

/// Deterministic, network-free classification
pub fn classify_fallback(user_text: &str, dates: &DateResolver, today: NaiveDate) -> Intent {
    let lower = user_text.to_lowercase();

    Intent {
        action: classify_action(&lower),
        task_name: extract_task_name(user_text),
        due_date: dates.resolve_on(user_text, today),
        task_index: extract_task_index(user_text),
        confidence: FALLBACK_CONFIDENCE,
        source: IntentSource::Fallback,
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Maps raw text to an [`Intent`]
pub struct IntentClassifier {
    llm: Option<Arc<dyn Completion>>,
    dates: DateResolver,
}

impl IntentClassifier {
    pub fn new(llm: Option<Arc<dyn Completion>>) -> Self {
        Self {
            llm,
            dates: DateResolver::standard(),
        }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn classify(&self, user_text: &str) -> Intent {
        self.classify_on(user_text, Local::now().date_naive())
    }

    /// Classify with relative dates resolved against `today`
    pub fn classify_on(&self, user_text: &str, today: NaiveDate) -> Intent {
        if let Some(intent) = self.classify_llm(user_text, today) {
            debug!(?intent, "LLM intent");
            return intent;
        }
        let intent = classify_fallback(user_text, &self.dates, today);
        debug!(?intent, "fallback intent");
        intent
    }

    fn classify_llm(&self, user_text: &str, today: NaiveDate) -> Option<Intent> {
        let llm = self.llm.as_ref()?;
        let system = SYSTEM_PROMPT.replace("{{TODAY}}", &today.format("%Y-%m-%d").to_string());

        let reply = match llm.complete(&system, &format!("ユーザー入力: {}", user_text)) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "LLM classification failed, using keyword fallback");
                return None;
            }
        };
        debug!(reply = %reply, "LLM raw response");

        match parse_first_json::<RawIntent>(&reply) {
            Some(raw) => Some(normalize_raw_intent(raw, &self.dates, today)),
            None => {
                warn!("no intent JSON in LLM reply, using keyword fallback");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::FakeLlm;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn offline() -> IntentClassifier {
        IntentClassifier::new(None)
    }

    fn with_llm(llm: FakeLlm) -> (IntentClassifier, Arc<FakeLlm>) {
        let llm = Arc::new(llm);
        (IntentClassifier::new(Some(llm.clone())), llm)
    }

    #[test]
    fn test_delete_with_bracket_quote_offline() {
        let intent = offline().classify_on("タスクを削除して「買い物」", today());
        assert_eq!(intent.action, Action::Delete);
        assert!(intent.task_name.contains("買い物"));
        assert_eq!(intent.source, IntentSource::Fallback);
        assert_eq!(intent.confidence, FALLBACK_CONFIDENCE);
    }

    #[test]
    fn test_delete_when_llm_fails() {
        let (classifier, llm) = with_llm(FakeLlm::failing());
        let intent = classifier.classify_on("タスクを削除して「買い物」", today());
        assert_eq!(intent.action, Action::Delete);
        assert_eq!(intent.task_name, "買い物");
        assert_eq!(llm.calls.borrow().len(), 1);
    }

    #[test]
    fn test_keyword_priority() {
        let c = offline();
        // ADD beats COMPLETE
        assert_eq!(c.classify_on("完了タスクを追加", today()).action, Action::Add);
        // SHOW beats COMPLETE
        assert_eq!(c.classify_on("未完了のタスクを表示", today()).action, Action::Show);
        assert_eq!(c.classify_on("Finish the report", today()).action, Action::Complete);
        assert_eq!(c.classify_on("こんにちは", today()).action, Action::Unknown);
    }

    #[test]
    fn test_colloquial_completion_offline() {
        let c = offline();
        assert_eq!(c.classify_on("サッカーやった", today()).action, Action::Complete);
        assert_eq!(c.classify_on("宿題終わった！", today()).action, Action::Complete);
        // a real keyword still decides
        assert_eq!(c.classify_on("やったタスクを表示", today()).action, Action::Show);
    }

    #[test]
    fn test_english_upper_case_keywords() {
        let intent = offline().classify_on("DELETE 'Buy milk'", today());
        assert_eq!(intent.action, Action::Delete);
        assert_eq!(intent.task_name, "Buy milk");
    }

    #[test]
    fn test_quote_kinds() {
        assert_eq!(extract_task_name(r#"add "write report" today"#), "write report");
        assert_eq!(extract_task_name("add 'x y' now"), "x y");
        assert_eq!(extract_task_name("「」と「会議」"), "会議");
    }

    #[test]
    fn test_token_name_skips_stopwords_and_keywords() {
        assert_eq!(
            extract_task_name("add write the quarterly report soon"),
            "write the quarterly"
        );
        assert_eq!(extract_task_name("レポート を 書く"), "レポート 書く");
        assert_eq!(extract_task_name(""), "");
    }

    #[test]
    fn test_task_index_patterns() {
        assert_eq!(extract_task_index("3番目を削除"), Some(3));
        assert_eq!(extract_task_index("2番を完了"), Some(2));
        assert_eq!(extract_task_index("no.4 delete"), Some(4));
        assert_eq!(extract_task_index("No.12"), Some(12));
        assert_eq!(extract_task_index("1つ目を編集"), Some(1));
        assert_eq!(extract_task_index("0番"), None);
        assert_eq!(extract_task_index("レポート"), None);
    }

    #[test]
    fn test_fallback_due_date() {
        let intent = offline().classify_on("明日までにレポートを追加", today());
        assert_eq!(intent.due_date, NaiveDate::from_ymd_opt(2025, 6, 11));
    }

    #[test]
    fn test_llm_reply_parsed() {
        let (classifier, llm) = with_llm(FakeLlm::replying(
            "はい。\n{\"action\": \"ADD\", \"task_name\": \"レポートを書く\", \"due_date\": \"2025-06-11\", \"task_index\": null, \"confidence\": 0.95}",
        ));
        let intent = classifier.classify_on("明日までにレポートを書く", today());
        assert_eq!(intent.action, Action::Add);
        assert_eq!(intent.task_name, "レポートを書く");
        assert_eq!(intent.due_date, NaiveDate::from_ymd_opt(2025, 6, 11));
        assert_eq!(intent.task_index, None);
        assert!((intent.confidence - 0.95).abs() < 1e-6);
        assert_eq!(intent.source, IntentSource::Llm);

        let calls = llm.calls.borrow();
        assert!(calls[0].0.contains("2025-06-10"));
        assert!(calls[0].1.contains("明日までにレポートを書く"));
    }

    #[test]
    fn test_llm_lenient_slots() {
        let (classifier, _) = with_llm(FakeLlm::replying(
            r#"{"action": "complete", "task_name": "", "due_date": "明日", "task_index": "2", "confidence": "1.7"}"#,
        ));
        let intent = classifier.classify_on("2番を完了", today());
        assert_eq!(intent.action, Action::Complete);
        assert_eq!(intent.task_index, Some(2));
        assert_eq!(intent.due_date, NaiveDate::from_ymd_opt(2025, 6, 11));
        assert_eq!(intent.confidence, 1.0);
    }

    #[test]
    fn test_llm_garbage_falls_back() {
        let (classifier, _) = with_llm(FakeLlm::replying("すみません、わかりません。"));
        let intent = classifier.classify_on("「牛乳」を追加", today());
        assert_eq!(intent.source, IntentSource::Fallback);
        assert_eq!(intent.action, Action::Add);
        assert_eq!(intent.task_name, "牛乳");
    }

    #[test]
    fn test_llm_missing_confidence_defaults() {
        let (classifier, _) = with_llm(FakeLlm::replying(r#"{"action": "SHOW"}"#));
        let intent = classifier.classify_on("一覧", today());
        assert_eq!(intent.action, Action::Show);
        assert_eq!(intent.confidence, DEFAULT_LLM_CONFIDENCE);
    }
}
