//! Backlog nudges
//!
//! When the user checks on their tasks while five or more are still open, the
//! reply opens with a nudge in one of two tones. After each nudge the user can
//! say whether it helped; the tone with the better record is preferred next
//! time. Feedback counts persist as JSON next to the config.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Open tasks needed before a nudge fires
pub const NUDGE_THRESHOLD: usize = 5;

/// Phrases that count as checking on the backlog
const TASK_CHECK_PHRASES: &[&str] = &[
    "タスク確認",
    "タスク状況",
    "未完了",
    "残り",
    "進捗",
    "タスク一覧",
    "やること確認",
];

/// Trials each tone gets before the success rate decides
const MIN_TRIALS: u32 = 2;

const STATS_FILE: &str = "nudge_stats.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NudgePattern {
    Gentle,
    Direct,
}

impl NudgePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgePattern::Gentle => "gentle",
            NudgePattern::Direct => "direct",
        }
    }

    fn template(&self, count: usize) -> String {
        match self {
            NudgePattern::Gentle => {
                format!("うーん...{}個もタスクが残ってるね😅 どれか終わったのある？", count)
            }
            NudgePattern::Direct => {
                format!("おい！{}個もタスク残ってるじゃん！😤 本気でやる気ある？", count)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStats {
    pub success: u32,
    pub total: u32,
}

impl PatternStats {
    /// 0.5 until there is any feedback
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.5;
        }
        f64::from(self.success) / f64::from(self.total)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeStats {
    pub gentle: PatternStats,
    pub direct: PatternStats,
}

impl NudgeStats {
    pub fn get(&self, pattern: NudgePattern) -> &PatternStats {
        match pattern {
            NudgePattern::Gentle => &self.gentle,
            NudgePattern::Direct => &self.direct,
        }
    }

    fn get_mut(&mut self, pattern: NudgePattern) -> &mut PatternStats {
        match pattern {
            NudgePattern::Gentle => &mut self.gentle,
            NudgePattern::Direct => &mut self.direct,
        }
    }
}

/// Default stats location under the platform config dir
pub fn default_stats_path() -> Option<PathBuf> {
    crate::config::default_config_path()
        .and_then(|p| p.parent().map(|dir| dir.join(STATS_FILE)))
}

/// Decides when to nudge and in which tone
#[derive(Debug, Clone)]
pub struct Nudger {
    stats_path: PathBuf,
    stats: NudgeStats,
}

impl Nudger {
    /// Read stats from `path`. A missing or unreadable file starts fresh.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let stats_path = path.into();
        let stats = match File::open(&stats_path) {
            Ok(file) => serde_json::from_reader(file).unwrap_or_else(|e| {
                warn!(path = %stats_path.display(), error = %e, "unreadable nudge stats, starting fresh");
                NudgeStats::default()
            }),
            Err(_) => NudgeStats::default(),
        };
        Self { stats_path, stats }
    }

    pub fn stats(&self) -> &NudgeStats {
        &self.stats
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    /// Whether `text` asks about the backlog
    pub fn is_task_check(text: &str) -> bool {
        TASK_CHECK_PHRASES.iter().any(|p| text.contains(p))
    }

    /// Tone for the next nudge, or `None` when `todo_count` is below the threshold
    pub fn choose(&self, text: &str, todo_count: usize) -> Option<NudgePattern> {
        if todo_count < NUDGE_THRESHOLD || !Self::is_task_check(text) {
            return None;
        }

        let gentle = &self.stats.gentle;
        let direct = &self.stats.direct;
        let pattern = if gentle.total < MIN_TRIALS && direct.total < MIN_TRIALS {
            // Alternate until both tones have some history
            if direct.total < gentle.total {
                NudgePattern::Direct
            } else {
                NudgePattern::Gentle
            }
        } else if gentle.success_rate() >= direct.success_rate() {
            NudgePattern::Gentle
        } else {
            NudgePattern::Direct
        };
        debug!(pattern = pattern.as_str(), todo_count, "nudging");
        Some(pattern)
    }

    pub fn message(pattern: NudgePattern, todo_count: usize) -> String {
        format!(
            "{}\n\n📋 未完了タスクが{}個あります！\n実は終わってるタスクがあれば教えて！",
            pattern.template(todo_count),
            todo_count
        )
    }

    /// Reply to the user's feedback on a nudge
    pub fn acknowledgement(effective: bool) -> &'static str {
        if effective {
            "ありがとうございます！この声かけが効果的だったようですね。😊 次回もこの調子で応援します！"
        } else {
            "そうでしたか...次はアプローチを変えてみますね。😅"
        }
    }

    /// Count one piece of feedback and persist the stats
    pub fn record(&mut self, pattern: NudgePattern, effective: bool) -> Result<(), StoreError> {
        let entry = self.stats.get_mut(pattern);
        entry.total += 1;
        if effective {
            entry.success += 1;
        }
        self.save()
    }

    fn save(&self) -> Result<(), StoreError> {
        let file = File::create(&self.stats_path).map_err(|source| StoreError::Io {
            path: self.stats_path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(file, &self.stats).map_err(|source| StoreError::Json {
            path: self.stats_path.clone(),
            source,
        })
    }

    /// Summary of how each tone has landed so far
    pub fn report(&self) -> String {
        let gentle = &self.stats.gentle;
        let direct = &self.stats.direct;

        let mut out = String::from("📊 声かけ効果レポート\n");
        out.push_str(&"=".repeat(40));
        out.push_str(&format!(
            "\n😊 優しい声かけ: 効果{:.1}% ({}回実施)",
            gentle.success_rate() * 100.0,
            gentle.total
        ));
        out.push_str(&format!(
            "\n😤 直接的な声かけ: 効果{:.1}% ({}回実施)",
            direct.success_rate() * 100.0,
            direct.total
        ));

        let verdict = if gentle.total == 0 || direct.total == 0 {
            "データ蓄積中... より多くのフィードバックをお待ちしています！"
        } else if gentle.success_rate() > direct.success_rate() {
            "優しい声かけの方が効果が高いです。次回は優しいアプローチを採用します。"
        } else if direct.success_rate() > gentle.success_rate() {
            "直接的な声かけの方が効果が高いです。次回は直接的なアプローチを採用します。"
        } else {
            "どちらも同程度の効果です。"
        };
        out.push_str("\n\n💡 ");
        out.push_str(verdict);
        out
    }
}
