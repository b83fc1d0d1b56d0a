//! tasktalk CLI
//!
//! A thin wrapper around tasktalk-core: a numbered menu, a natural-language
//! mode, and a one-shot mode for a single utterance.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use tasktalk_core::nudge::default_stats_path;
use tasktalk_core::{
    Action, CalendarSync, Completion, Config, ConversationLog, GoogleCalendar, Intent,
    IntentClassifier, ListFilter, Listing, NudgePattern, Nudger, OpenRouterClient, Orchestrator,
    Persona, TaskStore,
};

/// Phrases that leave natural-language mode
const EXIT_WORDS: &[&str] = &["戻る", "back", "exit", "quit"];

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tasktalk")]
#[command(about = "Manage a task list in natural Japanese (or simple English)")]
struct Args {
    /// Utterance to process once (opens the menu when omitted)
    text: Option<String>,

    /// Task store CSV (overrides config and TASKTALK_STORE)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Config file (default: <config dir>/tasktalk/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Never call the LLM; classify with keywords only
    #[arg(long = "no-llm")]
    no_llm: bool,

    /// Restyle confirmations through the LLM persona
    #[arg(long)]
    persona: bool,

    /// Append every turn to this conversation log CSV
    #[arg(long)]
    history: Option<PathBuf>,

    /// Never open replies with a backlog nudge
    #[arg(long = "no-nudge")]
    no_nudge: bool,

    /// Print how each nudge tone has landed and exit
    #[arg(long = "nudge-report")]
    nudge_report: bool,

    /// Enable verbose debug output
    #[arg(long, short = 'v')]
    verbose: bool,
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Everything the loops need, built once per process
struct App {
    orchestrator: Orchestrator,
    /// Why natural-language mode cannot be entered, if it cannot
    config_error: Option<String>,
    llm_notice_shown: bool,
}

fn build_app(args: &Args) -> App {
    let (mut config, config_error) = match Config::load(args.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => {
            // Menu mode still works on defaults; the LLM and calendar stay off
            let mut config = Config::default();
            if let Err(env_err) = config.apply_env(|key| std::env::var(key).ok()) {
                warn!(error = %env_err, "ignoring invalid environment override");
            }
            config.llm.api_key = None;
            config.calendar.access_token = None;
            (config, Some(e.to_string()))
        }
    };

    let store_path = args.store.clone().unwrap_or_else(|| config.store_path.clone());
    let store = TaskStore::new(store_path);

    let llm: Option<Arc<dyn Completion>> = if args.no_llm {
        None
    } else {
        match OpenRouterClient::from_config(&config.llm) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                debug!(error = %e, "LLM disabled");
                None
            }
        }
    };

    let calendar = match GoogleCalendar::from_config(&config.calendar) {
        Ok(client) => CalendarSync::new(Some(Box::new(client))),
        Err(e) => {
            debug!(error = %e, "calendar sync disabled");
            CalendarSync::disabled()
        }
    };

    let mut orchestrator =
        Orchestrator::new(store, IntentClassifier::new(llm.clone()), calendar);

    config.persona.enabled |= args.persona;
    if let Some(persona) = Persona::from_config(&config.persona) {
        match llm {
            Some(llm) => orchestrator = orchestrator.with_persona(persona, llm),
            None => warn!("persona requested but no LLM is configured"),
        }
    }

    if config.nudge.enabled && !args.no_nudge {
        match config.nudge.stats_path.clone().or_else(default_stats_path) {
            Some(path) => orchestrator = orchestrator.with_nudger(Nudger::load(path)),
            None => debug!("no config dir for nudge stats, nudges disabled"),
        }
    }

    if let Some(path) = args.history.clone().or_else(|| config.history_path.clone()) {
        orchestrator = orchestrator.with_history(ConversationLog::new(path));
    }

    App {
        orchestrator,
        config_error,
        llm_notice_shown: false,
    }
}

// ============================================================================
// Input helpers
// ============================================================================

/// Print `label`, read one line; `None` at end of input
fn prompt(input: &mut impl BufRead, label: &str) -> Result<Option<String>> {
    print!("{}", label);
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    let read = input.read_line(&mut line).context("Failed to read input")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn is_exit_word(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    EXIT_WORDS.contains(&lower.as_str())
}

/// Strict YYYY-MM-DD, empty meaning no due date
fn parse_menu_due(text: &str) -> Result<Option<NaiveDate>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| "エラー: 期限は YYYY-MM-DD 形式で入力してください。".to_string())
}

// ============================================================================
// Menu
// ============================================================================

fn show_menu() {
    println!("\n{}", "=".repeat(40));
    println!("         tasktalk TODO管理");
    println!("{}", "=".repeat(40));
    println!("1. タスク追加");
    println!("2. タスク確認");
    println!("3. タスク完了");
    println!("4. 🤖 自然言語モード");
    println!("5. 終了");
    println!("{}", "=".repeat(40));
}

fn menu_add(app: &mut App, input: &mut impl BufRead) -> Result<()> {
    println!("\n=== タスク追加 ===");
    let Some(name) = prompt(input, "タスク名を入力してください: ")? else {
        return Ok(());
    };
    if name.is_empty() {
        println!("エラー: タスク名は必須です。");
        return Ok(());
    }

    let Some(due) = prompt(input, "期限を入力してください (YYYY-MM-DD形式、空欄で期限なし): ")? else {
        return Ok(());
    };
    let due_date = match parse_menu_due(&due) {
        Ok(d) => d,
        Err(message) => {
            println!("{}", message);
            return Ok(());
        }
    };

    let mut intent = Intent::menu(Action::Add);
    intent.task_name = name.clone();
    intent.due_date = due_date;
    println!("{}", app.orchestrator.execute(&intent, &name).message);
    Ok(())
}

fn menu_show(app: &mut App) {
    println!("\n=== タスク一覧 ===");
    println!("{}", app.orchestrator.execute(&Intent::menu(Action::Show), "").message);
}

fn menu_complete(app: &mut App, input: &mut impl BufRead) -> Result<()> {
    println!("\n=== タスク完了 ===");
    let tasks = match app.orchestrator.store().load() {
        Ok(tasks) => tasks,
        Err(e) => {
            println!("⚠️ エラーが発生しました: {}", e);
            return Ok(());
        }
    };

    let listing = Listing::new(&tasks, ListFilter::Todo);
    if listing.is_empty() {
        println!("完了可能なタスクがありません。");
        return Ok(());
    }

    println!("未完了のタスク:");
    for (i, task) in listing.tasks(&tasks).enumerate() {
        match task.due_label() {
            Some(due) => println!("[No.{}] {} (期限: {})", i + 1, task.name, due),
            None => println!("[No.{}] {}", i + 1, task.name),
        }
    }

    let Some(choice) = prompt(input, "\n完了するタスクの番号を入力してください: ")? else {
        return Ok(());
    };
    let index: usize = match choice.parse() {
        Ok(n) => n,
        Err(_) => {
            println!("エラー: 数値を入力してください。");
            return Ok(());
        }
    };

    let mut intent = Intent::menu(Action::Complete);
    intent.task_index = Some(index);
    println!("{}", app.orchestrator.execute(&intent, &choice).message);
    Ok(())
}

// ============================================================================
// Natural-language mode
// ============================================================================

fn natural_language_mode(app: &mut App, input: &mut impl BufRead) -> Result<()> {
    if let Some(error) = &app.config_error {
        println!("❌ 設定エラーのため自然言語モードは利用できません: {}", error);
        return Ok(());
    }

    println!("\n🤖 自然言語モード（「戻る」でメニューに戻ります）");
    if !app.orchestrator.classifier().has_llm() && !app.llm_notice_shown {
        println!("ℹ️ LLMが設定されていないため、キーワード解析で動作します");
        app.llm_notice_shown = true;
    }

    loop {
        let Some(text) = prompt(input, "\n💬 > ")? else {
            return Ok(());
        };
        if text.is_empty() {
            continue;
        }
        if is_exit_word(&text) {
            return Ok(());
        }

        let reply = app.orchestrator.handle(&text);
        debug!(action = reply.action.as_str(), states = ?reply.states, "turn complete");
        println!("{}", reply.message);

        if let Some(pattern) = reply.nudge {
            ask_nudge_feedback(app, input, pattern)?;
        }
    }
}

/// Ask whether the nudge helped; an unanswered survey records nothing
fn ask_nudge_feedback(app: &mut App, input: &mut impl BufRead, pattern: NudgePattern) -> Result<()> {
    println!("\n📊 今の声かけはやる気につながりましたか？");
    let effective = loop {
        let Some(answer) = prompt(input, "a（良い） / b（悪い）: ")? else {
            return Ok(());
        };
        match answer.to_lowercase().as_str() {
            "a" => break true,
            "b" => break false,
            _ => println!("aかbで答えてください。"),
        }
    };

    if let Err(e) = app.orchestrator.record_nudge(pattern, effective) {
        warn!(error = %e, "failed to save nudge feedback");
    }
    println!("{}", Nudger::acknowledgement(effective));
    Ok(())
}

fn run_menu(app: &mut App) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    if let Err(e) = app.orchestrator.store().initialize() {
        warn!(error = %e, "could not create the task store");
    }
    println!("tasktalk へようこそ！");

    loop {
        show_menu();
        let Some(choice) = prompt(&mut input, "選択してください (1-5): ")? else {
            break;
        };

        match choice.as_str() {
            "1" => menu_add(app, &mut input)?,
            "2" => menu_show(app),
            "3" => menu_complete(app, &mut input)?,
            "4" => natural_language_mode(app, &mut input)?,
            "5" => break,
            _ => println!("エラー: 1-5の数字を入力してください。"),
        }
    }

    println!("アプリケーションを終了します。");
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    // Load .env first so RUST_LOG and credentials are visible everywhere
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    let mut app = build_app(&args);
    if let Some(error) = &app.config_error {
        eprintln!("⚠️ 設定ファイルを読み込めませんでした: {}", error);
    }

    if args.nudge_report {
        match app.orchestrator.nudger() {
            Some(nudger) => println!("{}", nudger.report()),
            None => println!("声かけ機能は無効です。"),
        }
        return Ok(());
    }

    match args.text.as_deref() {
        Some(text) => {
            if let Some(error) = &app.config_error {
                anyhow::bail!("configuration error: {}", error);
            }
            let reply = app.orchestrator.handle(text);
            println!("{}", reply.message);
            Ok(())
        }
        None => run_menu(&mut app),
    }
}

// ============================================================================
// Tests
// ============================================================================
