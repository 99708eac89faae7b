use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flock::account::SharedAccount;
use flock::banner::{BannerInfo, print_banner, print_run_summary};
use flock::config::{Config, SettingKey, Settings};
use flock::consts::default_db_path;
use flock::engine::{Scheduler, SchedulerConfig};
use flock::pipeline::FilterPolicy;
use flock::remote::HttpConnector;
use flock::stages::{Services, StageName, Workflows};
use flock::store::sqlite::SqliteAccountStore;
use flock::store::{AccountStore, read_seeds};

#[derive(Parser)]
#[command(name = "flock", version, about = "Many accounts, one heartbeat.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database for account records and settings
    #[arg(short, long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one stage over every account in the token file
    Run {
        /// Stage to run: check-status, auth, link-wallet, complete-tasks, follow, export
        stage: StageName,

        /// One social auth token per line
        #[arg(short, long, default_value = "tokens.txt")]
        tokens: PathBuf,

        /// One proxy per line, matched to tokens by line number
        #[arg(short, long)]
        proxies: Option<PathBuf>,

        /// Output file of the export stage
        #[arg(short, long, default_value = "registered.txt")]
        output: PathBuf,
    },
    /// Read or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show every setting with its effective value
    List,
    /// Show one setting
    Get { key: SettingKey },
    /// Validate and store a setting
    Set { key: SettingKey, value: String },
    /// Remove a stored setting, restoring its default
    Unset { key: SettingKey },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let db_path = cli.db.unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = db_path.to_string_lossy().into_owned();
    let config = Config::open(&db)?;

    match cli.command {
        Command::Config { action } => handle_config(&config, action),
        Command::Run {
            stage,
            tokens,
            proxies,
            output,
        } => {
            let settings = Settings::load(&config)?;
            init_tracing(&settings.log_level);
            run_stage(&db_path, settings, stage, &tokens, proxies.as_deref(), &output).await
        }
    }
}

/// `RUST_LOG` wins over the stored log level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_stage(
    db_path: &Path,
    settings: Settings,
    name: StageName,
    tokens: &Path,
    proxies: Option<&Path>,
    output: &Path,
) -> anyhow::Result<()> {
    let seeds = read_seeds(tokens, proxies).await?;
    if seeds.is_empty() {
        warn!("no social tokens in {}", tokens.display());
        return Ok(());
    }
    info!("total social tokens: {}", seeds.len());

    let store = Arc::new(SqliteAccountStore::open(&db_path.to_string_lossy())?);
    let accounts: Vec<SharedAccount> = store
        .load_all(&seeds)
        .await?
        .into_iter()
        .map(|account| account.shared())
        .collect();

    // Limits are validated here, before any task starts.
    let scheduler = Scheduler::new(SchedulerConfig::from_settings(&settings), store.clone())?;
    let connector = Arc::new(HttpConnector::new(settings.default_proxy.clone()));
    let workflows = Workflows::new(settings.clone(), Services::new(connector, store));
    let stage = workflows.stage(name, output);

    let default_proxy = settings
        .default_proxy
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "direct".to_string());
    print_banner(&BannerInfo {
        stage: stage.name(),
        accounts: accounts.len(),
        limits: (settings.max_tasks, settings.max_tasks_per_proxy),
        default_proxy: &default_proxy,
        database: db_path,
    });

    let policy = FilterPolicy::new(settings.ignore_warnings);
    let outcome = tokio::select! {
        result = stage.run(accounts.clone(), &scheduler, &policy) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let mut total_points = 0;
    for account in &accounts {
        total_points += account.lock().await.points().unwrap_or(0);
    }

    match outcome {
        Some(Ok(report)) => {
            print_run_summary(Some(&report), total_points);
            Ok(())
        }
        Some(Err(e)) => {
            error!("{} aborted: {e}", stage.name());
            print_run_summary(None, total_points);
            Err(e.into())
        }
        None => {
            println!("\ninterrupted");
            print_run_summary(None, total_points);
            Ok(())
        }
    }
}

fn handle_config(config: &Config, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::List => {
            let settings = Settings::load(config)?;
            for key in SettingKey::ALL {
                let stored = config.get(key.as_str())?;
                let marker = if stored.is_some() { "" } else { " (default)" };
                println!("{key:<22} {}{marker}", display_value(&settings, *key));
            }
        }
        ConfigAction::Get { key } => {
            let settings = Settings::load(config)?;
            println!("{}", display_value(&settings, key));
        }
        ConfigAction::Set { key, value } => {
            let mut settings = Settings::load(config)?;
            settings.apply(key, &value)?;
            config.set(key.as_str(), value.trim())?;
            println!("✓ {key} = {}", display_value(&settings, key));
        }
        ConfigAction::Unset { key } => {
            config.remove(key.as_str())?;
            let settings = Settings::load(config)?;
            println!("✓ {key} reset to {}", display_value(&settings, key));
        }
    }
    Ok(())
}

fn display_value(settings: &Settings, key: SettingKey) -> String {
    fn or_none<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "none".to_string(), |v| v.to_string())
    }
    match key {
        SettingKey::MaxTasks => settings.max_tasks.to_string(),
        SettingKey::MaxTasksPerProxy => settings.max_tasks_per_proxy.to_string(),
        SettingKey::DefaultProxy => or_none(settings.default_proxy.as_ref()),
        SettingKey::MinAccountAgeDays => or_none(settings.min_account_age_days),
        SettingKey::MinFollowers => or_none(settings.min_followers),
        SettingKey::IgnoreWarnings => settings.ignore_warnings.to_string(),
        SettingKey::InviteCode => or_none(settings.invite_code.as_ref()),
        SettingKey::LogLevel => settings.log_level.clone(),
    }
}
