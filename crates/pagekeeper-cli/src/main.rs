//! `Pagekeeper` CLI: administrative console for a landing page.
//!
//! Opens the store directly (redb file by default) and edits the content
//! document, the settings document, the image gallery, the administrator
//! credentials, and the visitor log.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use pagekeeper_core::auth::LoginPolicy;
use pagekeeper_core::clock::SystemClock;
use pagekeeper_core::content::ItemList;
use pagekeeper_core::gallery::{ImageCategory, mime_for_extension};
use pagekeeper_core::site::{Site, SiteOptions, StoreContext};
use pagekeeper_core::sync::{SyncOptions, SyncService};
use pagekeeper_storage::{MemoryBackend, QuotaBackend, RedbBackend, StorageBackend};

use crate::config::{CliConfig, LogFormat, StorageKind};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// Pagekeeper: landing page administration.
#[derive(Parser)]
#[command(
    name = "pagekeeper",
    version,
    about = "Pagekeeper CLI: manage landing page content, settings, images, and visitors",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         PAGEKEEPER_STORAGE        memory or redb (default: redb)\n  \
         PAGEKEEPER_STORAGE_PATH   Store file (default: ./pagekeeper.redb)\n  \
         PAGEKEEPER_STORAGE_QUOTA  Capacity in bytes (default: 5 MiB)\n  \
         PAGEKEEPER_LOG_LEVEL      Log filter (default: warn)\n  \
         PAGEKEEPER_LOG_FORMAT     text or json\n\n\
         {DIM}Examples:{RESET}\n  \
         pagekeeper content show --section topBanner\n  \
         pagekeeper content set topBanner '{{\"title\":\"Spring sale\"}}'\n  \
         pagekeeper config set siteName='My Page' sessionTimeout=30\n  \
         pagekeeper images add doctor.jpg --category doctor"
    ),
)]
struct Cli {
    /// Storage backend (overrides `PAGEKEEPER_STORAGE`).
    #[arg(long, value_enum)]
    storage: Option<StorageKind>,

    /// Store file (overrides `PAGEKEEPER_STORAGE_PATH`).
    #[arg(long)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Landing page content operations.
    Content {
        #[command(subcommand)]
        action: ContentCommands,
    },
    /// Administrative settings operations.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Administrator credentials and sessions.
    Auth {
        #[command(subcommand)]
        action: AuthCommands,
    },
    /// Image gallery operations.
    Images {
        #[command(subcommand)]
        action: ImageCommands,
    },
    /// Visitor log operations.
    Visits {
        #[command(subcommand)]
        action: VisitCommands,
    },
    /// Run the sync service and print every committed change until Ctrl-C.
    Watch,
}

#[derive(Subcommand)]
enum ContentCommands {
    /// Print the content document or one section.
    Show {
        #[arg(long)]
        section: Option<String>,
    },
    /// Replace a section with a JSON value.
    Set { section: String, json: String },
    /// Export the content document as JSON.
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a content document from a JSON file.
    Import { file: PathBuf },
    /// Reset the content to the defaults.
    Reset,
    /// List the items of a list (doctors, testimonials, news, faq).
    Items { list: ItemList },
    /// Add an item to a list. The id is assigned automatically.
    Add { list: ItemList, json: String },
    /// Merge fields into an existing item.
    Update { list: ItemList, id: u64, json: String },
    /// Remove an item from a list.
    Remove { list: ItemList, id: u64 },
    /// Print the deployment-ready envelope.
    Deploy {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current settings.
    Show,
    /// Update settings (key=value; values are parsed as JSON, else text).
    Set {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Export the settings as JSON.
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import settings from a JSON file.
    Import { file: PathBuf },
    /// Reset the settings to the defaults.
    Reset,
    /// Reconcile with the newest stored copy.
    Sync,
    /// Write a settings snapshot.
    Snapshot,
    /// Show settings statistics.
    Stats,
    /// Delete every stored copy and snapshot of the settings.
    Clear,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Create the administrator credentials.
    Init {
        #[arg(long)]
        username: String,
        #[arg(long, env = "PAGEKEEPER_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log in and open a session.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "PAGEKEEPER_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the current session.
    Logout,
    /// Show whether credentials exist and who is logged in.
    Status,
    /// Change the administrator credentials.
    Passwd {
        #[arg(long)]
        current: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Upload an image file.
    Add {
        file: PathBuf,
        /// doctor, customer, news, or product.
        #[arg(long)]
        category: ImageCategory,
        /// Display name (default: the file name).
        #[arg(long)]
        name: Option<String>,
    },
    /// List images.
    List {
        #[arg(long)]
        category: Option<ImageCategory>,
    },
    /// Delete an image.
    Remove { id: String },
}

#[derive(Subcommand)]
enum VisitCommands {
    /// Record a visit to a URL.
    Record {
        url: String,
        /// Visitor id (default: a new one).
        #[arg(long)]
        visitor: Option<String>,
        #[arg(long, default_value = "")]
        referrer: String,
        #[arg(long, default_value = "pagekeeper-cli")]
        user_agent: String,
    },
    /// Record a click on an element.
    Click {
        element: String,
        url: String,
        #[arg(long)]
        visitor: String,
    },
    /// Show today's counts and active visitors.
    Stats,
    /// Delete records older than the retention period.
    Purge {
        /// Days to keep (default: the `dataRetention` setting).
        #[arg(long)]
        days: Option<u32>,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn yes_no(value: bool) -> String {
    if value {
        format!("{GREEN}yes{RESET}")
    } else {
        format!("{RED}no{RESET}")
    }
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

// ── Setup ────────────────────────────────────────────────────────────

fn init_tracing(config: &CliConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

async fn open_site(config: &CliConfig) -> Result<Arc<Site>> {
    let backend: Arc<dyn StorageBackend> = match config.storage {
        StorageKind::Memory => Arc::new(MemoryBackend::new()),
        StorageKind::Redb => Arc::new(RedbBackend::open(&config.storage_path).with_context(|| {
            format!("failed to open store at {}", config.storage_path.display())
        })?),
    };
    let storage = QuotaBackend::wrap(backend, config.quota_bytes)
        .await
        .context("failed to measure store usage")?;

    let ctx = StoreContext::new(Arc::new(storage), Arc::new(SystemClock));
    Ok(Site::open(ctx, SiteOptions::default()).await)
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::from_env().with_overrides(cli.storage, cli.path);
    init_tracing(&config);

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &CliConfig, cmd: Commands) -> Result<()> {
    let site = open_site(config).await?;
    match cmd {
        Commands::Content { action } => cmd_content(&site, action).await,
        Commands::Config { action } => cmd_config(&site, action).await,
        Commands::Auth { action } => cmd_auth(&site, action).await,
        Commands::Images { action } => cmd_images(&site, action).await,
        Commands::Visits { action } => cmd_visits(&site, action).await,
        Commands::Watch => cmd_watch(site, config).await,
    }
}

// ── Content commands ─────────────────────────────────────────────────

async fn cmd_content(site: &Site, action: ContentCommands) -> Result<()> {
    let content = site.content();
    match action {
        ContentCommands::Show { section } => {
            let document = content.document().await;
            match section {
                Some(name) => {
                    let value = document
                        .get(&name)
                        .with_context(|| format!("unknown section '{name}'"))?;
                    print_json(value);
                }
                None => print_json(&Value::Object(document.into_map())),
            }
        }
        ContentCommands::Set { section, json } => {
            let value = parse_json(&json)?;
            content.update_section(&section, value).await?;
            success(&format!("Section {BOLD}{section}{RESET} updated"));
        }
        ContentCommands::Export { output } => {
            let text = content.export_document().await?;
            write_or_print(output.as_deref(), &text).await?;
        }
        ContentCommands::Import { file } => {
            let text = read_file(&file).await?;
            content.import_document(&text).await?;
            success(&format!("Content imported from {}", file.display()));
        }
        ContentCommands::Reset => {
            content.reset_to_default().await?;
            success("Content reset to defaults");
        }
        ContentCommands::Items { list } => {
            print_json(&Value::Array(content.items(list).await));
        }
        ContentCommands::Add { list, json } => {
            let id = content.insert_item(list, parse_json(&json)?).await?;
            success(&format!("Added item {BOLD}{id}{RESET} to {list}"));
        }
        ContentCommands::Update { list, id, json } => {
            let Value::Object(patch) = parse_json(&json)? else {
                bail!("item update must be a JSON object");
            };
            if !content.update_item(list, id, patch).await? {
                bail!("no item {id} in {list}");
            }
            success(&format!("Updated item {BOLD}{id}{RESET} in {list}"));
        }
        ContentCommands::Remove { list, id } => {
            if !content.remove_item(list, id).await? {
                bail!("no item {id} in {list}");
            }
            success(&format!("Removed item {BOLD}{id}{RESET} from {list}"));
        }
        ContentCommands::Deploy { output } => {
            let envelope = content.deployment_data().await;
            let text = serde_json::to_string_pretty(&envelope)?;
            write_or_print(output.as_deref(), &text).await?;
        }
    }
    Ok(())
}

// ── Config commands ──────────────────────────────────────────────────

async fn cmd_config(site: &Site, action: ConfigCommands) -> Result<()> {
    let config = site.config();
    match action {
        ConfigCommands::Show => print_json(&serde_json::to_value(config.current().await)?),
        ConfigCommands::Set { pairs } => {
            let partial = parse_kv_pairs(&pairs)?;
            let keys: Vec<String> = partial.keys().cloned().collect();
            config.update_config(partial).await?;
            success(&format!("Updated {}", keys.join(", ")));
        }
        ConfigCommands::Export { output } => {
            let text = config.export_config().await?;
            write_or_print(output.as_deref(), &text).await?;
        }
        ConfigCommands::Import { file } => {
            let text = read_file(&file).await?;
            config.import_config(&text).await?;
            success(&format!("Settings imported from {}", file.display()));
        }
        ConfigCommands::Reset => {
            config.reset_to_default().await?;
            success("Settings reset to defaults");
        }
        ConfigCommands::Sync => {
            if config.sync().await? {
                success("Adopted a newer stored copy");
            } else {
                success("Settings already up to date");
            }
        }
        ConfigCommands::Snapshot => {
            let key = config.snapshot().await?;
            success(&format!("Snapshot written to {BOLD}{key}{RESET}"));
        }
        ConfigCommands::Stats => {
            let stats = config.stats().await;
            header("⚙", "Settings");
            kv_line("Version", &stats.config_version);
            kv_line("Last updated", &format_ms(stats.last_updated));
            kv_line("Listeners", &stats.listeners_count.to_string());
            kv_line("Auto sync", &yes_no(stats.auto_sync_enabled));
            kv_line("Backups", &yes_no(stats.backup_enabled));
            kv_line("Snapshots", &stats.snapshots.to_string());
        }
        ConfigCommands::Clear => {
            config.clear_all_data().await?;
            warning("All stored settings cleared");
        }
    }
    Ok(())
}

// ── Auth commands ────────────────────────────────────────────────────

async fn cmd_auth(site: &Site, action: AuthCommands) -> Result<()> {
    let credentials = site.credentials();
    match action {
        AuthCommands::Init { username, password } => {
            credentials.bootstrap(&username, &password).await?;
            success(&format!("Administrator {BOLD}{}{RESET} created", username.trim()));
        }
        AuthCommands::Login { username, password } => {
            let policy = LoginPolicy::from(&site.config().current().await);
            let session = credentials.login(&username, &password, policy).await?;
            success(&format!("Logged in as {BOLD}{}{RESET}", session.username));
            kv_line("Expires", &format_ms(session.expires_at));
        }
        AuthCommands::Logout => {
            credentials.logout().await?;
            success("Logged out");
        }
        AuthCommands::Status => {
            header("🔐", "Administrator");
            match credentials.username().await? {
                Some(name) => kv_line("Username", &name),
                None => kv_line("Configured", &yes_no(false)),
            }
            match credentials.session().await {
                Some(session) => {
                    kv_line("Logged in", &yes_no(true));
                    kv_line("Expires", &format_ms(session.expires_at));
                }
                None => kv_line("Logged in", &yes_no(false)),
            }
        }
        AuthCommands::Passwd {
            current,
            username,
            password,
            confirm,
        } => {
            credentials
                .update_credentials(&current, &username, &password, &confirm)
                .await?;
            success("Credentials updated; log in again");
        }
    }
    Ok(())
}

// ── Image commands ───────────────────────────────────────────────────

async fn cmd_images(site: &Site, action: ImageCommands) -> Result<()> {
    let gallery = site.gallery();
    match action {
        ImageCommands::Add {
            file,
            category,
            name,
        } => {
            let extension = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let Some(mime) = mime_for_extension(extension) else {
                bail!("unsupported image type '{extension}' (use jpg, png, gif or webp)");
            };
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
            });
            let image = gallery.upload(&name, mime, &bytes, category).await?;
            success(&format!("Uploaded {BOLD}{}{RESET} as {}", image.name, image.id));
        }
        ImageCommands::List { category } => {
            let images = gallery.list(category).await;
            if images.is_empty() {
                println!("{DIM}No images.{RESET}");
                return Ok(());
            }
            header("🖼", "Images");
            for image in images {
                println!(
                    "  {WHITE}{:<28}{RESET} {:<10} {:>9} B  {DIM}{}{RESET}",
                    image.id, image.category, image.byte_size, image.name
                );
            }
        }
        ImageCommands::Remove { id } => {
            if !gallery.delete(&id).await? {
                bail!("no image with id '{id}'");
            }
            success(&format!("Deleted {id}"));
        }
    }
    Ok(())
}

// ── Visit commands ───────────────────────────────────────────────────

async fn cmd_visits(site: &Site, action: VisitCommands) -> Result<()> {
    let visitors = site.visitors();
    match action {
        VisitCommands::Record {
            url,
            visitor,
            referrer,
            user_agent,
        } => {
            let id = visitor.unwrap_or_else(|| format!("visitor_{}", uuid::Uuid::new_v4().simple()));
            let recorded = visitors.record_visit(&id, &url, &referrer, &user_agent).await?;
            success(&format!("Recorded visit by {BOLD}{}{RESET}", recorded.id));
            print_json(&serde_json::to_value(&recorded.utm_params)?);
        }
        VisitCommands::Click {
            element,
            url,
            visitor,
        } => {
            visitors.record_click(&visitor, &element, &url).await?;
            success(&format!("Recorded click on {element}"));
        }
        VisitCommands::Stats => {
            let now = site.now_ms();
            let stats = visitors.today_stats(now).await;
            let active = visitors.active_visitors(now).await;
            header("📈", "Today");
            kv_line("Visitors", &stats.total_visitors.to_string());
            kv_line("Page views", &stats.total_page_views.to_string());
            kv_line("Clicks", &stats.total_clicks.to_string());
            kv_line("Active now", &active.len().to_string());
        }
        VisitCommands::Purge { days } => {
            let days = match days {
                Some(days) => days,
                None => site.config().current().await.data_retention,
            };
            let removed = visitors.purge_older_than(days).await?;
            success(&format!("Removed {removed} records older than {days} days"));
        }
    }
    Ok(())
}

// ── Watch command ────────────────────────────────────────────────────

async fn cmd_watch(site: Arc<Site>, config: &CliConfig) -> Result<()> {
    let options = SyncOptions {
        heartbeat_interval: config.heartbeat,
        ..SyncOptions::default()
    };
    let handle = SyncService::spawn(Arc::clone(&site), options);
    let mut content_events = site.content().events();
    let mut config_events = site.config().events();
    // Other processes do not share our bus; poll the content on the heartbeat.
    let mut poll = tokio::time::interval(config.heartbeat);

    header("👁", "Watching for changes (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                site.content().reload().await;
            }
            event = content_events.recv() => match event {
                Ok(change) => println!(
                    "  {CYAN}content{RESET} {} {DIM}({} sections){RESET}",
                    change.kind,
                    change.document.len()
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warning(&format!("missed {n} content events"));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            event = config_events.recv() => match event {
                Ok(change) => println!(
                    "  {CYAN}settings{RESET} {} {DIM}(updated {}){RESET}",
                    change.kind,
                    format_ms(change.document.last_updated)
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warning(&format!("missed {n} settings events"));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
    success("Stopped");
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// anything else is taken as text.
fn parse_kv_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid key=value pair: '{pair}'"))?;
        if key.is_empty() {
            bail!("empty key in '{pair}'");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
        map.insert(key.to_owned(), value);
    }
    Ok(map)
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).context("invalid JSON")
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("file not found or unreadable: {}", path.display()))
}

async fn write_or_print(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            success(&format!("Written to {}", path.display()));
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn print_json(value: &Value) {
    if value.is_null() {
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to format JSON: {e}"),
    }
}
