//! Command-line interface for BookWorm.
//!
//! With no subcommand the server starts. The other subcommands work
//! directly against the database configured in the config file:
//! - `import <file>` - Bulk import classroom books from CSV
//! - `validate-cache` - Run one book cache validation batch
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::books_api::{validate_cache, GoogleBooksClient};
use crate::config::Config;
use crate::db::find_school_by_slug;
use crate::import::{run_book_import, ImportOutcome, ImportScope};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "bookworm")]
#[command(author, version, about = "Classroom library catalog for K-12 schools", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "BOOKWORM_CONFIG", default_value = "bookworm.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Import classroom books from a CSV file
    Import {
        /// CSV file with a school,teacher_name,teacher_email,isbn,title,authors,quantity header
        file: PathBuf,
        /// Restrict the import to the school with this slug
        #[arg(long)]
        school: Option<String>,
    },

    /// Validate one batch of unconfirmed book cache entries against the Book API
    ValidateCache,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate the configuration file
    Check,
}

impl Cli {
    /// Whether this invocation starts the server
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Commands::Serve))
    }
}

/// Run a non-server subcommand
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Some(Commands::Import { file, school }) => cmd_import(config, file, school.as_deref()).await,
        Some(Commands::ValidateCache) => cmd_validate_cache(config).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        None | Some(Commands::Serve) => Ok(()),
    }
}

async fn cmd_import(config: &Config, file: &Path, school: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!("Failed to create data directory: {}", config.server.data_dir.display())
    })?;
    let db = crate::db::init(&config.server.data_dir).await?;

    let scope = match school {
        Some(slug) => {
            let school = find_school_by_slug(&db, slug)
                .await?
                .with_context(|| format!("No school with slug '{}'", slug))?;
            ImportScope::School(school.id)
        }
        None => ImportScope::AnySchool,
    };

    let report = run_book_import(&db, &text, &scope, None).await?;

    println!("Rows:             {}", report.rows);
    println!("Books created:    {}", report.created_books);
    println!("Schools created:  {}", report.created_schools);
    println!("Teachers created: {}", report.created_teachers);
    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &report.errors {
            println!("  line {}: {}", error.line, error.message);
        }
    }

    if report.outcome() == ImportOutcome::Failed {
        anyhow::bail!("No rows were imported");
    }
    Ok(())
}

async fn cmd_validate_cache(config: &Config) -> Result<()> {
    let db = crate::db::init(&config.server.data_dir).await?;
    let client = GoogleBooksClient::new(&config.book_api)?;

    let report = validate_cache(&db, &client, &config.book_api)
        .await
        .context("Cache validation failed")?;

    println!("Batch size:   {}", report.batch_size);
    println!("Checked:      {}", report.checked);
    println!("Validated:    {}", report.validated);
    println!("Not found:    {}", report.not_found);
    println!("Quota left:   {}", report.remaining);
    if report.stopped_at_floor {
        println!(
            "[!!] Stopped at the quota floor ({} calls)",
            config.book_api.quota_floor
        );
    }
    if let Some(ref reason) = report.aborted {
        println!("[!!] Aborted: {}", reason);
    }
    Ok(())
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!("[!!] Configuration file not found: {}", config_path.display());
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("[ERROR] Configuration is invalid: {:#}", e);
            return Err(e);
        }
    };

    println!("[OK] Configuration file is valid!");
    println!();
    println!("=== Configuration Summary ===");
    println!();
    println!("Server:");
    println!("  Host:         {}", config.server.host);
    println!("  Port:         {}", config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!("  Static Dir:   {}", config.server.static_dir.display());
    println!();
    println!("Auth:");
    println!("  Cookie:       {}", config.auth.cookie_name);
    println!("  Secure:       {}", enabled(config.auth.secure_cookies));
    println!("  Session days: {}", config.auth.session_days);
    println!(
        "  Super admin:  {}",
        config.auth.super_admin_email.as_deref().unwrap_or("(not configured)")
    );
    println!();
    println!("Book API:");
    println!("  Base URL:     {}", config.book_api.base_url);
    println!("  API key:      {}", if config.book_api.api_key.is_some() { "set" } else { "not set" });
    println!("  Daily limit:  {}", config.book_api.daily_limit);
    println!("  Quota floor:  {}", config.book_api.quota_floor);
    println!("  Max batch:    {}", config.book_api.max_batch);
    println!();
    println!("Security:");
    println!("  Rate Limiting: {}", enabled(config.rate_limit.enabled));
    println!();

    let mut warnings = Vec::new();
    if config.book_api.quota_floor >= config.book_api.daily_limit {
        warnings.push("book_api.quota_floor is not below daily_limit; no API calls will be made");
    }
    if config.auth.super_admin_email.is_some() != config.auth.super_admin_password.is_some() {
        warnings.push("auth.super_admin_email and super_admin_password must be set together");
    }
    if !config.auth.secure_cookies {
        warnings.push("auth.secure_cookies is off; only use this for local development");
    }

    if warnings.is_empty() {
        println!("No warnings.");
    } else {
        println!("Warnings:");
        for warning in warnings {
            println!("  [!!] {}", warning);
        }
    }

    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}
