use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

use leaddial::config::Config;
use leaddial::daemon::HttpDaemonContext;
use leaddial::launcher::{CallLauncher, HttpCallLauncher};
use leaddial::store::{HttpLeadStore, LeadStore};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(to_stderr: bool, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if to_stderr {
        builder.target(env_logger::Target::Stderr).init();
        return Ok(());
    }

    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leaddial")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("leaddial.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            foreground: _,
            stdin_notifications,
        } => handle_run_command(*stdin_notifications, config).await,
        Commands::Pull { limit } => handle_pull_command(*limit, config).await,
        Commands::CallStatus { call_id } => handle_call_status_command(call_id, config).await,
        Commands::CheckConfig => handle_check_config_command(config),
    }
}

async fn handle_run_command(stdin_notifications: bool, config: &Config) -> Result<()> {
    let ctx = HttpDaemonContext::from_config(config).context("Failed to start dialer")?;
    println!(
        "{} {} slots, tick every {}s (Ctrl-C to stop)",
        "Dialing:".green(),
        config.slots.len(),
        config.dispatch.tick_interval_secs
    );
    ctx.run(stdin_notifications).await.context("Dialer stopped with an error")?;
    println!("{}", "Stopped".cyan());
    Ok(())
}

async fn handle_pull_command(limit: Option<usize>, config: &Config) -> Result<()> {
    let store = HttpLeadStore::new(config.record_store_config()).context("Failed to create record store client")?;
    let intake = config.intake_config();
    let limit = limit.unwrap_or(usize::MAX);
    let mut shown = 0;
    let mut dialable = 0;

    'pages: for page in 0.. {
        let result = store
            .search(&intake.filter, page)
            .await
            .context(format!("Search failed on page {}", page))?;
        let count = result.leads.len();

        for lead in result.leads {
            if shown >= limit {
                break 'pages;
            }
            shown += 1;
            let lead = lead.normalized(&intake.default_country_code);
            match &lead.phone {
                Some(phone) => {
                    dialable += 1;
                    println!("  {} {}", lead.id.green(), phone);
                }
                None => println!("  {} {}", lead.id.red(), "(no usable phone)".dimmed()),
            }
        }

        if !result.has_more || count < intake.filter.page_size {
            break;
        }
    }

    println!("{} {} of {} leads are dialable", "Pulled:".green(), dialable, shown);
    Ok(())
}

async fn handle_call_status_command(call_id: &str, config: &Config) -> Result<()> {
    let launcher =
        HttpCallLauncher::new(config.launch_service_config()).context("Failed to create launch service client")?;
    let status = launcher
        .get_call_status(call_id)
        .await
        .context(format!("Failed to fetch status for {}", call_id))?;

    if status.ended {
        println!(
            "{} {} ended ({})",
            "Call:".green(),
            call_id,
            status.reason.as_deref().unwrap_or("no reason given")
        );
    } else {
        println!("{} {} is still active", "Call:".cyan(), call_id);
    }
    Ok(())
}

fn handle_check_config_command(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    println!("{}", "Configuration OK".green());
    println!("  slots:            {}", config.slots.join(", "));
    println!("  tick interval:    {}s", config.dispatch.tick_interval_secs);
    println!("  dispatch enabled: {}", config.dispatch.enabled);
    println!("  ledger ceiling:   {}", config.queue.ledger_ceiling);
    println!(
        "  status sync:      {} req/s, {} attempts",
        config.sync.requests_per_second, config.sync.max_attempts
    );
    println!("  poll interval:    {}s", config.reconcile.poll_interval_secs);
    println!("  pull interval:    {}s", config.intake.pull_interval_secs);
    if config.business_hours.enabled {
        println!(
            "  business hours:   {:02}:00-{:02}:00 UTC{:+}m on {}",
            config.business_hours.start_hour,
            config.business_hours.end_hour,
            config.business_hours.utc_offset_minutes,
            config.business_hours.days.join(",")
        );
    }
    println!("  record store:     {}", config.record_store.base_url);
    println!("  launch service:   {}", config.launch_service.base_url);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before anything can log
    setup_logging(cli.logs_to_stderr(), cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
