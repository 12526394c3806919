use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use streamsig::config::Settings;
use streamsig::engine::EngineSnapshot;
use streamsig::rules::{Connection, DirectionalMatches, RowId, RuleDraft, RuleManager, FLAG_RULE_NAME};
use streamsig::storage::{FileRuleStore, MemoryRuleStore, RuleStore, WriteContext};
use streamsig::SigError;
use tracing::{debug, error, info, warn};

/// Size of the chunks payload files are fed to the engine in
const SCAN_CHUNK_SIZE: usize = 4096;

#[derive(Parser, Debug)]
#[command(name = "streamsig")]
#[command(author = "streamsig Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Signature rule manager and streaming matcher for traffic inspection", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generate default configuration file
    #[arg(long)]
    generate_config: bool,

    /// Verbose logging (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress most output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all rules
    List,
    /// Add a rule from a YAML rule file
    Add {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Install the flag rule with the given regex
    Flag { regex: String },
    /// Change the name and color of a rule
    Rename { id: String, name: String, color: String },
    /// Scan captured payloads and print the rules they trigger
    Scan {
        /// Data sent by the client
        #[arg(long, value_name = "FILE")]
        client: PathBuf,
        /// Data sent by the server
        #[arg(long, value_name = "FILE")]
        server: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        service_port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        client_address: std::net::IpAddr,
    },
    /// Load rules and follow engine updates until Ctrl+C
    Watch,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle config generation
    if cli.generate_config {
        generate_default_config()?;
        return Ok(());
    }

    // Load configuration first so logging can use it
    let settings = load_config(&cli)?;
    init_logging(&cli, &settings)?;

    info!("Starting streamsig v{}", env!("CARGO_PKG_VERSION"));
    settings.validate().context("Invalid configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let manager = build_manager(&settings);

    // Blocking publication needs a consumer before the first rule is loaded
    let consumer = spawn_update_consumer(manager.subscribe_engine_updates(), shutdown.clone())
        .context("Failed to start engine update consumer")?;

    manager.load_rules().context("Failed to load rules")?;
    install_flag_rule(&manager, &settings);

    let result = match cli.command.unwrap_or(Command::Watch) {
        Command::List => list_rules(&manager),
        Command::Add { file } => add_rule(&manager, &settings, &file),
        Command::Flag { regex } => set_flag(&manager, &settings, &regex),
        Command::Rename { id, name, color } => rename_rule(&manager, &settings, &id, &name, &color),
        Command::Scan {
            client,
            server,
            service_port,
            client_address,
        } => scan(&manager, &client, server.as_deref(), service_port, client_address),
        Command::Watch => watch(&manager, shutdown.clone()),
    };

    shutdown.store(true, Ordering::Relaxed);
    let received = consumer
        .join()
        .map_err(|_| SigError::ThreadError("engine update consumer panicked".to_string()))?;
    debug!("Consumed {} engine updates", received);

    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

fn init_logging(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => settings.logging.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    // RUST_LOG overrides the computed filter when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().context("Invalid RUST_LOG filter")?
    } else {
        EnvFilter::new(format!("streamsig={}", log_level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    match settings.logging.format.as_str() {
        "json" => registry.with(layer.json()).init(),
        "compact" => registry.with(layer.compact()).init(),
        _ => registry.with(layer).init(),
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Settings> {
    if let Some(config_path) = &cli.config {
        Settings::from_file(config_path).context("Failed to load configuration file")
    } else {
        // Try default locations
        let default_paths = vec![
            PathBuf::from("streamsig.yaml"),
            PathBuf::from("config/streamsig.yaml"),
            PathBuf::from("/etc/streamsig/streamsig.yaml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Settings::from_file(&path)
                    .context(format!("Failed to load configuration from {:?}", path));
            }
        }

        let mut settings = Settings::default_config();
        settings.storage.path = None;
        Ok(settings)
    }
}

fn generate_default_config() -> anyhow::Result<()> {
    let config = Settings::default_config();
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize config")?;

    let output_path = PathBuf::from("streamsig.yaml");
    std::fs::write(&output_path, yaml).context("Failed to write config file")?;

    println!("Generated default configuration at: {:?}", output_path);
    Ok(())
}

fn build_manager(settings: &Settings) -> RuleManager {
    let store: Arc<dyn RuleStore> = match settings.storage.path {
        Some(ref path) => {
            info!("Using rule file {:?}", path);
            Arc::new(FileRuleStore::new(path))
        }
        None => {
            warn!("No rule file configured, rules are kept in memory only");
            Arc::new(MemoryRuleStore::new())
        }
    };

    RuleManager::new(store, settings.engine.clone())
}

fn write_context(settings: &Settings) -> WriteContext {
    WriteContext::with_timeout(settings.storage.write_timeout())
}

fn spawn_update_consumer(
    updates: Receiver<EngineSnapshot>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("engine-updates".to_string())
        .spawn(move || {
            let mut received = 0u64;
            while !shutdown.load(Ordering::Relaxed) {
                match updates.recv_timeout(Duration::from_millis(100)) {
                    Ok(snapshot) => {
                        received += 1;
                        info!(
                            "Engine updated to version {} ({} patterns)",
                            snapshot.version, snapshot.pattern_count
                        );
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            received
        })
}

fn install_flag_rule(manager: &RuleManager, settings: &Settings) {
    let Some(ref regex) = settings.flag.regex else {
        return;
    };
    if manager.get_rule_by_name(FLAG_RULE_NAME).is_some() {
        debug!("Flag rule already present");
        return;
    }

    match manager.set_flag_rule(&write_context(settings), regex) {
        Ok(id) => info!("Installed flag rule {} for {:?}", id, regex),
        Err(e) => warn!("Failed to install flag rule {:?}: {}", regex, e),
    }
}

fn list_rules(manager: &RuleManager) -> anyhow::Result<()> {
    let mut rules = manager.list_rules();
    rules.sort_by_key(|r| r.id);

    for rule in &rules {
        println!(
            "{}  {:<24} {:<9} {:>2} patterns  {}",
            rule.id,
            rule.name,
            rule.color,
            rule.patterns.len(),
            if rule.enabled { "enabled" } else { "disabled" }
        );
    }

    let stats = manager.stats();
    println!(
        "{} rules ({} enabled), {} distinct patterns",
        stats.rules, stats.enabled_rules, stats.patterns
    );
    Ok(())
}

fn add_rule(manager: &RuleManager, settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file).context(format!("Failed to read {:?}", file))?;
    let draft: RuleDraft =
        serde_yaml::from_str(&content).context(format!("Invalid rule file {:?}", file))?;

    let id = manager
        .add_rule(&write_context(settings), draft)
        .context("Failed to add rule")?;
    println!("{}", id);
    Ok(())
}

fn set_flag(manager: &RuleManager, settings: &Settings, regex: &str) -> anyhow::Result<()> {
    let id = manager
        .set_flag_rule(&write_context(settings), regex)
        .context("Failed to set flag rule")?;
    println!("{}", id);
    Ok(())
}

fn rename_rule(
    manager: &RuleManager,
    settings: &Settings,
    id: &str,
    name: &str,
    color: &str,
) -> anyhow::Result<()> {
    let id: RowId = id.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    if manager
        .update_rule(&write_context(settings), id, name, color)
        .context("Failed to update rule")?
    {
        println!("Updated rule {}", id);
        Ok(())
    } else {
        anyhow::bail!("No rule with id {}", id)
    }
}

fn scan(
    manager: &RuleManager,
    client: &Path,
    server: Option<&Path>,
    service_port: u16,
    client_address: std::net::IpAddr,
) -> anyhow::Result<()> {
    let Some(snapshot) = manager.current_engine() else {
        println!("No rules loaded");
        return Ok(());
    };

    let client_data = std::fs::read(client).context(format!("Failed to read {:?}", client))?;
    let server_data = match server {
        Some(path) => std::fs::read(path).context(format!("Failed to read {:?}", path))?,
        None => Vec::new(),
    };

    let started = Instant::now();
    let mut client_stream = snapshot.engine.open_stream();
    let mut server_stream = snapshot.engine.open_stream();
    for chunk in client_data.chunks(SCAN_CHUNK_SIZE) {
        client_stream.scan(chunk);
    }
    for chunk in server_data.chunks(SCAN_CHUNK_SIZE) {
        server_stream.scan(chunk);
    }

    let connection = Connection {
        client_address,
        client_port: 0,
        server_address: std::net::IpAddr::from([0, 0, 0, 0]),
        service_port,
        duration: started.elapsed(),
        client_bytes: client_data.len() as u64,
        server_bytes: server_data.len() as u64,
    };
    let matches = DirectionalMatches::from_streams(&client_stream, &server_stream);
    debug!(
        "Engine version {}: {} client and {} server patterns matched",
        snapshot.version,
        matches.client.len(),
        matches.server.len()
    );

    for id in manager.annotate_matches(&connection, &matches) {
        if let Some(rule) = manager.get_rule(id) {
            println!("{}  {}  {}", rule.id, rule.name, rule.color);
        }
    }
    Ok(())
}

fn watch(manager: &RuleManager, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        warn!("Received shutdown signal");
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Failed to set Ctrl+C handler")?;

    info!("Watching engine updates, press Ctrl+C to stop");
    let mut last_report = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= Duration::from_secs(30) {
            let stats = manager.stats();
            info!(
                "Stats: rules={}, enabled={}, patterns={}, engine={}",
                stats.rules,
                stats.enabled_rules,
                stats.patterns,
                stats
                    .engine_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            last_report = Instant::now();
        }
    }

    info!("streamsig shutdown complete");
    Ok(())
}
