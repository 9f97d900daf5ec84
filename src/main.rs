//! Binary entrypoint for the rconbridge CLI.
//!
//! Commands:
//! - `start` - run the scheduler (scan, autosave, heartbeat) until Ctrl-C
//! - `init` - create a starter `config.toml` and sample data documents
//! - `status` - print servers and reward statistics
//! - `exec [--server <id>] <command...>` - run a raw console command
//! - `claim <player> <level>` / `delete-reward <player> <level>`
//! - `link <account> <player>`, `player <name>`, `players`
//! - `set-default <id>`, `test [<id>]`, `scan`
//! - `broadcast <message...>`, `give <player> <blueprint> [-n qty] [-q quality] [--blueprint-only]`
//!
//! See the library crate docs for module-level details: `rconbridge::`.
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::watch;

use rconbridge::bridge::{Bridge, ServerHealth};
use rconbridge::config::Config;
use rconbridge::logutil::escape_log_with_limit;
use rconbridge::scheduler::{bridge_jobs, start_scheduler};
use rconbridge::storage::{Storage, LEVELS_FILE, SERVERS_FILE};

#[derive(Parser)]
#[command(name = "rconbridge")]
#[command(about = "Level rewards and player identity bridge for RCON game servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic scan, autosave and heartbeat tasks until interrupted
    Start,
    /// Create a default configuration and sample data files
    Init,
    /// Show servers and reward statistics
    Status,
    /// Execute a raw console command
    Exec {
        /// Target server id (default server when omitted)
        #[arg(short, long)]
        server: Option<String>,
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Grant a level's rewards to a player
    Claim {
        player: String,
        level: u32,
        /// Treat PLAYER as a linked account id
        #[arg(long)]
        account: bool,
    },
    /// Remove a claimed level from a player's record (no in-game effect)
    DeleteReward { player: String, level: u32 },
    /// Link a chat account to a tracked player
    Link { account: String, player: String },
    /// Show one player's identity, rewards and link
    Player { name: String },
    /// List every tracked player
    Players,
    /// Change the default server
    SetDefault { server: String },
    /// Test one server, or every server when no id is given
    Test { server: Option<String> },
    /// Run one roster scan now
    Scan,
    /// Send a chat message to everyone on the default server
    Broadcast {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Give an item by blueprint path on the default server
    Give {
        player: String,
        blueprint: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        quantity: u32,
        #[arg(short, long, default_value_t = 0)]
        quality: u32,
        /// Give the blueprint instead of the item
        #[arg(long)]
        blueprint_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        return init(&cli.config).await;
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);

    if let Commands::Start = cli.command {
        return start(config).await;
    }

    let bridge = Bridge::open(config).await?;
    match cli.command {
        Commands::Start | Commands::Init => {}
        Commands::Status => {
            let stats = bridge.statistics().await;
            println!("rconbridge v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "servers: {} ({} enabled)",
                stats.total_servers, stats.enabled_servers
            );
            for s in bridge.list_servers().await {
                println!(
                    "  {}{} - {} ({}:{}) {}{}",
                    if s.is_default { "* " } else { "  " },
                    s.id,
                    s.name,
                    s.host,
                    s.port,
                    if s.enabled { "enabled" } else { "disabled" },
                    s.map.map(|m| format!(", map {}", m)).unwrap_or_default()
                );
            }
            println!(
                "rewards given: {} to {} players",
                stats.total_rewards_given, stats.active_players
            );
            for (level, count) in &stats.level_distribution {
                println!("  level {}: {}", level, count);
            }
        }
        Commands::Exec { server, command } => {
            let command = command.join(" ");
            let report = bridge.execute_command(server.as_deref(), &command).await?;
            println!("[{}] {}", report.server_id, report.outcome);
            if !report.raw.trim().is_empty() {
                println!("{}", report.raw.trim_end());
            }
        }
        Commands::Claim {
            player,
            level,
            account,
        } => {
            let receipt = if account {
                bridge.claim_for_account(&player, level).await?
            } else {
                bridge.claim(&player, level).await?
            };
            println!(
                "{} claimed level {} on {} ({} commands)",
                receipt.player, receipt.level, receipt.server_id, receipt.commands
            );
        }
        Commands::DeleteReward { player, level } => {
            bridge.delete_reward(&player, level).await?;
            println!("Removed level {} from {}", level, player);
        }
        Commands::Link { account, player } => {
            let link = bridge.link_account(&account, &player).await?;
            println!("Linked {} to {} ({})", account, link.player_name, link.eos_id);
        }
        Commands::Player { name } => {
            let status = bridge.query_status(&name).await;
            match bridge.lookup_identity(&name).await {
                Some(info) => println!(
                    "{}: {} ({})",
                    info.player,
                    info.short,
                    if info.valid { "valid" } else { "invalid" }
                ),
                None => println!("{}: no identity on record", name),
            }
            println!("claimed:   {:?}", status.claimed);
            println!("available: {:?}", status.available);
            if let Some(acc) = status.linked_account {
                println!("linked to: {}", acc);
            }
            if !status.online_on.is_empty() {
                println!("online on: {}", status.online_on.join(", "));
            }
        }
        Commands::Players => {
            let players = bridge.list_players().await;
            println!("{} tracked players", players.len());
            for p in players {
                println!(
                    "  {:<24} rewards {:>3}{}{}",
                    p.name,
                    p.rewards,
                    if p.identity_valid { "" } else { "  [invalid identity]" },
                    p.linked_account
                        .map(|a| format!("  linked {}", a))
                        .unwrap_or_default()
                );
            }
        }
        Commands::SetDefault { server } => {
            bridge.set_default_server(&server).await?;
            println!("Default server is now {}", server);
        }
        Commands::Test { server: Some(id) } => {
            let report = bridge.test_connectivity(&id).await?;
            println!(
                "{}: {} in {:.2}s",
                report.server_id,
                report.outcome,
                report.latency.as_secs_f64()
            );
        }
        Commands::Test { server: None } => {
            for check in bridge.check_all_servers().await {
                let marker = if check.is_default { "*" } else { " " };
                match check.health {
                    ServerHealth::Online { version, players } => println!(
                        "{} {} ({}): online, {} players, {}",
                        marker, check.id, check.name, players, version
                    ),
                    ServerHealth::Offline(reason) => {
                        println!("{} {} ({}): offline: {}", marker, check.id, check.name, reason)
                    }
                    ServerHealth::Disabled => {
                        println!("{} {} ({}): disabled", marker, check.id, check.name)
                    }
                }
            }
        }
        Commands::Scan => {
            let report = bridge.scan_players().await;
            for (id, scan) in &report.servers {
                println!("{}: {:?}", id, scan);
            }
            println!(
                "{} new, {} updated{}",
                report.new_players,
                report.updated_players,
                if report.persisted { ", saved" } else { "" }
            );
        }
        Commands::Broadcast { message } => {
            let report = bridge.broadcast(&message.join(" ")).await?;
            println!("[{}] {}", report.server_id, report.outcome);
        }
        Commands::Give {
            player,
            blueprint,
            quantity,
            quality,
            blueprint_only,
        } => {
            let report = bridge
                .give_item(&player, &blueprint, quantity, quality, blueprint_only)
                .await?;
            println!(
                "[{}] {}: {}",
                report.server_id,
                report.outcome,
                escape_log_with_limit(&report.raw, 200)
            );
        }
    }

    Ok(())
}

async fn start(config: Config) -> Result<()> {
    info!("Starting rconbridge v{}", env!("CARGO_PKG_VERSION"));
    let bridge = Arc::new(Bridge::open(config.clone()).await?);
    match bridge.default_server().await {
        Some(id) => info!("default server: {}", id),
        None => warn!("no enabled server configured; claims will be rejected"),
    }

    let (ready_tx, ready_rx) = watch::channel(false);
    let scheduler = start_scheduler(bridge_jobs(bridge.clone(), &config), ready_rx);
    let _ = ready_tx.send(true);
    info!("bridge ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.shutdown().await;
    match bridge.autosave().await {
        Ok(snap) => info!("final snapshot written to {}", snap.path.display()),
        Err(e) => error!("final autosave failed: {}", e),
    }
    Ok(())
}

async fn init(config_path: &str) -> Result<()> {
    info!("Initializing new rconbridge configuration");
    let cfg = if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        info!("{} already exists; keeping it", config_path);
        Config::load(config_path).await?
    } else {
        Config::create_default(config_path).await?;
        info!("Configuration file created at {}", config_path);
        Config::default()
    };

    let storage = Storage::new(&cfg.bridge.data_dir).await?;
    if !storage.path(SERVERS_FILE).exists() {
        let servers = serde_json::json!({
            "_comment": "Server id -> connection settings. Passwords can be supplied with RCON_PASSWORD_<ID>.",
            "main": {
                "name": "Main Server",
                "host": "127.0.0.1",
                "port": 27020,
                "password": "",
                "map": "TheIsland",
                "enabled": true,
                "default": true,
                "connection_timeout": 10
            }
        });
        storage.write_json(SERVERS_FILE, &servers).await?;
        info!("Sample servers written to {}", storage.path(SERVERS_FILE).display());
    }
    if !storage.path(LEVELS_FILE).exists() {
        let levels = serde_json::json!({
            "1": [
                { "cmd": "GiveItemNum 1 {quantity} {quality}", "quantity": 10 }
            ],
            "2": [
                { "cmd": "GiveItem \"Blueprint'/Game/PrimalEarth/CoreBlueprints/Items/Consumables/PrimalItemConsumable_CookedMeat.PrimalItemConsumable_CookedMeat'\" {quantity} {quality} 0", "quantity": 5, "quality": 0 },
                { "cmd": "ServerChat \"{player} reached level 2\"" }
            ]
        });
        storage.write_json(LEVELS_FILE, &levels).await?;
        info!("Sample levels written to {}", storage.path(LEVELS_FILE).display());
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs also echo to the console
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
