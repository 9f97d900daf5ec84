//! # Bridge
//!
//! The single owning context: registry, stores, gateway and persistence. Every
//! user-facing operation and every scheduled task goes through a [`Bridge`].
//!
//! ## Locking
//!
//! - `registry` (async `RwLock`) and `state` (async `Mutex`) are held only for
//!   in-memory reads and writes, never across a gateway call or file I/O.
//! - `persist_lock` serialises writers so an older in-memory image can never
//!   overwrite a newer one on disk.
//! - `claims` is the explicit in-flight set for (player, level) claims.
//!
//! Persistence failures after a mutation are logged; the in-memory change stands.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;

use crate::classify::{classify, Outcome};
use crate::config::Config;
use crate::error::{
    ClaimError, CommandError, GatewayError, LinkError, PersistenceError, RegistryError,
    RewardError,
};
use crate::gateway::CommandGateway;
use crate::identity::{AccountLink, IdentityStore};
use crate::logutil::short_identity;
use crate::metrics;
use crate::rcon::{default_transport, RconTransport};
use crate::registry::ServerRegistry;
use crate::rewards::{normalize_blueprint, render_template, LevelCatalog, RewardLedger};
use crate::scanner::{apply_results, parse_roster, query_rosters, RosterSnapshot, ScanReport};
use crate::storage::snapshot::{SnapshotInfo, SnapshotWriter};
use crate::storage::{Documents, Storage};
use crate::validation::{is_valid_identity, sanitize_chat_text};

pub use crate::storage::snapshot::Statistics;

/// Command used for connectivity tests and server health checks.
const VERSION_COMMAND: &str = "version";

struct State {
    identities: IdentityStore,
    ledger: RewardLedger,
    catalog: LevelCatalog,
    rosters: BTreeMap<String, RosterSnapshot>,
}

/// Result of one console command, classified.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub server_id: String,
    pub command: String,
    pub raw: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub player: String,
    pub level: u32,
    pub server_id: String,
    pub commands: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStatus {
    pub player: String,
    pub identity: Option<String>,
    pub identity_valid: bool,
    pub claimed: Vec<u32>,
    /// Catalog levels not yet claimed.
    pub available: Vec<u32>,
    pub linked_account: Option<String>,
    /// Servers whose last roster listed this player.
    pub online_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSummary {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub map: Option<String>,
    pub enabled: bool,
    pub is_default: bool,
    pub connection_timeout: u64,
    pub online_players: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    pub server_id: String,
    pub latency: Duration,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerHealth {
    Online { version: String, players: usize },
    Offline(String),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCheck {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub health: ServerHealth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInfo {
    pub player: String,
    pub identity: String,
    pub valid: bool,
    pub short: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSummary {
    pub name: String,
    pub identity_valid: bool,
    pub rewards: usize,
    pub linked_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub uptime: Duration,
    pub total_servers: usize,
    pub enabled_servers: usize,
    pub tracked_players: usize,
    pub metrics: metrics::Snapshot,
    pub latency_warning: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub servers: usize,
    pub skipped_servers: usize,
    pub players: usize,
    pub links: usize,
    pub levels: usize,
}

/// Holds a (player, level) slot in the in-flight set until dropped.
struct ClaimGuard<'a> {
    set: &'a StdMutex<HashSet<(String, u32)>>,
    key: (String, u32),
}

impl<'a> ClaimGuard<'a> {
    fn acquire(
        set: &'a StdMutex<HashSet<(String, u32)>>,
        player: &str,
        level: u32,
    ) -> Result<Self, ClaimError> {
        let key = (player.to_string(), level);
        let mut guard = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(key.clone()) {
            return Err(ClaimError::InProgress {
                player: player.to_string(),
                level,
            });
        }
        Ok(Self { set, key })
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(&self.key);
    }
}

pub struct Bridge {
    config: Config,
    registry: Arc<RwLock<ServerRegistry>>,
    gateway: Arc<CommandGateway>,
    state: Mutex<State>,
    storage: Storage,
    snapshots: SnapshotWriter,
    persist_lock: Mutex<()>,
    claims: StdMutex<HashSet<(String, u32)>>,
    env: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
    started: Instant,
}

impl Bridge {
    /// Open with the compiled-in transport and the process environment.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        Self::open_with(config, default_transport(), |k: &str| std::env::var(k).ok()).await
    }

    pub async fn open_with<F>(
        config: Config,
        transport: Option<Arc<dyn RconTransport>>,
        env: F,
    ) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let storage = Storage::new(&config.bridge.data_dir).await?;
        let docs = storage.load_all().await?;
        let (registry, skipped) = ServerRegistry::from_document(&docs.servers, &env);
        if !skipped.is_empty() {
            warn!("{} server entries skipped as invalid", skipped.len());
        }
        if transport.is_none() {
            warn!("no remote console transport compiled in; every command will be rejected");
        }
        let registry = Arc::new(RwLock::new(registry));
        let gateway = Arc::new(CommandGateway::new(
            registry.clone(),
            transport,
            &config.gateway.to_gateway_config(),
        ));
        let state = State {
            identities: IdentityStore::from_parts(docs.identities, docs.links),
            ledger: RewardLedger::from_document(docs.rewards),
            catalog: LevelCatalog::from_document(docs.levels),
            rosters: BTreeMap::new(),
        };
        let snapshots = SnapshotWriter::new(storage.autosave_dir(), config.autosave.snapshot_retention);
        Ok(Self {
            config,
            registry,
            gateway,
            state: Mutex::new(state),
            storage,
            snapshots,
            persist_lock: Mutex::new(()),
            claims: StdMutex::new(HashSet::new()),
            env: Box::new(env),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<CommandGateway> {
        &self.gateway
    }

    pub async fn default_server(&self) -> Option<String> {
        self.registry.read().await.default_server().map(str::to_string)
    }

    async fn resolve_server(&self, server: Option<&str>) -> Result<String, GatewayError> {
        match server {
            Some(id) => Ok(id.to_string()),
            None => self
                .default_server()
                .await
                .ok_or_else(|| GatewayError::Disabled("<default>".to_string())),
        }
    }

    /// Run a command on `server` (or the default server) and classify the response.
    pub async fn execute_command(
        &self,
        server: Option<&str>,
        command: &str,
    ) -> Result<CommandReport, GatewayError> {
        let server_id = self.resolve_server(server).await?;
        let started = Instant::now();
        let raw = self.gateway.execute(&server_id, command).await?;
        let outcome = classify(Some(&raw), command);
        debug!("{} on {} -> {}", command, server_id, outcome);
        Ok(CommandReport {
            server_id,
            command: command.to_string(),
            raw,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    /// Grant the rewards of `level` to `player` on the default server.
    ///
    /// The level is recorded only if every reward command succeeded. Commands
    /// already applied on the server are not rolled back when a later one fails.
    pub async fn claim(&self, player: &str, level: u32) -> Result<ClaimReceipt, ClaimError> {
        let _slot = ClaimGuard::acquire(&self.claims, player, level)?;

        let commands: Vec<String> = {
            let state = self.state.lock().await;
            if state.ledger.is_claimed(player, level) {
                return Err(ClaimError::AlreadyClaimed {
                    player: player.to_string(),
                    level,
                });
            }
            let templates = state
                .catalog
                .templates(level)
                .ok_or(ClaimError::NoDefinition(level))?;
            let identity = state
                .identities
                .valid_identity_of(player)
                .ok_or_else(|| ClaimError::InvalidIdentity(player.to_string()))?;
            templates
                .iter()
                .map(|t| render_template(t, player, identity))
                .collect()
        };

        let server_id = self.resolve_server(None).await?;
        let total = commands.len();
        let mut succeeded = 0;
        for cmd in &commands {
            match self.gateway.execute(&server_id, cmd).await {
                Ok(raw) => match classify(Some(&raw), cmd) {
                    Outcome::Success(_) => succeeded += 1,
                    other => warn!("reward command for {} level {} not accepted: {}", player, level, other),
                },
                Err(e) => warn!("reward command for {} level {} failed: {}", player, level, e),
            }
        }

        if succeeded != total {
            metrics::inc_claims_failed();
            warn!("claim {} level {}: {}/{} commands succeeded", player, level, succeeded, total);
            return Err(ClaimError::PartialExecution { succeeded, total });
        }

        {
            let mut state = self.state.lock().await;
            if !state.ledger.record(player, level) {
                return Err(ClaimError::AlreadyClaimed {
                    player: player.to_string(),
                    level,
                });
            }
        }
        self.persist_logged("claim").await;
        metrics::inc_claims_granted();
        info!("{} claimed level {} on {} ({} commands)", player, level, server_id, total);
        Ok(ClaimReceipt {
            player: player.to_string(),
            level,
            server_id,
            commands: total,
        })
    }

    /// Claim on behalf of a linked platform account.
    pub async fn claim_for_account(
        &self,
        account: &str,
        level: u32,
    ) -> Result<ClaimReceipt, ClaimError> {
        let player = {
            let state = self.state.lock().await;
            state
                .identities
                .link_for(account)
                .map(|l| l.player_name.clone())
                .ok_or_else(|| ClaimError::NotLinked(account.to_string()))?
        };
        self.claim(&player, level).await
    }

    /// Remove a claimed level from the ledger. No command is sent to any server.
    pub async fn delete_reward(&self, player: &str, level: u32) -> Result<(), RewardError> {
        {
            let mut state = self.state.lock().await;
            if !state.ledger.remove(player, level) {
                return Err(RewardError::NotClaimed {
                    player: player.to_string(),
                    level,
                });
            }
        }
        info!("removed level {} from {}", level, player);
        self.persist_logged("delete reward").await;
        Ok(())
    }

    pub async fn link_account(&self, account: &str, player: &str) -> Result<AccountLink, LinkError> {
        let link = {
            let mut state = self.state.lock().await;
            state.identities.link(account, player, Utc::now())?
        };
        info!("account {} linked to {}", account, link.player_name);
        self.persist_logged("link").await;
        Ok(link)
    }

    pub async fn query_status(&self, player: &str) -> PlayerStatus {
        let state = self.state.lock().await;
        let identity = state.identities.identity_of(player).map(str::to_string);
        let claimed = state.ledger.levels_of(player);
        let available = state
            .catalog
            .levels()
            .filter(|l| !claimed.contains(l))
            .collect();
        PlayerStatus {
            player: player.to_string(),
            identity_valid: identity.as_deref().map(is_valid_identity).unwrap_or(false),
            identity,
            claimed,
            available,
            linked_account: state.identities.account_for_player(player).map(str::to_string),
            online_on: state
                .rosters
                .iter()
                .filter(|(_, r)| r.players.iter().any(|p| p == player))
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }

    pub async fn list_servers(&self) -> Vec<ServerSummary> {
        let servers: Vec<ServerSummary> = {
            let reg = self.registry.read().await;
            let default = reg.default_server();
            reg.iter()
                .map(|s| ServerSummary {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    host: s.host.clone(),
                    port: s.port,
                    map: s.map.clone(),
                    enabled: s.enabled,
                    is_default: default == Some(s.id.as_str()),
                    connection_timeout: s.connection_timeout,
                    online_players: None,
                })
                .collect()
        };
        let state = self.state.lock().await;
        servers
            .into_iter()
            .map(|mut s| {
                s.online_players = state.rosters.get(&s.id).map(|r| r.players.len());
                s
            })
            .collect()
    }

    /// Send the roster command to `server` and report round-trip latency.
    pub async fn test_connectivity(&self, server: &str) -> Result<ConnectivityReport, GatewayError> {
        let report = self
            .execute_command(Some(server), &self.config.scanner.roster_command)
            .await?;
        info!(
            "connectivity to {} ok in {:.2}s",
            server,
            report.elapsed.as_secs_f64()
        );
        Ok(ConnectivityReport {
            server_id: report.server_id,
            latency: report.elapsed,
            outcome: report.outcome,
        })
    }

    pub async fn set_default_server(&self, server: &str) -> Result<(), RegistryError> {
        self.registry.write().await.set_default(server)?;
        info!("default server set to {}", server);
        self.persist_logged("default server change").await;
        Ok(())
    }

    /// Scan every enabled server's roster and reconcile identities.
    pub async fn scan_players(&self) -> ScanReport {
        let ids = self.registry.read().await.enabled_ids();
        if ids.is_empty() {
            debug!("no servers configured for player scanning");
            return ScanReport::default();
        }
        let results = query_rosters(
            self.gateway.clone(),
            ids,
            &self.config.scanner.roster_command,
            self.config.scanner.query_timeout(),
        )
        .await;
        let mut report = {
            let mut state = self.state.lock().await;
            let State {
                identities,
                ledger,
                rosters,
                ..
            } = &mut *state;
            apply_results(results, identities, ledger, rosters, Utc::now())
        };
        if report.changed() {
            info!(
                "identity scan: {} new + {} updated",
                report.new_players, report.updated_players
            );
            report.persisted = self.persist_logged("scan").await;
        }
        metrics::inc_scans_completed();
        report
    }

    /// Persist every store and write a timestamped snapshot.
    pub async fn autosave(&self) -> Result<SnapshotInfo, PersistenceError> {
        let _w = self.persist_lock.lock().await;
        let docs = self.documents().await;
        self.storage.save_all(&docs).await?;
        let (levels, stats) = {
            let state = self.state.lock().await;
            let enabled = docs.servers.values().filter(|s| s.enabled).count();
            (
                state.catalog.to_document(),
                Self::stats_from(&state, docs.servers.len(), enabled),
            )
        };
        self.snapshots.write(Utc::now(), &docs, &levels, &stats)
    }

    /// Read-only health summary; warns when average command latency is high.
    pub async fn heartbeat(&self) -> HeartbeatReport {
        let (total_servers, enabled_servers) = {
            let reg = self.registry.read().await;
            (reg.len(), reg.enabled_count())
        };
        let tracked_players = self.state.lock().await.identities.player_count();
        let m = metrics::snapshot();
        let latency_warning = m
            .latency_avg_ms
            .map(|ms| ms > self.config.heartbeat.latency_warn_ms)
            .unwrap_or(false);
        if latency_warning {
            warn!(
                "high console latency: {}ms average",
                m.latency_avg_ms.unwrap_or_default()
            );
        }
        info!(
            "heartbeat: {} of {} servers enabled, {} players tracked, {} commands ({} ok, {} failed, {} timed out)",
            enabled_servers,
            total_servers,
            tracked_players,
            m.commands_sent,
            m.commands_ok,
            m.commands_failed,
            m.commands_timed_out
        );
        HeartbeatReport {
            uptime: self.uptime(),
            total_servers,
            enabled_servers,
            tracked_players,
            metrics: m,
            latency_warning,
        }
    }

    pub async fn statistics(&self) -> Statistics {
        let (total, enabled) = {
            let reg = self.registry.read().await;
            (reg.len(), reg.enabled_count())
        };
        let state = self.state.lock().await;
        Self::stats_from(&state, total, enabled)
    }

    fn stats_from(state: &State, total_servers: usize, enabled_servers: usize) -> Statistics {
        Statistics {
            total_rewards_given: state.ledger.total_rewards(),
            active_players: state.ledger.active_players(),
            level_distribution: state
                .ledger
                .level_distribution()
                .into_iter()
                .map(|(l, n)| (l.to_string(), n))
                .collect(),
            total_servers,
            enabled_servers,
        }
    }

    /// Server-wide chat message on the default server.
    pub async fn broadcast(&self, message: &str) -> Result<CommandReport, CommandError> {
        let text = sanitize_chat_text(message);
        if text.is_empty() {
            return Err(CommandError::EmptyMessage);
        }
        Ok(self
            .execute_command(None, &format!("ServerChat \"{}\"", text))
            .await?)
    }

    /// Grant an item by blueprint path to a tracked player on the default server.
    pub async fn give_item(
        &self,
        player: &str,
        blueprint: &str,
        quantity: u32,
        quality: u32,
        force_blueprint: bool,
    ) -> Result<CommandReport, CommandError> {
        let identity = {
            let state = self.state.lock().await;
            let id = state
                .identities
                .identity_of(player)
                .ok_or_else(|| CommandError::UnknownPlayer(player.to_string()))?;
            if !is_valid_identity(id) {
                return Err(CommandError::InvalidIdentity(player.to_string()));
            }
            id.to_string()
        };
        let command = format!(
            "GiveItemToEOSID {} \"{}\" {} {} {} 0 0 0 0 0",
            identity,
            normalize_blueprint(blueprint),
            quantity,
            quality,
            u8::from(force_blueprint)
        );
        Ok(self.execute_command(None, &command).await?)
    }

    pub async fn lookup_identity(&self, player: &str) -> Option<IdentityInfo> {
        let state = self.state.lock().await;
        state.identities.identity_of(player).map(|id| IdentityInfo {
            player: player.to_string(),
            identity: id.to_string(),
            valid: is_valid_identity(id),
            short: short_identity(id),
        })
    }

    /// Every tracked player, most rewards first.
    pub async fn list_players(&self) -> Vec<PlayerSummary> {
        let state = self.state.lock().await;
        let mut players: Vec<PlayerSummary> = state
            .identities
            .players()
            .map(|(name, id)| PlayerSummary {
                name: name.clone(),
                identity_valid: is_valid_identity(id),
                rewards: state.ledger.levels_of(name).len(),
                linked_account: state.identities.account_for_player(name).map(str::to_string),
            })
            .collect();
        players.sort_by(|a, b| b.rewards.cmp(&a.rewards).then_with(|| a.name.cmp(&b.name)));
        players
    }

    /// Re-read every document from disk, replacing in-memory state. Roster
    /// snapshots are kept.
    pub async fn reload(&self) -> Result<ReloadSummary, PersistenceError> {
        let _w = self.persist_lock.lock().await;
        let docs = self.storage.load_all().await?;
        let (registry, skipped) = ServerRegistry::from_document(&docs.servers, &*self.env);
        let summary = ReloadSummary {
            servers: registry.len(),
            skipped_servers: skipped.len(),
            players: docs.identities.len(),
            links: docs.links.len(),
            levels: docs.levels.len(),
        };
        *self.registry.write().await = registry;
        {
            let mut state = self.state.lock().await;
            state.identities = IdentityStore::from_parts(docs.identities, docs.links);
            state.ledger = RewardLedger::from_document(docs.rewards);
            state.catalog = LevelCatalog::from_document(docs.levels);
        }
        info!(
            "reloaded: {} servers ({} skipped), {} players, {} links, {} levels",
            summary.servers, summary.skipped_servers, summary.players, summary.links, summary.levels
        );
        Ok(summary)
    }

    /// Probe every configured server with a version query and a roster query.
    pub async fn check_all_servers(&self) -> Vec<ServerCheck> {
        let (servers, default) = {
            let reg = self.registry.read().await;
            let servers: Vec<(String, String, bool)> = reg
                .iter()
                .map(|s| (s.id.clone(), s.name.clone(), s.enabled))
                .collect();
            (servers, reg.default_server().map(str::to_string))
        };
        let roster_cmd = self.config.scanner.roster_command.clone();
        let mut set = JoinSet::new();
        for (id, name, enabled) in servers {
            let gw = self.gateway.clone();
            let roster_cmd = roster_cmd.clone();
            let is_default = default.as_deref() == Some(id.as_str());
            set.spawn(async move {
                let health = if !enabled {
                    ServerHealth::Disabled
                } else {
                    match gw.execute(&id, VERSION_COMMAND).await {
                        Err(e) => ServerHealth::Offline(e.to_string()),
                        Ok(version) => {
                            let players = match gw.execute(&id, &roster_cmd).await {
                                Ok(text) => parse_roster(&text).len(),
                                Err(_) => 0,
                            };
                            let version: String = version.trim().chars().take(50).collect();
                            ServerHealth::Online {
                                version: if version.is_empty() {
                                    "connected".to_string()
                                } else {
                                    version
                                },
                                players,
                            }
                        }
                    }
                };
                ServerCheck {
                    id,
                    name,
                    is_default,
                    health,
                }
            });
        }
        let mut checks = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(c) => checks.push(c),
                Err(e) => warn!("server check task failed: {}", e),
            }
        }
        checks.sort_by(|a, b| a.id.cmp(&b.id));
        checks
    }

    async fn documents(&self) -> Documents {
        let servers = self.registry.read().await.to_document();
        let state = self.state.lock().await;
        Documents {
            rewards: state.ledger.to_document(),
            identities: state.identities.players_document().clone(),
            links: state.identities.links_document().clone(),
            servers,
        }
    }

    /// Write the four mutable stores.
    pub async fn persist(&self) -> Result<(), PersistenceError> {
        let _w = self.persist_lock.lock().await;
        let docs = self.documents().await;
        self.storage.save_all(&docs).await
    }

    async fn persist_logged(&self, after: &str) -> bool {
        match self.persist().await {
            Ok(()) => true,
            Err(e) => {
                error!("failed to persist after {}: {}", after, e);
                false
            }
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
