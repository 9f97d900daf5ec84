//! Periodic roster scanning and identity reconciliation.
//!
//! A scan queries every enabled server concurrently, each under its own
//! timeout, then applies the results in server-id order. One slow or failing
//! server never delays or aborts the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::task::JoinSet;

use crate::classify::{classify, split_roster_line, Outcome, NO_PLAYERS};
use crate::error::ReconciliationError;
use crate::gateway::CommandGateway;
use crate::identity::{IdentityStore, Reconciled};
use crate::logutil::escape_log;
use crate::rewards::RewardLedger;
use crate::validation::{is_valid_identity, validate_player_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub identity: String,
}

/// Players online on one server at the last successful scan. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub players: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

/// Parse one `index. name, identity` line.
pub fn parse_roster_line(line: &str) -> Result<RosterEntry, ReconciliationError> {
    let (name, identity) = split_roster_line(line).ok_or(ReconciliationError::Malformed)?;
    let name = validate_player_name(name).map_err(|_| ReconciliationError::Malformed)?;
    if !is_valid_identity(identity) {
        return Err(ReconciliationError::InvalidIdentity(identity.to_string()));
    }
    Ok(RosterEntry {
        name: name.to_string(),
        identity: identity.to_string(),
    })
}

/// Parse a full roster response. Blank lines and the empty-server marker are
/// ignored; other unusable lines are skipped and logged at debug.
pub fn parse_roster(text: &str) -> Vec<RosterEntry> {
    if text.contains(NO_PLAYERS) {
        return Vec::new();
    }
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_roster_line(line) {
            Ok(e) => entries.push(e),
            Err(err) => debug!("skipping roster line '{}': {}", escape_log(line), err),
        }
    }
    entries
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Roster(Vec<RosterEntry>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerScan {
    Online { players: usize },
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub servers: BTreeMap<String, ServerScan>,
    pub new_players: usize,
    pub updated_players: usize,
    /// Set by the caller once the stores were written.
    pub persisted: bool,
}

impl ScanReport {
    pub fn changed(&self) -> bool {
        self.new_players + self.updated_players > 0
    }
}

/// Entries are parsed before the text is classified, so a name such as
/// "Terror" still yields a roster. Only an entry-less error reply fails.
fn roster_result(text: &str, command: &str) -> QueryResult {
    let entries = parse_roster(text);
    if entries.is_empty() {
        if let outcome @ Outcome::Error { .. } = classify(Some(text), command) {
            return QueryResult::Failed(outcome.to_string());
        }
    }
    QueryResult::Roster(entries)
}

/// Query the roster of each server concurrently. Results are sorted by server id.
pub async fn query_rosters(
    gateway: Arc<CommandGateway>,
    server_ids: Vec<String>,
    command: &str,
    timeout: Duration,
) -> Vec<(String, QueryResult)> {
    let mut set = JoinSet::new();
    for id in server_ids {
        let gw = gateway.clone();
        let cmd = command.to_string();
        set.spawn(async move {
            let res = match tokio::time::timeout(timeout, gw.execute(&id, &cmd)).await {
                Err(_) => QueryResult::Failed(format!("no roster within {}ms", timeout.as_millis())),
                Ok(Err(e)) => QueryResult::Failed(e.to_string()),
                Ok(Ok(text)) => roster_result(&text, &cmd),
            };
            (id, res)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(r) => results.push(r),
            Err(e) => warn!("roster query task failed: {}", e),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Merge roster results into the stores. `results` must already be in server-id order.
pub fn apply_results(
    results: Vec<(String, QueryResult)>,
    identities: &mut IdentityStore,
    ledger: &mut RewardLedger,
    rosters: &mut BTreeMap<String, RosterSnapshot>,
    now: DateTime<Utc>,
) -> ScanReport {
    let mut report = ScanReport::default();
    for (server_id, result) in results {
        match result {
            QueryResult::Failed(reason) => {
                debug!("could not scan {}: {}", server_id, reason);
                report.servers.insert(server_id, ServerScan::Failed(reason));
            }
            QueryResult::Roster(entries) => {
                for entry in &entries {
                    match identities.reconcile(&entry.name, &entry.identity) {
                        Reconciled::New => {
                            report.new_players += 1;
                            ledger.ensure_player(&entry.name);
                            info!("new player {} seen on {}", entry.name, server_id);
                        }
                        Reconciled::Updated => {
                            report.updated_players += 1;
                            info!("identity of {} changed (seen on {})", entry.name, server_id);
                        }
                        Reconciled::Unchanged => {}
                    }
                }
                report.servers.insert(
                    server_id.clone(),
                    ServerScan::Online {
                        players: entries.len(),
                    },
                );
                rosters.insert(
                    server_id,
                    RosterSnapshot {
                        players: entries.into_iter().map(|e| e.name).collect(),
                        captured_at: now,
                    },
                );
            }
        }
    }
    report
}
