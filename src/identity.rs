//! Player identities and platform account links.
//!
//! `players` maps a player name to the external identity last observed for it.
//! `links` maps a platform account id to the player it was linked to; a later
//! link for the same account replaces the earlier one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::validation::is_valid_identity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountLink {
    pub eos_id: String,
    pub player_name: String,
    pub original_input: String,
    /// ISO-8601 timestamp of the link.
    pub linked_at: String,
}

/// Result of merging one roster observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    New,
    Updated,
    Unchanged,
}

#[derive(Debug, Default, Clone)]
pub struct IdentityStore {
    players: BTreeMap<String, String>,
    links: BTreeMap<String, AccountLink>,
}

impl IdentityStore {
    pub fn from_parts(
        players: BTreeMap<String, String>,
        links: BTreeMap<String, AccountLink>,
    ) -> Self {
        Self { players, links }
    }

    /// Record that `name` was seen with `identity`. The caller validates the identity.
    pub fn reconcile(&mut self, name: &str, identity: &str) -> Reconciled {
        match self.players.get_mut(name) {
            Some(current) if current == identity => Reconciled::Unchanged,
            Some(current) => {
                *current = identity.to_string();
                Reconciled::Updated
            }
            None => {
                self.players.insert(name.to_string(), identity.to_string());
                Reconciled::New
            }
        }
    }

    pub fn identity_of(&self, name: &str) -> Option<&str> {
        self.players.get(name).map(String::as_str)
    }

    /// The identity for `name` if it is present and well-formed.
    pub fn valid_identity_of(&self, name: &str) -> Option<&str> {
        self.identity_of(name).filter(|id| is_valid_identity(id))
    }

    pub fn players(&self) -> impl Iterator<Item = (&String, &String)> {
        self.players.iter()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Link `account` to a player that has been observed on a server.
    pub fn link(
        &mut self,
        account: &str,
        player: &str,
        now: DateTime<Utc>,
    ) -> Result<AccountLink, LinkError> {
        let account = account.trim();
        if account.is_empty() {
            return Err(LinkError::EmptyAccount);
        }
        let name = player.trim();
        let eos_id = self
            .players
            .get(name)
            .ok_or_else(|| LinkError::UnknownPlayer(name.to_string()))?
            .clone();
        let link = AccountLink {
            eos_id,
            player_name: name.to_string(),
            original_input: player.to_string(),
            linked_at: now.to_rfc3339(),
        };
        self.links.insert(account.to_string(), link.clone());
        Ok(link)
    }

    pub fn link_for(&self, account: &str) -> Option<&AccountLink> {
        self.links.get(account)
    }

    /// First account (in id order) linked to `player`.
    pub fn account_for_player(&self, player: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|(_, l)| l.player_name == player)
            .map(|(a, _)| a.as_str())
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn players_document(&self) -> &BTreeMap<String, String> {
        &self.players
    }

    pub fn links_document(&self) -> &BTreeMap<String, AccountLink> {
        &self.links
    }
}
