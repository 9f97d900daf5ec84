//! Level rewards: the catalog of command templates per level and the ledger
//! of levels each player has claimed.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use serde::{Deserialize, Serialize};

/// One command template from `levels.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardTemplate {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
}

impl RewardTemplate {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            quantity: None,
            quality: None,
        }
    }
}

/// Level → ordered templates. Read-only at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelCatalog {
    levels: BTreeMap<u32, Vec<RewardTemplate>>,
}

impl LevelCatalog {
    /// Build from the `levels.json` document; keys that are not level numbers are skipped.
    pub fn from_document(doc: BTreeMap<String, Vec<RewardTemplate>>) -> Self {
        let mut levels = BTreeMap::new();
        for (key, templates) in doc {
            match key.trim().parse::<u32>() {
                Ok(level) => {
                    levels.insert(level, templates);
                }
                Err(_) => warn!("levels.json: ignoring non-numeric level key '{}'", key),
            }
        }
        Self { levels }
    }

    pub fn templates(&self, level: u32) -> Option<&[RewardTemplate]> {
        self.levels.get(&level).map(Vec::as_slice)
    }

    pub fn levels(&self) -> impl Iterator<Item = u32> + '_ {
        self.levels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn to_document(&self) -> BTreeMap<String, Vec<RewardTemplate>> {
        self.levels
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Player → claimed levels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardLedger {
    claimed: BTreeMap<String, BTreeSet<u32>>,
}

impl RewardLedger {
    pub fn from_document(doc: BTreeMap<String, Vec<u32>>) -> Self {
        Self {
            claimed: doc
                .into_iter()
                .map(|(p, levels)| (p, levels.into_iter().collect()))
                .collect(),
        }
    }

    /// Sorted level lists, the shape written to `rewards.json`.
    pub fn to_document(&self) -> BTreeMap<String, Vec<u32>> {
        self.claimed
            .iter()
            .map(|(p, set)| (p.clone(), set.iter().copied().collect()))
            .collect()
    }

    /// Create an empty record if the player has none.
    pub fn ensure_player(&mut self, player: &str) {
        self.claimed.entry(player.to_string()).or_default();
    }

    pub fn is_claimed(&self, player: &str, level: u32) -> bool {
        self.claimed
            .get(player)
            .map(|s| s.contains(&level))
            .unwrap_or(false)
    }

    /// Returns false if the level was already recorded.
    pub fn record(&mut self, player: &str, level: u32) -> bool {
        self.claimed
            .entry(player.to_string())
            .or_default()
            .insert(level)
    }

    /// Returns false if the level was not recorded.
    pub fn remove(&mut self, player: &str, level: u32) -> bool {
        self.claimed
            .get_mut(player)
            .map(|s| s.remove(&level))
            .unwrap_or(false)
    }

    pub fn levels_of(&self, player: &str) -> Vec<u32> {
        self.claimed
            .get(player)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn player_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn total_rewards(&self) -> usize {
        self.claimed.values().map(BTreeSet::len).sum()
    }

    /// Players with at least one claimed level.
    pub fn active_players(&self) -> usize {
        self.claimed.values().filter(|s| !s.is_empty()).count()
    }

    /// Level → number of players that claimed it.
    pub fn level_distribution(&self) -> BTreeMap<u32, usize> {
        let mut dist = BTreeMap::new();
        for set in self.claimed.values() {
            for level in set {
                *dist.entry(*level).or_insert(0) += 1;
            }
        }
        dist
    }
}

/// Fill placeholders and expand legacy item shorthands into identity-targeted grants.
///
/// Placeholders: `{player}`, `{identity}`, `{eos_id}`, `{quantity}` (default 1),
/// `{quality}` (default 0). `GiveItemNum <id> <amount> [quality]` and
/// `GiveItem "Blueprint'<path>'" <amount> <quality> <bp>` become `GiveItemToEOSID`
/// commands for `identity`.
pub fn render_template(template: &RewardTemplate, player: &str, identity: &str) -> String {
    let quantity = template.quantity.unwrap_or(1).to_string();
    let quality = template.quality.unwrap_or(0).to_string();
    let cmd = template
        .cmd
        .replace("{player}", player)
        .replace("{identity}", identity)
        .replace("{eos_id}", identity)
        .replace("{quantity}", &quantity)
        .replace("{quality}", &quality);

    if cmd.starts_with("GiveItemNum") {
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        if parts.len() >= 3 {
            let q = parts.get(3).copied().unwrap_or("0");
            return format!(
                "GiveItemToEOSID {} {} {} {} 0 0 0 0 0 0",
                identity, parts[1], parts[2], q
            );
        }
        return cmd;
    }

    if cmd.starts_with("GiveItem") && !cmd.starts_with("GiveItemToEOSID") {
        if let Some(path) = quoted_blueprint(&cmd) {
            let parts: Vec<&str> = cmd.split_whitespace().collect();
            let (amount, q) = if parts.len() >= 4 {
                (parts[parts.len() - 3], parts[parts.len() - 2])
            } else {
                ("1", "0")
            };
            return format!(
                "GiveItemToEOSID {} \"Blueprint'{}'\" {} {} 0 0 0 0 0 0",
                identity, path, amount, q
            );
        }
    }

    cmd
}

/// Extract `<path>` from `"Blueprint'<path>'"`.
fn quoted_blueprint(cmd: &str) -> Option<&str> {
    const OPEN: &str = "\"Blueprint'";
    let start = cmd.find(OPEN)? + OPEN.len();
    let rest = &cmd[start..];
    let end = rest.find('\'')?;
    if end == 0 || !rest[end + 1..].starts_with('"') {
        return None;
    }
    Some(&rest[..end])
}

/// Normalise an item path to the `Blueprint'/Game/...'` form.
pub fn normalize_blueprint(path: &str) -> String {
    let clean = path.trim().trim_matches(|c| c == '"' || c == '\'');
    if let Some(inner) = clean.strip_prefix("Blueprint'") {
        return format!("Blueprint'{}'", inner.trim_end_matches('\''));
    }
    let rel = clean.strip_prefix('/').unwrap_or(clean);
    if rel.starts_with("Game/") {
        format!("Blueprint'/{}'", rel)
    } else {
        format!("Blueprint'/Game/{}'", rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "28838c3022e0cb886568abcaa6f37f8d";

    #[test]
    fn placeholders_are_filled() {
        let t = RewardTemplate {
            cmd: "GiveItemToEOSID {eos_id} Wood {quantity} {quality} 0".into(),
            quantity: Some(50),
            quality: None,
        };
        assert_eq!(
            render_template(&t, "Steve", ID),
            format!("GiveItemToEOSID {} Wood 50 0 0", ID)
        );
        let chat = RewardTemplate::new("ServerChat \"{player} reached a new level\"");
        assert_eq!(
            render_template(&chat, "Steve", ID),
            "ServerChat \"Steve reached a new level\""
        );
    }

    #[test]
    fn item_number_shorthand_targets_identity() {
        let t = RewardTemplate::new("GiveItemNum 83 100 0 0");
        assert_eq!(
            render_template(&t, "Steve", ID),
            format!("GiveItemToEOSID {} 83 100 0 0 0 0 0 0 0", ID)
        );
        let short = RewardTemplate::new("GiveItemNum 9 10");
        assert_eq!(
            render_template(&short, "Steve", ID),
            format!("GiveItemToEOSID {} 9 10 0 0 0 0 0 0 0", ID)
        );
    }

    #[test]
    fn blueprint_shorthand_targets_identity() {
        let t = RewardTemplate::new(
            "GiveItem \"Blueprint'/Game/PrimalEarth/CoreBlueprints/Armor/Cloth/PrimalItemArmor_GhillieBoots'\" 1 0 0",
        );
        assert_eq!(
            render_template(&t, "Steve", ID),
            format!(
                "GiveItemToEOSID {} \"Blueprint'/Game/PrimalEarth/CoreBlueprints/Armor/Cloth/PrimalItemArmor_GhillieBoots'\" 1 0 0 0 0 0 0 0 0",
                ID
            )
        );
    }

    #[test]
    fn explicit_grant_is_left_alone() {
        let cmd = format!("GiveItemToEOSID {} \"Blueprint'/Game/X.X'\" 1 0 0 0 0 0 0 0 0", ID);
        let t = RewardTemplate::new(cmd.clone());
        assert_eq!(render_template(&t, "Steve", ID), cmd);
    }

    #[test]
    fn blueprint_paths_are_normalised() {
        assert_eq!(normalize_blueprint("/Game/A/B.B"), "Blueprint'/Game/A/B.B'");
        assert_eq!(normalize_blueprint("Game/A/B.B"), "Blueprint'/Game/A/B.B'");
        assert_eq!(normalize_blueprint("A/B.B"), "Blueprint'/Game/A/B.B'");
        assert_eq!(
            normalize_blueprint("\"Blueprint'/Game/A/B.B'\""),
            "Blueprint'/Game/A/B.B'"
        );
    }

    #[test]
    fn ledger_statistics() {
        let mut ledger = RewardLedger::default();
        ledger.ensure_player("Idle");
        assert!(ledger.record("Steve", 10));
        assert!(ledger.record("Steve", 1));
        assert!(!ledger.record("Steve", 1));
        assert!(ledger.record("Alex", 1));
        assert_eq!(ledger.total_rewards(), 3);
        assert_eq!(ledger.active_players(), 2);
        assert_eq!(ledger.player_count(), 3);
        assert_eq!(ledger.level_distribution().get(&1), Some(&2));
        assert_eq!(ledger.to_document()["Steve"], vec![1, 10]);
        assert!(ledger.remove("Steve", 10));
        assert!(!ledger.remove("Steve", 10));
        assert!(!ledger.remove("Nobody", 1));
    }

    #[test]
    fn catalog_skips_non_numeric_keys() {
        let mut doc = BTreeMap::new();
        doc.insert("10".to_string(), vec![RewardTemplate::new("A")]);
        doc.insert("_note".to_string(), vec![]);
        let cat = LevelCatalog::from_document(doc);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.templates(10).map(|t| t.len()), Some(1));
        assert!(cat.templates(11).is_none());
    }
}
