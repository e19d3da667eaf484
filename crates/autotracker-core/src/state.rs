//! Obtained-state store for every tracker entity.
//!
//! The store is the single source of truth the rendering layer reads from.
//! It is written by decode passes and by manual toggles, and records a
//! [`StateChange`] whenever an entity's visible state actually changes.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::events::EVENT_FLAGS;
use crate::items::{resolve_all, ItemOutcome, MoonstoneStage, ResolveContext, KEY_ITEMS};
use crate::memory::{Character, PartyView, SegmentBuffer};

/// Identifier of the synthetic go-mode entity.
pub const GO_MODE: &str = "gomode";

/// Identifier of the three-stage item.
pub const MOONSTONE: &str = "moonstone";

/// Item sets that each unlock a path to the final boss.
pub const GO_MODE_SETS: [[&str; 3]; 3] = [
    ["gatekey", "dreamstone", "rubyknife"],
    ["pendant", "clone", "ctrigger"],
    ["Frog", "benthilt", "bentsword"],
];

/// What kind of thing an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Event,
    KeyItem,
    GoMode,
}

/// A visible state change for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub identifier: String,
    pub obtained: bool,
    /// Icon variant, only for entities with more than one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
    /// RFC 3339 timestamp of the change.
    pub changed_at: String,
}

/// Current state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub identifier: String,
    pub kind: EntityKind,
    pub obtained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: EntityKind,
    obtained: bool,
}

/// Obtained flags for every tracked identifier.
///
/// The identifier set is fixed at construction; every entry starts `false`.
#[derive(Debug, Clone)]
pub struct TrackerState {
    entries: BTreeMap<&'static str, Entry>,
    moonstone: MoonstoneStage,
    pending: Vec<StateChange>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerState {
    pub fn new() -> Self {
        let characters = Character::ALL
            .iter()
            .map(|c| (c.identifier(), EntityKind::Character));
        let events = EVENT_FLAGS.iter().map(|f| (f.identifier, EntityKind::Event));
        let items = KEY_ITEMS.iter().map(|i| (i.identifier, EntityKind::KeyItem));
        let go_mode = std::iter::once((GO_MODE, EntityKind::GoMode));

        let entries = characters
            .chain(events)
            .chain(items)
            .chain(go_mode)
            .map(|(id, kind)| {
                (
                    id,
                    Entry {
                        kind,
                        obtained: false,
                    },
                )
            })
            .collect();

        Self {
            entries,
            moonstone: MoonstoneStage::Missing,
            pending: Vec::new(),
        }
    }

    /// Every tracked identifier, in sorted order.
    #[cfg(test)]
    fn identifiers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Whether an entity is currently shown as obtained.
    ///
    /// Manual toggles and decoded state are indistinguishable here. Unknown
    /// identifiers read as not obtained.
    pub fn has_item(&self, identifier: &str) -> bool {
        self.entries
            .get(identifier)
            .is_some_and(|entry| entry.obtained)
    }

    pub fn moonstone_stage(&self) -> MoonstoneStage {
        self.moonstone
    }

    /// Set an entity's obtained flag, recording a change if it flipped.
    pub fn set(&mut self, identifier: &str, obtained: bool) -> Result<(), TrackerError> {
        if identifier == MOONSTONE {
            let stage = match (obtained, self.moonstone) {
                (false, _) => MoonstoneStage::Missing,
                (true, MoonstoneStage::Missing) => MoonstoneStage::Moonstone,
                (true, current) => current,
            };
            self.set_moonstone(stage);
            return Ok(());
        }

        let (id, entry) = self
            .entries
            .get_key_value(identifier)
            .map(|(id, entry)| (*id, *entry))
            .ok_or_else(|| TrackerError::UnknownIdentifier(identifier.to_string()))?;

        if entry.obtained != obtained {
            self.entries.insert(id, Entry { obtained, ..entry });
            self.record(id, obtained, None);
        }
        Ok(())
    }

    /// Move the moonstone to `stage`, recording a change if it differs.
    pub fn set_moonstone(&mut self, stage: MoonstoneStage) {
        if self.moonstone == stage {
            return;
        }
        self.moonstone = stage;
        if let Some(entry) = self.entries.get_mut(MOONSTONE) {
            entry.obtained = stage.obtained();
        }
        self.record(MOONSTONE, stage.obtained(), Some(stage.art()));
    }

    /// Apply a manual click.
    ///
    /// The moonstone cycles through its three stages; everything else flips.
    /// Returns the new obtained flag.
    pub fn toggle(&mut self, identifier: &str) -> Result<bool, TrackerError> {
        if identifier == MOONSTONE {
            let next = self.moonstone.next();
            self.set_moonstone(next);
            return Ok(next.obtained());
        }

        if !self.entries.contains_key(identifier) {
            return Err(TrackerError::UnknownIdentifier(identifier.to_string()));
        }
        let obtained = !self.has_item(identifier);
        self.set(identifier, obtained)?;
        Ok(obtained)
    }

    /// Mark characters from a decoded party segment.
    pub fn apply_party(&mut self, party: &PartyView) {
        for character in Character::ALL {
            self.mark(character.identifier(), party.has(character));
        }
    }

    /// Mark bosses and world-progress flags from the event segment.
    pub fn apply_events(&mut self, events: &SegmentBuffer) {
        for flag in EVENT_FLAGS {
            self.mark(flag.identifier, flag.evaluate(events));
        }
    }

    /// Resolve and mark every key item.
    pub fn apply_items(&mut self, ctx: &ResolveContext<'_>) {
        for (item, outcome) in resolve_all(ctx) {
            match outcome {
                ItemOutcome::Obtained(obtained) => self.mark(item.identifier, obtained),
                ItemOutcome::Moonstone(stage) => self.set_moonstone(stage),
            }
        }
    }

    /// Whether any go-mode item set is fully obtained.
    pub fn go_mode(&self) -> bool {
        GO_MODE_SETS
            .iter()
            .any(|set| set.iter().all(|id| self.has_item(id)))
    }

    /// Recompute the go-mode entity from the current obtained state.
    pub fn update_go_mode(&mut self) {
        let go_mode = self.go_mode();
        self.mark(GO_MODE, go_mode);
    }

    /// Drain changes recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.pending)
    }

    /// Current state of every entity.
    pub fn snapshot(&self) -> Vec<EntityState> {
        self.entries
            .iter()
            .map(|(id, entry)| EntityState {
                identifier: id.to_string(),
                kind: entry.kind,
                obtained: entry.obtained,
                art: (*id == MOONSTONE).then(|| self.moonstone.art().to_string()),
            })
            .collect()
    }

    // Identifiers passed here come from the static tables the store was built from.
    fn mark(&mut self, identifier: &'static str, obtained: bool) {
        if let Err(e) = self.set(identifier, obtained) {
            tracing::warn!("{}", e);
        }
    }

    fn record(&mut self, identifier: &str, obtained: bool, art: Option<&str>) {
        tracing::debug!("{} -> {}", identifier, obtained);
        self.pending.push(StateChange {
            identifier: identifier.to_string(),
            obtained,
            art: art.map(str::to_string),
            changed_at: Utc::now().to_rfc3339(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_items(ids: &[&str]) -> TrackerState {
        let mut state = TrackerState::new();
        for id in ids {
            state.set(id, true).unwrap();
        }
        state.take_changes();
        state
    }

    #[test]
    fn test_all_identifiers_start_unobtained() {
        let state = TrackerState::new();
        let count = state.identifiers().count();
        assert_eq!(count, 7 + EVENT_FLAGS.len() + KEY_ITEMS.len() + 1);
        assert!(state.identifiers().all(|id| !state.has_item(id)));
        assert_eq!(state.moonstone_stage(), MoonstoneStage::Missing);
    }

    #[test]
    fn test_set_records_only_real_changes() {
        let mut state = TrackerState::new();
        state.set("pendant", true).unwrap();
        state.set("pendant", true).unwrap();
        state.set("Crono", false).unwrap();

        let changes = state.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].identifier, "pendant");
        assert!(changes[0].obtained);
        assert!(changes[0].art.is_none());
        assert!(state.take_changes().is_empty());
    }

    #[test]
    fn test_unknown_identifier_is_rejected() {
        let mut state = TrackerState::new();
        assert!(matches!(
            state.toggle("masamune2"),
            Err(TrackerError::UnknownIdentifier(_))
        ));
        assert!(state.set("nope", true).is_err());
        assert!(!state.has_item("nope"));
    }

    #[test]
    fn test_toggle_flips_two_state_entities() {
        let mut state = TrackerState::new();
        assert!(state.toggle("golem").unwrap());
        assert!(state.has_item("golem"));
        assert!(!state.toggle("golem").unwrap());
        assert!(!state.has_item("golem"));
        assert_eq!(state.take_changes().len(), 2);
    }

    #[test]
    fn test_toggle_cycles_moonstone_stages() {
        let mut state = TrackerState::new();

        assert!(state.toggle(MOONSTONE).unwrap());
        assert_eq!(state.moonstone_stage(), MoonstoneStage::Moonstone);
        assert!(state.toggle(MOONSTONE).unwrap());
        assert_eq!(state.moonstone_stage(), MoonstoneStage::Sunstone);
        assert!(state.has_item(MOONSTONE));
        assert!(!state.toggle(MOONSTONE).unwrap());
        assert_eq!(state.moonstone_stage(), MoonstoneStage::Missing);

        let arts: Vec<_> = state
            .take_changes()
            .into_iter()
            .map(|c| c.art.unwrap())
            .collect();
        assert_eq!(arts, vec!["moonstone", "sunstone", "moonstone"]);
    }

    #[test]
    fn test_set_moonstone_true_keeps_sunstone() {
        let mut state = TrackerState::new();
        state.set_moonstone(MoonstoneStage::Sunstone);
        state.set(MOONSTONE, true).unwrap();
        assert_eq!(state.moonstone_stage(), MoonstoneStage::Sunstone);
        state.set(MOONSTONE, false).unwrap();
        assert_eq!(state.moonstone_stage(), MoonstoneStage::Missing);
    }

    #[test]
    fn test_go_mode_each_set() {
        for set in GO_MODE_SETS {
            let state = with_items(&set);
            assert!(state.go_mode(), "{:?} should unlock go mode", set);
        }
    }

    #[test]
    fn test_go_mode_false_for_proper_subsets() {
        for set in GO_MODE_SETS {
            for skip in 0..set.len() {
                let partial: Vec<_> = set
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != skip)
                    .map(|(_, id)| *id)
                    .collect();
                assert!(!with_items(&partial).go_mode(), "{:?}", partial);
            }
        }
        // Two items from every set but no complete set
        let mixed = with_items(&[
            "gatekey", "dreamstone", "pendant", "clone", "Frog", "benthilt",
        ]);
        assert!(!mixed.go_mode());
    }

    #[test]
    fn test_go_mode_uses_manual_toggles() {
        let mut state = TrackerState::new();
        for id in ["pendant", "clone", "ctrigger"] {
            state.toggle(id).unwrap();
        }
        state.update_go_mode();
        assert!(state.has_item(GO_MODE));
    }

    #[test]
    fn test_snapshot_reports_moonstone_art() {
        let mut state = TrackerState::new();
        state.set_moonstone(MoonstoneStage::Sunstone);
        let snapshot = state.snapshot();
        let moonstone = snapshot
            .iter()
            .find(|e| e.identifier == MOONSTONE)
            .unwrap();
        assert!(moonstone.obtained);
        assert_eq!(moonstone.kind, EntityKind::KeyItem);
        assert_eq!(moonstone.art.as_deref(), Some("sunstone"));
        assert!(snapshot
            .iter()
            .filter(|e| e.identifier != MOONSTONE)
            .all(|e| e.art.is_none()));
    }

    #[test]
    fn test_state_change_json_shape() {
        let mut state = TrackerState::new();
        state.set("Marle", true).unwrap();
        let change = state.take_changes().remove(0);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["identifier"], "Marle");
        assert_eq!(json["obtained"], true);
        assert!(json.get("art").is_none());
        assert!(json["changed_at"].as_str().unwrap().contains('T'));
    }
}
