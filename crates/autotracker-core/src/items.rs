//! Key item registry and per-cycle resolution.
//!
//! Many key items leave the inventory once used or equipped, so inventory
//! presence alone is not enough. Each item carries a [`Resolution`] strategy
//! saying which other segment can prove it was obtained:
//!
//! - **Plain**: inventory only.
//! - **TurnIn**: inventory, or an event flag set when the item is handed over.
//! - **EquipCheck**: inventory, or equipped by any of the seven characters.
//! - **Special**: the moonstone, which also has a charged (sunstone) stage.

use serde::{Deserialize, Serialize};

use crate::memory::{
    equipped_anywhere, event_flag_set, inventory_contains, EquipSlot, SegmentBuffer,
};

/// Event byte holding both moonstone flags.
pub const MOONSTONE_ADDRESS: u32 = 0x7F013A;

/// Goes high when the charged sunstone is picked up.
pub const SUNSTONE_MASK: u8 = 0x40;

/// Goes high when the moonstone is left at Sun Keep.
pub const MOONSTONE_DROPPED_MASK: u8 = 0x04;

/// Items that need bespoke resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialItem {
    Moonstone,
}

/// How an item's obtained state is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Plain,
    TurnIn { address: u32, mask: u8 },
    EquipCheck { slot: EquipSlot },
    Special(SpecialItem),
}

/// A key item shown on the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyItem {
    pub identifier: &'static str,
    /// Item value as stored in inventory and equipment memory.
    pub value: u8,
    pub resolution: Resolution,
}

impl KeyItem {
    const fn plain(identifier: &'static str, value: u8) -> Self {
        Self {
            identifier,
            value,
            resolution: Resolution::Plain,
        }
    }

    const fn turn_in(identifier: &'static str, value: u8, address: u32, mask: u8) -> Self {
        Self {
            identifier,
            value,
            resolution: Resolution::TurnIn { address, mask },
        }
    }

    const fn equip(identifier: &'static str, value: u8, slot: EquipSlot) -> Self {
        Self {
            identifier,
            value,
            resolution: Resolution::EquipCheck { slot },
        }
    }
}

pub const KEY_ITEMS: &[KeyItem] = &[
    KeyItem::turn_in("bentsword", 0x50, 0x7F0103, 0x02),
    KeyItem::turn_in("benthilt", 0x51, 0x7F0103, 0x02),
    KeyItem::equip("heromedal", 0xB3, EquipSlot::Accessory),
    KeyItem::equip("roboribbon", 0xB8, EquipSlot::Accessory),
    KeyItem::plain("pendant", 0xD6),
    KeyItem::plain("gatekey", 0xD7),
    KeyItem::plain("prismshard", 0xD8),
    KeyItem::plain("ctrigger", 0xD9),
    KeyItem::equip("grandleon", 0x42, EquipSlot::Weapon),
    KeyItem::turn_in("jerky", 0xDB, 0x7F01D2, 0x04),
    KeyItem::plain("dreamstone", 0xDC),
    KeyItem {
        identifier: "moonstone",
        value: 0xDE,
        resolution: Resolution::Special(SpecialItem::Moonstone),
    },
    KeyItem::turn_in("rubyknife", 0xE0, 0x7F00F4, 0x80),
    KeyItem::plain("clone", 0xE2),
    KeyItem::turn_in("tomapop", 0xE3, 0x7F01A3, 0x80),
];

/// Look up a key item by identifier.
pub fn find(identifier: &str) -> Option<&'static KeyItem> {
    KEY_ITEMS.iter().find(|item| item.identifier == identifier)
}

/// Progress of the moonstone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoonstoneStage {
    #[default]
    Missing,
    Moonstone,
    Sunstone,
}

impl MoonstoneStage {
    pub fn obtained(self) -> bool {
        !matches!(self, MoonstoneStage::Missing)
    }

    /// Which icon the rendering layer shows.
    pub fn art(self) -> &'static str {
        match self {
            MoonstoneStage::Sunstone => "sunstone",
            MoonstoneStage::Missing | MoonstoneStage::Moonstone => "moonstone",
        }
    }

    /// Manual click cycle: missing, moonstone, sunstone, missing.
    pub fn next(self) -> Self {
        match self {
            MoonstoneStage::Missing => MoonstoneStage::Moonstone,
            MoonstoneStage::Moonstone => MoonstoneStage::Sunstone,
            MoonstoneStage::Sunstone => MoonstoneStage::Missing,
        }
    }
}

/// The result of resolving one key item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Obtained(bool),
    Moonstone(MoonstoneStage),
}

impl ItemOutcome {
    pub fn obtained(self) -> bool {
        match self {
            ItemOutcome::Obtained(obtained) => obtained,
            ItemOutcome::Moonstone(stage) => stage.obtained(),
        }
    }
}

/// The segments one resolution pass reads.
///
/// Segments that have not been read yet are passed as empty buffers.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub inventory: &'a SegmentBuffer,
    pub equipment: &'a SegmentBuffer,
    pub events: &'a SegmentBuffer,
}

/// Resolve one key item against the latest memory.
///
/// The inventory scan runs first; every strategy can only add to it.
pub fn resolve(item: &KeyItem, ctx: &ResolveContext<'_>) -> ItemOutcome {
    let found = inventory_contains(ctx.inventory, item.value);

    match item.resolution {
        Resolution::Plain => ItemOutcome::Obtained(found),
        Resolution::TurnIn { address, mask } => {
            ItemOutcome::Obtained(found || event_flag_set(ctx.events, address, mask))
        }
        Resolution::EquipCheck { slot } => {
            ItemOutcome::Obtained(found || equipped_anywhere(ctx.equipment, slot, item.value))
        }
        Resolution::Special(SpecialItem::Moonstone) => {
            ItemOutcome::Moonstone(resolve_moonstone(found, ctx.events))
        }
    }
}

fn resolve_moonstone(found: bool, events: &SegmentBuffer) -> MoonstoneStage {
    if event_flag_set(events, MOONSTONE_ADDRESS, SUNSTONE_MASK) {
        MoonstoneStage::Sunstone
    } else if found || event_flag_set(events, MOONSTONE_ADDRESS, MOONSTONE_DROPPED_MASK) {
        MoonstoneStage::Moonstone
    } else {
        MoonstoneStage::Missing
    }
}

/// Resolve every registered key item.
pub fn resolve_all(ctx: &ResolveContext<'_>) -> Vec<(&'static KeyItem, ItemOutcome)> {
    KEY_ITEMS.iter().map(|item| (item, resolve(item, ctx))).collect()
}
