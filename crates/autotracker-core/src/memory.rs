//! Decoding of raw SNES memory windows.
//!
//! The tracker polls four fixed windows ("segments") every cycle. Each reply is
//! held in a [`SegmentBuffer`], which is the only place bytes are read from, so
//! every value handed to decoding logic is already an unsigned 0-255 byte.
//!
//! | Segment | Bridge address | Length | Contents |
//! |---------|----------------|--------|----------|
//! | Party | `0xF52980` | `0x09` | character IDs, `0x80` = empty |
//! | Equipment | `0xF52600` | `0x230` | 7 records of `0x50` bytes |
//! | Events | `0xF60000` | `0x200` | flag bytes for RAM `0x7F0000..` |
//! | Inventory | `0xF52400` | `0xF2` | unordered item values |

use std::fmt;

use serde::{Deserialize, Serialize};

/// RAM address that maps to offset 0 of the event segment.
pub const EVENT_BASE_ADDRESS: u32 = 0x7F0000;

/// Number of party and reserve slots in the party segment.
pub const PARTY_SLOTS: usize = 9;

/// Party slot value meaning "nobody here".
pub const EMPTY_PARTY_SLOT: u8 = 0x80;

/// Size of one character record in the equipment segment.
pub const EQUIP_RECORD_SIZE: usize = 0x50;

/// Number of character records scanned for equipped items.
pub const EQUIP_SLOTS: usize = 7;

/// One of the four memory windows polled each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Party,
    Equipment,
    Events,
    Inventory,
}

impl Segment {
    /// Read order within one polling cycle.
    pub const CYCLE: [Segment; 4] = [
        Segment::Party,
        Segment::Equipment,
        Segment::Events,
        Segment::Inventory,
    ];

    /// Address of the window in the bridge's SNES address space.
    pub fn address(self) -> u32 {
        match self {
            Segment::Party => 0xF52980,
            Segment::Equipment => 0xF52600,
            Segment::Events => 0xF60000,
            Segment::Inventory => 0xF52400,
        }
    }

    /// Number of bytes requested for the window.
    pub fn size(self) -> usize {
        match self {
            Segment::Party => PARTY_SLOTS,
            Segment::Equipment => 0x230,
            Segment::Events => 0x200,
            Segment::Inventory => 0xF2,
        }
    }

    /// The segment read after this one, or `None` at the end of a cycle.
    pub fn next(self) -> Option<Segment> {
        match self {
            Segment::Party => Some(Segment::Equipment),
            Segment::Equipment => Some(Segment::Events),
            Segment::Events => Some(Segment::Inventory),
            Segment::Inventory => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Segment::Party => "party",
            Segment::Equipment => "equipment",
            Segment::Events => "events",
            Segment::Inventory => "inventory",
        };
        f.write_str(name)
    }
}

/// Bytes of one memory window, replaced wholesale on every read.
///
/// Out-of-range reads yield `0`, which every decoder treats as "nothing set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentBuffer {
    bytes: Vec<u8>,
}

impl SegmentBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Unsigned byte at `offset`, or `0` past the end.
    #[must_use]
    pub fn byte(&self, offset: usize) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether any byte in the buffer equals `value`.
    pub fn contains(&self, value: u8) -> bool {
        self.bytes.contains(&value)
    }
}

impl From<Vec<u8>> for SegmentBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Playable characters, indexed by their in-game ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Character {
    Crono,
    Marle,
    Lucca,
    Robo,
    Frog,
    Ayla,
    Magus,
}

impl Character {
    pub const ALL: [Character; 7] = [
        Character::Crono,
        Character::Marle,
        Character::Lucca,
        Character::Robo,
        Character::Frog,
        Character::Ayla,
        Character::Magus,
    ];

    /// In-game character ID.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Tracker identifier of the character's icon.
    pub fn identifier(self) -> &'static str {
        match self {
            Character::Crono => "Crono",
            Character::Marle => "Marle",
            Character::Lucca => "Lucca",
            Character::Robo => "Robo",
            Character::Frog => "Frog",
            Character::Ayla => "Ayla",
            Character::Magus => "Magus",
        }
    }
}

/// Decoded party segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartyView {
    mask: u8,
    in_game: bool,
}

impl PartyView {
    /// Bit `n` is set when character ID `n` occupies any slot.
    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Whether a save is loaded. Everything else is skipped while this is false.
    pub fn in_game(&self) -> bool {
        self.in_game
    }

    pub fn has(&self, character: Character) -> bool {
        self.mask & (1 << character.id()) != 0
    }
}

/// Decode the party segment into a presence mask and the in-game heuristic.
///
/// Before a save is loaded the first two slots both read `0` (Crono twice),
/// which cannot happen in a real party.
pub fn decode_party(party: &SegmentBuffer) -> PartyView {
    let in_game = !(party.byte(0) == 0 && party.byte(1) == 0);
    if !in_game {
        return PartyView::default();
    }

    let mut mask = 0u8;
    for slot in 0..PARTY_SLOTS {
        let id = party.byte(slot);
        if id == EMPTY_PARTY_SLOT {
            continue;
        }
        if usize::from(id) >= Character::ALL.len() {
            tracing::debug!("Ignoring unknown character id {:#04x} in party slot {}", id, slot);
            continue;
        }
        mask |= 1 << id;
    }

    PartyView { mask, in_game }
}

/// Which equipment byte of a character record an item occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Accessory,
}

impl EquipSlot {
    /// Offset of the slot within a character record.
    pub fn offset(self) -> usize {
        match self {
            EquipSlot::Weapon => 0x29,
            EquipSlot::Accessory => 0x2A,
        }
    }
}

/// Whether any of the seven character records has `value` in `slot`.
///
/// All records are scanned regardless of who is in the party, so duplicate
/// character seeds are covered.
pub fn equipped_anywhere(equipment: &SegmentBuffer, slot: EquipSlot, value: u8) -> bool {
    (0..EQUIP_SLOTS)
        .any(|record| equipment.byte(record * EQUIP_RECORD_SIZE + slot.offset()) == value)
}

/// Translate a RAM address into an offset into the event segment.
pub fn event_offset(address: u32) -> Option<usize> {
    address
        .checked_sub(EVENT_BASE_ADDRESS)
        .map(|offset| offset as usize)
        .filter(|&offset| offset < Segment::Events.size())
}

/// Event byte stored at RAM `address`, or `0` if it lies outside the segment.
pub fn event_byte(events: &SegmentBuffer, address: u32) -> u8 {
    event_offset(address).map_or(0, |offset| events.byte(offset))
}

/// True when any bit of `mask` is set at RAM `address`.
pub fn event_flag_set(events: &SegmentBuffer, address: u32, mask: u8) -> bool {
    event_byte(events, address) & mask != 0
}

/// True when every bit of `mask` is clear at RAM `address`.
pub fn event_flag_cleared(events: &SegmentBuffer, address: u32, mask: u8) -> bool {
    event_byte(events, address) & mask == 0
}

/// Whether the inventory holds an item with this value.
pub fn inventory_contains(inventory: &SegmentBuffer, value: u8) -> bool {
    inventory.contains(value)
}
