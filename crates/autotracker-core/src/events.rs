//! Boss kills and world-progress flags read from the event segment.

use crate::memory::{event_flag_cleared, event_flag_set, SegmentBuffer};

/// How a flag byte is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagTest {
    /// Obtained when any bit of the mask is set.
    Set,
    /// Obtained when every bit of the mask is clear.
    ///
    /// No entry in [`EVENT_FLAGS`] uses this today; it covers flags the game
    /// clears once an event is done.
    Cleared,
}

/// A tracker entity driven by one event flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFlag {
    pub identifier: &'static str,
    /// RAM address in the `0x7F0000` bank.
    pub address: u32,
    pub mask: u8,
    pub test: FlagTest,
}

impl EventFlag {
    const fn set(identifier: &'static str, address: u32, mask: u8) -> Self {
        Self {
            identifier,
            address,
            mask,
            test: FlagTest::Set,
        }
    }

    /// Evaluate the flag against the latest event segment.
    pub fn evaluate(&self, events: &SegmentBuffer) -> bool {
        match self.test {
            FlagTest::Set => event_flag_set(events, self.address, self.mask),
            FlagTest::Cleared => event_flag_cleared(events, self.address, self.mask),
        }
    }
}

/// Every entity resolved purely from event memory, grouped by era.
pub const EVENT_FLAGS: &[EventFlag] = &[
    // Prehistory
    EventFlag::set("nizbel", 0x7F0105, 0x20),
    EventFlag::set("blacktyrano", 0x7F00EC, 0x80),
    // Dark Ages
    EventFlag::set("gigagaia", 0x7F000D, 0x01),
    EventFlag::set("golem", 0x7F0105, 0x80),
    // Middle Ages
    EventFlag::set("yakra", 0x7F000D, 0x01),
    EventFlag::set("masamune", 0x7F00F3, 0x20),
    EventFlag::set("retinite", 0x7F01AD, 0x04),
    EventFlag::set("rusttyrano", 0x7F01D2, 0x40),
    EventFlag::set("magusboss", 0x7F01FF, 0x04),
    // Set when the Zombor fight starts; the game has no flag for winning it.
    EventFlag::set("zombor", 0x7F0101, 0x02),
    // Present
    EventFlag::set("heckran", 0x7F01A3, 0x08),
    EventFlag::set("dragontank", 0x7F0198, 0x08),
    EventFlag::set("yakraxiii", 0x7F0050, 0x40),
    // Future
    EventFlag::set("guardian", 0x7F00EC, 0x01),
    EventFlag::set("rseries", 0x7F0103, 0x40),
    EventFlag::set("sonofsun", 0x7F013A, 0x02),
    EventFlag::set("motherbrain", 0x7F013B, 0x10),
    // Completes at the end of Death Peak rather than on the Zeal 2 kill.
    EventFlag::set("zeal", 0x7F0067, 0x07),
    // Melchior reforging the Masamune.
    EventFlag::set("melchior", 0x7F0103, 0x02),
    // Any character other than Magus able to cast magic.
    EventFlag::set("magic", 0x7F01E0, 0x3F),
];

/// Look up an event-driven entity by identifier.
pub fn find(identifier: &str) -> Option<&'static EventFlag> {
    EVENT_FLAGS.iter().find(|flag| flag.identifier == identifier)
}
