//! Working-memory elements.
//!
//! A WME is an id-attribute-value triple the agent currently believes, tagged
//! with a unique timetag. Every WME has exactly one home (a slot's value list,
//! a context slot's acceptable-preference list, an identifier's input list, or
//! a goal's impasse-marker list); the home determines who removes it.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::pref::PrefId;
use crate::slot::SlotId;
use crate::symbol::SymbolId;

/// Handle for a working-memory element, backed by its timetag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WmeId(NonZeroU64);

impl WmeId {
    pub fn new(timetag: u64) -> Option<Self> {
        NonZeroU64::new(timetag).map(WmeId)
    }

    /// The timetag this handle wraps.
    pub fn timetag(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for WmeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wme:{}", self.0)
    }
}

/// Where a WME lives, and therefore who tears it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmeHome {
    /// Installed value of a slot.
    Slot(SlotId),
    /// Acceptable-preference WME of a context slot.
    Acceptable(SlotId),
    /// Inserted by the I/O adapter; listed on the identifier.
    Input,
    /// Fixed impasse marker of a goal/impasse frame.
    ImpasseMarker(SymbolId),
}

/// A working-memory element.
#[derive(Debug, Clone)]
pub struct Wme {
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    /// Set on acceptable-preference WMEs of context slots.
    pub acceptable: bool,
    pub timetag: u64,
    /// Holds the arena entry alive: 1 for working memory itself, plus 1 per
    /// goal-dependency set the WME sits in.
    pub reference_count: u32,
    /// The preference that justified installing this WME, if any.
    pub preference: Option<PrefId>,
    /// Goal whose dependency set this WME belongs to.
    pub gds_goal: Option<SymbolId>,
    pub home: WmeHome,
    /// Set once the WME has left working memory (awaiting deallocation).
    pub removed: bool,
}

/// Plain-data view of a WME handed to hooks, adapters, and the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WmeSnapshot {
    pub timetag: u64,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub acceptable: bool,
}

impl Wme {
    pub fn snapshot(&self) -> WmeSnapshot {
        WmeSnapshot {
            timetag: self.timetag,
            id: self.id,
            attr: self.attr,
            value: self.value,
            acceptable: self.acceptable,
        }
    }
}
