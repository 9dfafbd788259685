//! Slots: the unit the decision procedure operates on.
//!
//! A slot collects every preference and installed WME sharing an
//! (id, attribute) pair. Context slots (a goal's `^operator`) hold at most one
//! installed WME; ordinary slots may hold many. A slot whose last preference
//! and WME have left is discarded at the end of the phase.

use std::num::NonZeroU64;

use crate::pref::{PrefId, PreferenceKind};
use crate::symbol::SymbolId;
use crate::wme::WmeId;

/// Handle for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotId(NonZeroU64);

impl SlotId {
    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SlotId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// Preferences and installed WMEs for one (id, attribute) pair.
#[derive(Debug)]
pub struct Slot {
    pub id: SymbolId,
    pub attr: SymbolId,
    /// Per-kind preference lists, in assertion order.
    pub prefs: [Vec<PrefId>; PreferenceKind::COUNT],
    /// Every preference in the slot, in assertion order.
    pub all_prefs: Vec<PrefId>,
    /// Installed WMEs. Invariant (2): at most one for a context slot.
    pub wmes: Vec<WmeId>,
    /// Acceptable-preference WMEs (context slots only).
    pub acceptable_wmes: Vec<WmeId>,
    /// Attribute impasse hanging off this slot, if any.
    pub impasse: Option<SymbolId>,
    /// Goal-decision slot (a goal's `^operator`).
    pub is_context: bool,
    /// Preference set changed since the slot was last decided.
    pub changed: bool,
    /// Acceptable/require set changed since the last reconcile (context slots).
    pub acceptable_changed: bool,
    /// Queued for discard once empty.
    pub marked_for_deletion: bool,
}

impl Slot {
    pub(crate) fn new(id: SymbolId, attr: SymbolId, is_context: bool) -> Self {
        Self {
            id,
            attr,
            prefs: Default::default(),
            all_prefs: Vec::new(),
            wmes: Vec::new(),
            acceptable_wmes: Vec::new(),
            impasse: None,
            is_context,
            changed: false,
            acceptable_changed: false,
            marked_for_deletion: false,
        }
    }

    /// Preferences of one kind, in assertion order.
    pub fn prefs_of(&self, kind: PreferenceKind) -> &[PrefId] {
        &self.prefs[kind.index()]
    }

    pub fn has_prefs_of(&self, kind: PreferenceKind) -> bool {
        !self.prefs[kind.index()].is_empty()
    }

    /// Nothing left: safe to discard.
    pub fn is_empty(&self) -> bool {
        self.all_prefs.is_empty()
            && self.wmes.is_empty()
            && self.acceptable_wmes.is_empty()
            && self.impasse.is_none()
    }
}
