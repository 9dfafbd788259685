//! Preferences and the instantiations that assert them.
//!
//! A preference is a typed assertion about a candidate value for a slot,
//! produced by a rule firing (an instantiation). Preferences are reference
//! counted: the asserting instantiation, the slot holding them, and every WME
//! they justify each own one reference. Retracting an instantiation removes
//! its i-supported preferences from their slots atomically; o-supported
//! preferences outlive the instantiation and stay with the slot.

use std::collections::HashMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::slot::SlotId;
use crate::symbol::SymbolId;

/// The thirteen preference kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferenceKind {
    Require,
    Acceptable,
    Reject,
    Prohibit,
    Reconsider,
    Best,
    Worst,
    UnaryIndifferent,
    UnaryParallel,
    BinaryIndifferent,
    BinaryParallel,
    Better,
    Worse,
}

impl PreferenceKind {
    /// Number of kinds; sizes the per-slot preference lists.
    pub const COUNT: usize = 13;

    pub const ALL: [PreferenceKind; Self::COUNT] = [
        PreferenceKind::Require,
        PreferenceKind::Acceptable,
        PreferenceKind::Reject,
        PreferenceKind::Prohibit,
        PreferenceKind::Reconsider,
        PreferenceKind::Best,
        PreferenceKind::Worst,
        PreferenceKind::UnaryIndifferent,
        PreferenceKind::UnaryParallel,
        PreferenceKind::BinaryIndifferent,
        PreferenceKind::BinaryParallel,
        PreferenceKind::Better,
        PreferenceKind::Worse,
    ];

    /// Index into the per-slot preference lists.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Binary kinds compare the value against a referent.
    pub fn requires_referent(self) -> bool {
        matches!(
            self,
            PreferenceKind::BinaryIndifferent
                | PreferenceKind::BinaryParallel
                | PreferenceKind::Better
                | PreferenceKind::Worse
        )
    }
}

impl std::fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PreferenceKind::Require => "require",
            PreferenceKind::Acceptable => "acceptable",
            PreferenceKind::Reject => "reject",
            PreferenceKind::Prohibit => "prohibit",
            PreferenceKind::Reconsider => "reconsider",
            PreferenceKind::Best => "best",
            PreferenceKind::Worst => "worst",
            PreferenceKind::UnaryIndifferent => "unary-indifferent",
            PreferenceKind::UnaryParallel => "unary-parallel",
            PreferenceKind::BinaryIndifferent => "binary-indifferent",
            PreferenceKind::BinaryParallel => "binary-parallel",
            PreferenceKind::Better => "better",
            PreferenceKind::Worse => "worse",
        };
        write!(f, "{name}")
    }
}

/// Handle for a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PrefId(NonZeroU64);

impl PrefId {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// A typed value-assertion for one slot.
#[derive(Debug, Clone)]
pub struct Preference {
    pub kind: PreferenceKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    /// Present for binary kinds; also carries the weight of a
    /// numeric-indifferent preference.
    pub referent: Option<SymbolId>,
    pub o_supported: bool,
    /// Owning instantiation; cleared when an o-supported preference outlives it.
    pub inst: Option<InstId>,
    /// Slot currently holding this preference.
    pub slot: Option<SlotId>,
    pub reference_count: u32,
}

/// Arena of live preferences.
pub struct PrefStore {
    prefs: HashMap<PrefId, Preference>,
    next: u64,
}

impl PrefStore {
    pub fn new() -> Self {
        Self {
            prefs: HashMap::new(),
            next: 1,
        }
    }

    /// Allocate with a reference count of zero; every holder acquires its own.
    pub fn alloc(&mut self, pref: Preference) -> PrefId {
        let raw = self.next;
        self.next += 1;
        let Some(id) = NonZeroU64::new(raw).map(PrefId) else {
            unreachable!("preference ids start at 1");
        };
        self.prefs.insert(id, pref);
        id
    }

    pub fn get(&self, id: PrefId) -> Option<&Preference> {
        self.prefs.get(&id)
    }

    pub fn get_mut(&mut self, id: PrefId) -> Option<&mut Preference> {
        self.prefs.get_mut(&id)
    }

    pub fn acquire(&mut self, id: PrefId) {
        if let Some(p) = self.prefs.get_mut(&id) {
            p.reference_count += 1;
        }
    }

    /// Release one reference. Returns the preference when the last reference
    /// drops, so the caller can release its symbol references.
    pub fn release(&mut self, id: PrefId) -> Option<Preference> {
        let p = self.prefs.get_mut(&id)?;
        p.reference_count = p.reference_count.saturating_sub(1);
        if p.reference_count == 0 {
            self.prefs.remove(&id)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.prefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefs.is_empty()
    }
}

impl Default for PrefStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for an instantiation (one rule firing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InstId(NonZeroU64);

impl InstId {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// One rule firing: the preferences it asserted, and the goal it matched in.
#[derive(Debug, Clone)]
pub struct Instantiation {
    pub preferences: Vec<PrefId>,
    pub match_goal: Option<SymbolId>,
}

/// Arena of live instantiations.
pub struct InstStore {
    insts: HashMap<InstId, Instantiation>,
    next: u64,
}

impl InstStore {
    pub fn new() -> Self {
        Self {
            insts: HashMap::new(),
            next: 1,
        }
    }

    pub fn alloc(&mut self, inst: Instantiation) -> InstId {
        let raw = self.next;
        self.next += 1;
        let Some(id) = NonZeroU64::new(raw).map(InstId) else {
            unreachable!("instantiation ids start at 1");
        };
        self.insts.insert(id, inst);
        id
    }

    pub fn get(&self, id: InstId) -> Option<&Instantiation> {
        self.insts.get(&id)
    }

    pub fn get_mut(&mut self, id: InstId) -> Option<&mut Instantiation> {
        self.insts.get_mut(&id)
    }

    pub fn remove(&mut self, id: InstId) -> Option<Instantiation> {
        self.insts.remove(&id)
    }

    /// Instantiations matched in the given goal (used when the goal closes).
    pub fn matched_in(&self, goal: SymbolId) -> Vec<InstId> {
        self.insts
            .iter()
            .filter(|(_, inst)| inst.match_goal == Some(goal))
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

impl Default for InstStore {
    fn default() -> Self {
        Self::new()
    }
}
