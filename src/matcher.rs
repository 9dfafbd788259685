//! The match seam.
//!
//! The engine does not own a rule matcher; it hands every working-memory
//! delta to a [`Matcher`] implementation and consumes the assertions and
//! retractions it returns. Tokens identify firings across the seam so the
//! matcher never sees engine-internal instantiation ids.

use crate::pref::PreferenceKind;
use crate::symbol::{SymbolId, SymbolTable};
use crate::wme::WmeSnapshot;

/// Working-memory changes accumulated since the previous flush.
#[derive(Debug, Clone, Default)]
pub struct WmeBatch {
    pub added: Vec<WmeSnapshot>,
    pub removed: Vec<WmeSnapshot>,
}

impl WmeBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// One preference a firing wants asserted.
#[derive(Debug, Clone, Copy)]
pub struct PreferenceSpec {
    pub kind: PreferenceKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
    pub o_supported: bool,
}

/// One new rule firing.
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Matcher-chosen identity for this firing; retractions quote it back.
    pub token: u64,
    pub match_goal: Option<SymbolId>,
    pub preferences: Vec<PreferenceSpec>,
}

/// What the matcher wants done after seeing a batch.
#[derive(Debug, Clone, Default)]
pub struct MatchOutput {
    pub assertions: Vec<Assertion>,
    /// Tokens of firings whose conditions no longer hold.
    pub retractions: Vec<u64>,
}

impl MatchOutput {
    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty() && self.retractions.is_empty()
    }
}

/// A rule matcher observing working memory through flush batches.
///
/// The symbol table is passed mutably so a matcher can intern constants for
/// the preferences it builds.
pub trait Matcher {
    fn update(&mut self, batch: &WmeBatch, syms: &mut SymbolTable) -> MatchOutput;
}

/// Matcher that never fires. The default when no rules are loaded.
#[derive(Debug, Default)]
pub struct NullMatcher;

impl Matcher for NullMatcher {
    fn update(&mut self, _batch: &WmeBatch, _syms: &mut SymbolTable) -> MatchOutput {
        MatchOutput::default()
    }
}
