//! The agent facade.
//!
//! [`Agent`] owns every store (symbols, working memory, preferences,
//! instantiations, link state, goal stack) plus the matcher and I/O seams,
//! and exposes the public API hosts program against. Internally, subsystem
//! operations are free functions over a [`Ctx`] of disjoint mutable borrows,
//! so the borrow checker sees exactly which stores each operation touches.

use std::collections::{HashMap, VecDeque};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::Options;
use crate::decide::{self, ConsiderMode, Decision, ImpasseKind};
use crate::error::{DecideError, SiaResult};
use crate::events::{Callbacks, Event, EventKind};
use crate::gc::{self, LinkState};
use crate::goal::{self, ArchSymbols, ContextKind, GoalStack};
use crate::io::{InputContext, IoAdapter};
use crate::matcher::{MatchOutput, Matcher, NullMatcher, PreferenceSpec};
use crate::memory::{self, WorkingMemory};
use crate::pref::{InstId, InstStore, PrefStore};
use crate::scheduler::{RunState, RunStats};
use crate::symbol::{GoalLevel, SymbolId, SymbolTable, TOP_GOAL_LEVEL};
use crate::wme::{WmeId, WmeSnapshot};

/// Split borrows over the agent's stores, threaded through every subsystem
/// operation.
pub(crate) struct Ctx<'a> {
    pub(crate) syms: &'a mut SymbolTable,
    pub(crate) wm: &'a mut WorkingMemory,
    pub(crate) prefs: &'a mut PrefStore,
    pub(crate) insts: &'a mut InstStore,
    pub(crate) links: &'a mut LinkState,
    pub(crate) stack: &'a mut GoalStack,
    pub(crate) arch: &'a ArchSymbols,
    pub(crate) options: &'a Options,
    pub(crate) events: &'a mut Callbacks,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) run: &'a mut RunState,
}

/// A single symbolic decision agent.
///
/// Not `Send`: one agent belongs to one thread. Run several agents on
/// several threads if you need parallelism.
pub struct Agent {
    pub(crate) syms: SymbolTable,
    pub(crate) wm: WorkingMemory,
    pub(crate) prefs: PrefStore,
    pub(crate) insts: InstStore,
    pub(crate) links: LinkState,
    pub(crate) stack: GoalStack,
    pub(crate) arch: ArchSymbols,
    pub(crate) options: Options,
    pub(crate) events: Callbacks,
    pub(crate) rng: StdRng,
    pub(crate) run: RunState,
    pub(crate) matcher: Option<Box<dyn Matcher>>,
    pub(crate) io: Option<Box<dyn IoAdapter>>,
    /// Matcher output not yet turned into instantiations.
    pub(crate) pending_match: VecDeque<MatchOutput>,
    /// Matcher token to engine instantiation.
    pub(crate) inst_tokens: HashMap<u64, InstId>,
}

impl Agent {
    /// Create an agent with no rules (a [`NullMatcher`]) and a fresh top state.
    pub fn new() -> SiaResult<Self> {
        Self::with_matcher(Box::new(NullMatcher))
    }

    /// Create an agent driven by the given matcher.
    pub fn with_matcher(matcher: Box<dyn Matcher>) -> SiaResult<Self> {
        let mut syms = SymbolTable::new();
        let arch = ArchSymbols::new(&mut syms);
        let options = Options::new();
        let rng = StdRng::seed_from_u64(options.random_seed());
        let mut agent = Self {
            syms,
            wm: WorkingMemory::new(),
            prefs: PrefStore::new(),
            insts: InstStore::new(),
            links: LinkState::new(),
            stack: GoalStack::default(),
            arch,
            options,
            events: Callbacks::new(),
            rng,
            run: RunState::new(),
            matcher: Some(matcher),
            io: None,
            pending_match: VecDeque::new(),
            inst_tokens: HashMap::new(),
        };
        agent.bootstrap()?;
        Ok(agent)
    }

    /// Install the host's I/O adapter.
    pub fn set_io(&mut self, io: Box<dyn IoAdapter>) {
        self.io = Some(io);
    }

    /// Create the top state and commit it.
    fn bootstrap(&mut self) -> SiaResult<()> {
        goal::create_goal(
            &mut self.ctx(),
            None,
            ContextKind::State,
            ImpasseKind::None,
            &[],
        )?;
        self.flush()?;
        Ok(())
    }

    /// Tear down all state and start over with a fresh top state. Options
    /// and registered handlers survive; symbols and timetags do not.
    pub fn reinitialize(&mut self) -> SiaResult<()> {
        self.syms = SymbolTable::new();
        self.arch = ArchSymbols::new(&mut self.syms);
        self.wm = WorkingMemory::new();
        self.prefs = PrefStore::new();
        self.insts = InstStore::new();
        self.links = LinkState::new();
        self.stack = GoalStack::default();
        self.rng = StdRng::seed_from_u64(self.options.random_seed());
        self.run = RunState::new();
        self.pending_match.clear();
        self.inst_tokens.clear();
        self.bootstrap()
    }

    pub(crate) fn ctx(&mut self) -> Ctx<'_> {
        Ctx {
            syms: &mut self.syms,
            wm: &mut self.wm,
            prefs: &mut self.prefs,
            insts: &mut self.insts,
            links: &mut self.links,
            stack: &mut self.stack,
            arch: &self.arch,
            options: &self.options,
            events: &mut self.events,
            rng: &mut self.rng,
            run: &mut self.run,
        }
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    /// Halt the agent. Terminal until [`reinitialize`](Agent::reinitialize).
    pub fn halt(&mut self) {
        if self.run.halted {
            return;
        }
        self.run.halted = true;
        self.run.stop_with_reason("System halted.");
        self.events.fire(
            EventKind::AfterHalt,
            &Event::Halt {
                fatal: false,
                reason: "System halted.".to_string(),
            },
        );
    }

    /// Ask the current run to stop at the next phase boundary.
    pub fn stop(&mut self, reason: &str) {
        self.run.stop_with_reason(reason);
    }

    pub fn is_halted(&self) -> bool {
        self.run.halted
    }

    /// Why the last run stopped, if it stopped itself.
    pub fn stop_reason(&self) -> Option<&str> {
        self.run.stop_reason.as_deref()
    }

    // -----------------------------------------------------------------------
    // Options and hooks
    // -----------------------------------------------------------------------

    pub fn get_option(&self, name: &str) -> SiaResult<i64> {
        self.options.get(name)
    }

    /// Set a runtime option. Setting `random-seed` reseeds the selection RNG.
    pub fn set_option(&mut self, name: &str, value: i64) -> SiaResult<()> {
        self.options.set(name, value)?;
        if name == "random-seed" {
            self.rng = StdRng::seed_from_u64(value as u64);
        }
        self.events.fire(
            EventKind::ParamChanged,
            &Event::Param {
                name: name.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Register a lifecycle hook. One handler per kind; a second registration
    /// replaces the first.
    pub fn register_handler(&mut self, kind: EventKind, handler: Box<dyn FnMut(&Event)>) {
        self.events.register(kind, handler);
    }

    pub fn unregister_handler(&mut self, kind: EventKind) -> bool {
        self.events.unregister(kind)
    }

    // -----------------------------------------------------------------------
    // Symbols
    // -----------------------------------------------------------------------

    pub fn sym_constant(&mut self, name: &str) -> SymbolId {
        self.syms.sym_constant(name)
    }

    pub fn int_constant(&mut self, value: i64) -> SymbolId {
        self.syms.int_constant(value)
    }

    pub fn float_constant(&mut self, value: f64) -> SymbolId {
        self.syms.float_constant(value)
    }

    /// Mint an identifier at the top level.
    pub fn create_identifier(&mut self, letter: char) -> SymbolId {
        self.syms.make_identifier(letter, TOP_GOAL_LEVEL)
    }

    /// Mint an identifier at a specific goal level, as a matcher does for
    /// identifiers built by rule firings inside a subgoal.
    pub fn create_identifier_at(&mut self, letter: char, level: GoalLevel) -> SymbolId {
        self.syms.make_identifier(letter, level)
    }

    pub fn display(&self, id: SymbolId) -> String {
        self.syms.display(id)
    }

    // -----------------------------------------------------------------------
    // Preferences and instantiations
    // -----------------------------------------------------------------------

    /// Assert a rule firing by hand: its preferences land in their slots and
    /// take effect at the next flush. Most hosts go through a [`Matcher`]
    /// instead; this is the direct route for programmatic agents and tests.
    pub fn assert_instantiation(
        &mut self,
        match_goal: Option<SymbolId>,
        specs: &[PreferenceSpec],
    ) -> SiaResult<InstId> {
        memory::create_instantiation(&mut self.ctx(), match_goal, specs)
    }

    /// Retract a firing. Its i-supported preferences leave their slots;
    /// o-supported ones persist.
    pub fn retract_instantiation(&mut self, inst: InstId) -> SiaResult<()> {
        memory::retract_instantiation(&mut self.ctx(), inst)
    }

    /// Classify the preferences of slot `(id, attr)` as a fresh decision.
    pub fn resolve(&mut self, id: SymbolId, attr: SymbolId) -> SiaResult<Decision> {
        let slot = self.existing_slot(id, attr)?;
        decide::run_preference_semantics(&mut self.ctx(), slot, ConsiderMode::Decide)
    }

    /// Classify the preferences of slot `(id, attr)` without collapsing an
    /// all-indifferent candidate set to one winner.
    pub fn resolve_for_consistency(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
    ) -> SiaResult<Decision> {
        let slot = self.existing_slot(id, attr)?;
        decide::run_preference_semantics(&mut self.ctx(), slot, ConsiderMode::Consistency)
    }

    fn existing_slot(&self, id: SymbolId, attr: SymbolId) -> SiaResult<crate::slot::SlotId> {
        self.wm.find_slot(id, attr).ok_or_else(|| {
            DecideError::NoSuchSlot {
                id: self.syms.display(id),
                attr: self.syms.display(attr),
            }
            .into()
        })
    }

    // -----------------------------------------------------------------------
    // Working memory
    // -----------------------------------------------------------------------

    /// Commit buffered working-memory changes: promotions, demotions, GC,
    /// and one matcher update over the net delta. New firings queue for the
    /// next elaboration step.
    pub fn flush(&mut self) -> SiaResult<()> {
        let out = self.flush_collect()?;
        self.queue_match_output(out);
        Ok(())
    }

    /// Flush and hand the matcher's output back to the caller instead of
    /// queueing it. The scheduler inspects the output at phase boundaries.
    pub(crate) fn flush_collect(&mut self) -> SiaResult<MatchOutput> {
        let mut matcher = self
            .matcher
            .take()
            .unwrap_or_else(|| Box::new(NullMatcher));
        let result = gc::flush(&mut self.ctx(), matcher.as_mut());
        self.matcher = Some(matcher);
        result
    }

    /// Run `f` with input-phase capabilities, then commit. The programmatic
    /// alternative to an [`IoAdapter`] for hosts that drive input directly.
    pub fn manual_input<R>(
        &mut self,
        f: impl FnOnce(&mut InputContext<'_, '_>) -> SiaResult<R>,
    ) -> SiaResult<R> {
        let value = f(&mut InputContext {
            ctx: &mut self.ctx(),
        })?;
        self.flush()?;
        Ok(value)
    }

    /// Add a WME to a goal's dependency set. When any member is later
    /// removed, the goal and everything below it retract at the next
    /// decision phase.
    pub fn add_wme_to_gds(&mut self, goal: SymbolId, wme: WmeId) -> SiaResult<()> {
        goal::add_wme_to_gds(&mut self.ctx(), goal, wme)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The top state, present from construction until `reinitialize`.
    pub fn top_state(&self) -> Option<SymbolId> {
        self.stack.top
    }

    pub fn bottom_goal(&self) -> Option<SymbolId> {
        self.stack.bottom
    }

    /// Goals from the top state down.
    pub fn goal_stack(&self) -> Vec<SymbolId> {
        let mut out = Vec::new();
        let mut cur = self.stack.top;
        while let Some(g) = cur {
            out.push(g);
            cur = self
                .syms
                .id_data(g)
                .and_then(|d| d.frame.as_ref())
                .and_then(|f| f.lower_goal);
        }
        out
    }

    pub fn stack_depth(&self) -> GoalLevel {
        goal::stack_depth(&self.syms, &self.stack)
    }

    /// The impasse a goal was created to resolve.
    pub fn impasse_kind_of(&self, goal: SymbolId) -> Option<ImpasseKind> {
        self.syms
            .id_data(goal)
            .and_then(|d| d.frame.as_ref())
            .map(|f| f.impasse_kind)
    }

    /// The operator installed in a goal's context slot, if any.
    pub fn current_operator(&self, goal: SymbolId) -> Option<SymbolId> {
        let slot_id = self
            .syms
            .id_data(goal)
            .and_then(|d| d.frame.as_ref())
            .and_then(|f| f.operator_slot)?;
        let slot = self.wm.slot(slot_id)?;
        slot.wmes.first().and_then(|w| self.wm.wme(*w)).map(|w| w.value)
    }

    /// Is `(id ^attr value)` in working memory right now?
    pub fn wme_exists(&self, id: SymbolId, attr: SymbolId, value: SymbolId) -> bool {
        self.wm.contains(id, attr, value)
    }

    /// Snapshots of every WME whose identifier is `id`.
    pub fn wmes_of(&self, id: SymbolId) -> Vec<WmeSnapshot> {
        self.wm.wmes_of(id)
    }

    /// Installed values of slot `(id, attr)`, in installation order.
    pub fn slot_wme_values(&self, id: SymbolId, attr: SymbolId) -> Vec<SymbolId> {
        let Some(slot_id) = self.wm.find_slot(id, attr) else {
            return Vec::new();
        };
        let Some(slot) = self.wm.slot(slot_id) else {
            return Vec::new();
        };
        slot.wmes
            .iter()
            .filter_map(|w| self.wm.wme(*w))
            .map(|w| w.value)
            .collect()
    }

    /// The attribute impasse on slot `(id, attr)`, if one is raised.
    pub fn attribute_impasse(&self, id: SymbolId, attr: SymbolId) -> Option<SymbolId> {
        let slot_id = self.wm.find_slot(id, attr)?;
        self.wm.slot(slot_id)?.impasse
    }

    pub fn wme_count(&self) -> usize {
        self.wm.wme_count()
    }

    pub fn symbol_count(&self) -> usize {
        self.syms.len()
    }

    pub fn symbol_refcount(&self, id: SymbolId) -> Option<u32> {
        self.syms.refcount(id)
    }

    pub fn identifier_level(&self, id: SymbolId) -> Option<GoalLevel> {
        self.syms.id_data(id).map(|d| d.level)
    }

    pub fn link_count(&self, id: SymbolId) -> Option<u64> {
        self.syms.id_data(id).map(|d| u64::from(d.link_count))
    }

    /// Counter snapshot for diagnostics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            decisions: self.run.decision_count,
            elaborations: self.run.elaboration_count,
            phases: self.run.phase_count,
            input_cycles: self.run.input_cycle_count,
            output_cycles: self.run.output_cycle_count,
            wme_count: self.wm.wme_count(),
            symbol_count: self.syms.len(),
            goal_depth: self.stack_depth(),
            total_micros: self.run.timers.total().as_micros(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_a_top_state() {
        let agent = Agent::new().unwrap();
        let top = agent.top_state().unwrap();
        assert_eq!(agent.bottom_goal(), Some(top));
        assert_eq!(agent.identifier_level(top), Some(TOP_GOAL_LEVEL));
        assert_eq!(agent.impasse_kind_of(top), Some(ImpasseKind::None));
    }

    #[test]
    fn top_state_has_architecture_markers() {
        let mut agent = Agent::new().unwrap();
        let top = agent.top_state().unwrap();
        let state = agent.sym_constant("state");
        let r#type = agent.sym_constant("type");
        let nil = agent.sym_constant("nil");
        let superstate = agent.sym_constant("superstate");
        assert!(agent.wme_exists(top, r#type, state));
        assert!(agent.wme_exists(top, superstate, nil));
    }

    #[test]
    fn halt_is_terminal_until_reinitialize() {
        let mut agent = Agent::new().unwrap();
        agent.halt();
        assert!(agent.is_halted());
        assert_eq!(agent.stop_reason(), Some("System halted."));
        agent.reinitialize().unwrap();
        assert!(!agent.is_halted());
        assert!(agent.top_state().is_some());
    }

    #[test]
    fn reinitialize_resets_counters_and_stack() {
        let mut agent = Agent::new().unwrap();
        let old_top = agent.top_state().unwrap();
        agent.reinitialize().unwrap();
        let new_top = agent.top_state().unwrap();
        assert_eq!(agent.stats().decisions, 0);
        assert_eq!(agent.stack_depth(), 1);
        // Identifier numbering restarts as well.
        assert_eq!(agent.display(new_top), agent.display(old_top));
    }
}
