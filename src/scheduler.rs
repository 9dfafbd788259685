//! The decision cycle.
//!
//! The engine advances one phase at a time through a fixed cycle. Two cycle
//! shapes exist:
//!
//! - **Propose/apply** (default): Input, Propose, Decision, Apply, Output.
//!   Propose and Apply are inner elaboration loops that run the matcher to
//!   quiescence before and after each decision.
//! - **Single-cycle**: Input, then Preference/WorkingMemory pairs until
//!   quiescence, then Decision, then Output.
//!
//! Working-memory changes buffer inside a phase and flush exactly once at
//! each elaboration step, so rule firings within a step see a consistent
//! snapshot. Stop requests take effect at phase boundaries; a halt is
//! terminal until `reinitialize`.
//!
//! Errors come in three tiers. Policy limits (elaboration runaway) log a
//! warning and force quiescence. Operational limits (nil output, goal depth)
//! stop the run with a reason the host can read. Broken internal invariants
//! surface as [`RunError::Fatal`](crate::error::RunError) from the run entry
//! points instead of aborting the process.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::agent::Agent;
use crate::decide;
use crate::error::{RunError, SiaResult};
use crate::events::{Event, EventKind};
use crate::goal::{self, ContextKind};
use crate::io::InputContext;
use crate::matcher::MatchOutput;
use crate::memory;
use crate::symbol::{GoalLevel, SymbolId};

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// One stop of the decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Input,
    Propose,
    Preference,
    WorkingMemory,
    Apply,
    Decision,
    Output,
}

impl Phase {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Input => "input",
            Phase::Propose => "propose",
            Phase::Preference => "preference",
            Phase::WorkingMemory => "working-memory",
            Phase::Apply => "apply",
            Phase::Decision => "decision",
            Phase::Output => "output",
        };
        write!(f, "{name}")
    }
}

/// Wall-clock time spent per phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseTimers {
    totals: [Duration; Phase::COUNT],
}

impl PhaseTimers {
    pub(crate) fn add(&mut self, phase: Phase, elapsed: Duration) {
        self.totals[phase.index()] += elapsed;
    }

    pub fn of(&self, phase: Phase) -> Duration {
        self.totals[phase.index()]
    }

    pub fn total(&self) -> Duration {
        self.totals.iter().sum()
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Counts a run driver can wait on: context decisions of one kind, optionally
/// restricted to goals at or above a stack level.
#[derive(Debug, Clone, Copy)]
pub struct DecisionFilter {
    pub kind: ContextKind,
    pub max_level: Option<GoalLevel>,
}

/// Mutable run state threaded through every phase.
pub struct RunState {
    pub(crate) phase: Phase,
    pub(crate) stop_requested: bool,
    pub(crate) stop_reason: Option<String>,
    pub(crate) halted: bool,
    pub(crate) decision_count: u64,
    pub(crate) elaboration_count: u64,
    /// Elaborations since the last decision; bounds the inner loops.
    pub(crate) cycle_elaborations: u64,
    pub(crate) phase_count: u64,
    pub(crate) input_cycle_count: u64,
    pub(crate) output_cycle_count: u64,
    pub(crate) nil_output_cycles: u64,
    /// Goals whose dependency set lost a member; resolved at the next
    /// decision phase by retracting the goal and everything below it.
    pub(crate) gds_violations: Vec<SymbolId>,
    pub(crate) timers: PhaseTimers,
    pub(crate) decision_filter: Option<DecisionFilter>,
    pub(crate) filtered_decisions: u64,
}

impl RunState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Input,
            stop_requested: false,
            stop_reason: None,
            halted: false,
            decision_count: 0,
            elaboration_count: 0,
            cycle_elaborations: 0,
            phase_count: 0,
            input_cycle_count: 0,
            output_cycle_count: 0,
            nil_output_cycles: 0,
            gds_violations: Vec::new(),
            timers: PhaseTimers::default(),
            decision_filter: None,
            filtered_decisions: 0,
        }
    }

    /// Request a stop at the next phase boundary, recording why.
    pub(crate) fn stop_with_reason(&mut self, reason: &str) {
        if !self.stop_requested {
            tracing::info!(reason, "run stopping");
            self.stop_requested = true;
            self.stop_reason = Some(reason.to_string());
        }
    }

    /// Record a context decision for the active decision filter.
    pub(crate) fn count_context_decision(&mut self, level: GoalLevel, kind: ContextKind) {
        if let Some(filter) = self.decision_filter
            && filter.kind == kind
            && filter.max_level.is_none_or(|max| level <= max)
        {
            self.filtered_decisions += 1;
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run driver returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The requested count was reached.
    Completed,
    /// The engine stopped itself; the reason is host-readable.
    Stopped { reason: String },
    /// A rule or the host halted the agent; only `reinitialize` revives it.
    Halted,
}

/// Counter snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub decisions: u64,
    pub elaborations: u64,
    pub phases: u64,
    pub input_cycles: u64,
    pub output_cycles: u64,
    pub wme_count: usize,
    pub symbol_count: usize,
    pub goal_depth: GoalLevel,
    pub total_micros: u128,
}

// ---------------------------------------------------------------------------
// Phase execution
// ---------------------------------------------------------------------------

impl Agent {
    /// Run exactly one phase and advance to the next.
    pub fn step(&mut self) -> SiaResult<Phase> {
        let phase = self.run.phase;
        if self.options.trace_phases() {
            tracing::debug!(%phase, "phase begin");
        }
        self.events
            .fire(EventKind::BeforePhase, &Event::Phase { phase });
        let started = Instant::now();
        match phase {
            Phase::Input => self.do_input_phase()?,
            Phase::Propose | Phase::Apply => self.do_propose_or_apply()?,
            Phase::Preference => self.do_preference_phase()?,
            Phase::WorkingMemory => self.do_wm_phase()?,
            Phase::Decision => self.do_decision_phase()?,
            Phase::Output => self.do_output_phase()?,
        }
        self.run.timers.add(phase, started.elapsed());
        self.run.phase_count += 1;
        self.events
            .fire(EventKind::AfterPhase, &Event::Phase { phase });
        self.run.phase = self.next_phase(phase);
        Ok(phase)
    }

    fn next_phase(&self, current: Phase) -> Phase {
        use crate::config::ElaborationMode;
        let single = self.options.elaboration_mode() == ElaborationMode::SingleCycle;
        match current {
            Phase::Input => {
                if single {
                    Phase::Preference
                } else {
                    Phase::Propose
                }
            }
            Phase::Propose => Phase::Decision,
            Phase::Preference => Phase::WorkingMemory,
            Phase::WorkingMemory => {
                if self.quiescent() {
                    Phase::Decision
                } else {
                    Phase::Preference
                }
            }
            Phase::Decision => {
                if single {
                    Phase::Output
                } else {
                    Phase::Apply
                }
            }
            Phase::Apply => Phase::Output,
            Phase::Output => Phase::Input,
        }
    }

    /// No pending firings and no buffered working-memory changes.
    pub(crate) fn quiescent(&self) -> bool {
        self.pending_match.iter().all(MatchOutput::is_empty)
            && self.wm.buffers_empty()
            && self.wm.changed_slots.is_empty()
    }

    fn do_input_phase(&mut self) -> SiaResult<()> {
        self.run.input_cycle_count += 1;
        if let Some(mut io) = self.io.take() {
            let result = io.input_cycle(&mut InputContext {
                ctx: &mut self.ctx(),
            });
            self.io = Some(io);
            result.map_err(|e| RunError::Adapter {
                phase: Phase::Input.to_string(),
                message: e.to_string(),
            })?;
        }
        let out = self.flush_collect()?;
        self.queue_match_output(out);
        Ok(())
    }

    /// Inner elaboration loop for the propose/apply mode. Runs firings,
    /// re-decides non-context slots, and flushes until the matcher has
    /// nothing more to say or the elaboration budget runs out.
    fn do_propose_or_apply(&mut self) -> SiaResult<()> {
        let max = self.options.max_elaborations();
        loop {
            let pending = self.pending_match.pop_front().unwrap_or_default();
            self.apply_match_output(pending)?;
            decide::decide_non_context_slots(&mut self.ctx())?;
            let out = self.flush_collect()?;
            self.run.elaboration_count += 1;
            self.run.cycle_elaborations += 1;
            if out.is_empty() && self.quiescent() {
                break;
            }
            self.queue_match_output(out);
            if self.run.cycle_elaborations >= max {
                tracing::warn!(
                    limit = max,
                    "elaboration limit reached before quiescence; forcing the next phase"
                );
                break;
            }
            if self.run.stop_requested || self.run.halted {
                break;
            }
        }
        Ok(())
    }

    /// Single-cycle mode: run one batch of pending firings.
    fn do_preference_phase(&mut self) -> SiaResult<()> {
        let pending = self.pending_match.pop_front().unwrap_or_default();
        self.apply_match_output(pending)?;
        Ok(())
    }

    /// Single-cycle mode: commit buffered changes and collect new firings.
    fn do_wm_phase(&mut self) -> SiaResult<()> {
        decide::decide_non_context_slots(&mut self.ctx())?;
        let out = self.flush_collect()?;
        self.run.elaboration_count += 1;
        self.run.cycle_elaborations += 1;
        self.queue_match_output(out);
        if !self.quiescent() && self.run.cycle_elaborations >= self.options.max_elaborations() {
            tracing::warn!(
                limit = self.options.max_elaborations(),
                "elaboration limit reached before quiescence; forcing a decision"
            );
            self.pending_match.clear();
            self.wm.changed_slots.clear();
        }
        Ok(())
    }

    fn do_decision_phase(&mut self) -> SiaResult<()> {
        self.events.fire(
            EventKind::BeforeDecision,
            &Event::Decision {
                goal: self.stack.bottom,
            },
        );
        // Dependency-set violations retract their goals before any new
        // decision is made.
        let violated = std::mem::take(&mut self.run.gds_violations);
        for g in violated {
            if self.syms.isa_goal(g) {
                tracing::info!(goal = %self.syms.display(g), "dependency set violated");
                goal::remove_goal_and_descendents(&mut self.ctx(), g)?;
            }
        }
        decide::decide_context_slots(&mut self.ctx())?;
        let out = self.flush_collect()?;
        self.queue_match_output(out);
        self.run.decision_count += 1;
        self.run.cycle_elaborations = 0;
        if self.options.trace_decisions() {
            tracing::debug!(
                decision = self.run.decision_count,
                depth = goal::stack_depth(&self.syms, &self.stack),
                "decision made"
            );
        }
        self.events.fire(
            EventKind::AfterDecision,
            &Event::Decision {
                goal: self.stack.bottom,
            },
        );
        Ok(())
    }

    fn do_output_phase(&mut self) -> SiaResult<()> {
        self.run.output_cycle_count += 1;
        let changes = std::mem::take(&mut self.wm.output_journal);
        if changes.is_empty() {
            self.run.nil_output_cycles += 1;
            if self.io.is_some()
                && self.run.nil_output_cycles >= self.options.max_nil_output_cycles()
            {
                self.run
                    .stop_with_reason("maximum nil output cycles reached");
            }
            return Ok(());
        }
        self.run.nil_output_cycles = 0;
        if let Some(mut io) = self.io.take() {
            let result = io.output_cycle(&changes);
            self.io = Some(io);
            result.map_err(|e| RunError::Adapter {
                phase: Phase::Output.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Turn matcher output into instantiations and retractions.
    pub(crate) fn apply_match_output(&mut self, out: MatchOutput) -> SiaResult<()> {
        for token in out.retractions {
            if let Some(inst) = self.inst_tokens.remove(&token) {
                memory::retract_instantiation(&mut self.ctx(), inst)?;
            } else {
                tracing::warn!(token, "matcher retracted an unknown token");
            }
        }
        for assertion in out.assertions {
            let inst = memory::create_instantiation(
                &mut self.ctx(),
                assertion.match_goal,
                &assertion.preferences,
            )?;
            self.inst_tokens.insert(assertion.token, inst);
        }
        Ok(())
    }

    pub(crate) fn queue_match_output(&mut self, out: MatchOutput) {
        if !out.is_empty() {
            self.pending_match.push_back(out);
        }
    }

    // -----------------------------------------------------------------------
    // Run drivers
    // -----------------------------------------------------------------------

    /// Step until something stops the run.
    pub fn run_forever(&mut self) -> SiaResult<RunOutcome> {
        self.drive(|_| false)
    }

    /// Step through `n` phases.
    pub fn run_for_phases(&mut self, n: u64) -> SiaResult<RunOutcome> {
        let target = self.run.phase_count + n;
        self.drive(move |run| run.phase_count >= target)
    }

    /// Step until `n` more elaborations have happened.
    pub fn run_for_elaborations(&mut self, n: u64) -> SiaResult<RunOutcome> {
        let target = self.run.elaboration_count + n;
        self.drive(move |run| run.elaboration_count >= target)
    }

    /// Step until `n` more decision phases have completed.
    pub fn run_for_decisions(&mut self, n: u64) -> SiaResult<RunOutcome> {
        let target = self.run.decision_count + n;
        self.drive(move |run| run.decision_count >= target)
    }

    /// Step until `n` more context decisions of `kind` have been made,
    /// optionally only counting goals at or above `max_level`.
    pub fn run_until_decision(
        &mut self,
        n: u64,
        kind: ContextKind,
        max_level: Option<GoalLevel>,
    ) -> SiaResult<RunOutcome> {
        self.run.decision_filter = Some(DecisionFilter { kind, max_level });
        self.run.filtered_decisions = 0;
        let result = self.drive(move |run| run.filtered_decisions >= n);
        self.run.decision_filter = None;
        result
    }

    fn drive<F>(&mut self, mut done: F) -> SiaResult<RunOutcome>
    where
        F: FnMut(&RunState) -> bool,
    {
        if self.run.halted {
            return Ok(RunOutcome::Halted);
        }
        self.run.stop_requested = false;
        self.run.stop_reason = None;
        loop {
            if done(&self.run) {
                return Ok(RunOutcome::Completed);
            }
            if let Err(e) = self.step() {
                self.run.halted = true;
                self.events.fire(
                    EventKind::AfterHalt,
                    &Event::Halt {
                        fatal: true,
                        reason: e.to_string(),
                    },
                );
                return Err(e);
            }
            if self.run.halted {
                return Ok(RunOutcome::Halted);
            }
            if self.run.stop_requested {
                return Ok(RunOutcome::Stopped {
                    reason: self.run.stop_reason.clone().unwrap_or_default(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display_names() {
        assert_eq!(Phase::WorkingMemory.to_string(), "working-memory");
        assert_eq!(Phase::Propose.to_string(), "propose");
    }

    #[test]
    fn timers_accumulate() {
        let mut t = PhaseTimers::default();
        t.add(Phase::Input, Duration::from_millis(2));
        t.add(Phase::Input, Duration::from_millis(3));
        t.add(Phase::Output, Duration::from_millis(1));
        assert_eq!(t.of(Phase::Input), Duration::from_millis(5));
        assert_eq!(t.total(), Duration::from_millis(6));
    }

    #[test]
    fn decision_filter_counts_matching_levels() {
        let mut run = RunState::new();
        run.decision_filter = Some(DecisionFilter {
            kind: ContextKind::Operator,
            max_level: Some(2),
        });
        run.count_context_decision(1, ContextKind::Operator);
        run.count_context_decision(3, ContextKind::Operator);
        run.count_context_decision(1, ContextKind::State);
        assert_eq!(run.filtered_decisions, 1);
    }
}
