//! Preference semantics: from a multiset of typed, possibly-conflicting
//! preferences to a decision or an impasse.
//!
//! `run_preference_semantics` is pure with respect to the slot's preference
//! lists (the seeded RNG behind the `random` selection policy is the only
//! mutable input) and short-circuits through the classic ladder: requires,
//! acceptables minus rejects/prohibits, better/worse, best/worst,
//! indifference, parallelism. The consistency entry point runs the same
//! classification but never collapses an all-indifferent set to one winner:
//! it asks whether a decision already made still stands, not for a new one.
//!
//! The decision phase proper (`decide_context_slots`) walks the goal stack
//! top to bottom, re-decides stale context slots, installs winners, and opens
//! subgoals for impasses.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::agent::Ctx;
use crate::config::SelectionPolicy;
use crate::error::{SiaResult, fatal};
use crate::events::{Event, EventKind};
use crate::goal::{self, ContextKind};
use crate::memory;
use crate::pref::PreferenceKind;
use crate::slot::SlotId;
use crate::symbol::{SymbolId, SymbolValue};
use crate::wme::WmeHome;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a slot could not be resolved to exactly one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpasseKind {
    /// A decision was reached (or the slot simply has candidates to install).
    None,
    /// Nothing changed the situation: no candidate to move to.
    NoChange,
    /// Several candidates survive with nothing to order them.
    Tie,
    /// Candidates are both better and worse than each other.
    Conflict,
    /// Contradictory requires, or a required value that is prohibited.
    ConstraintFailure,
}

impl std::fmt::Display for ImpasseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImpasseKind::None => "none",
            ImpasseKind::NoChange => "no-change",
            ImpasseKind::Tie => "tie",
            ImpasseKind::Conflict => "conflict",
            ImpasseKind::ConstraintFailure => "constraint-failure",
        };
        write!(f, "{name}")
    }
}

/// Verdict of the preference-semantics engine for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub impasse: ImpasseKind,
    /// Surviving candidates, in assertion order.
    pub candidates: Vec<SymbolId>,
}

/// Whether the caller wants a fresh decision or a consistency re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsiderMode {
    /// Collapse an all-indifferent context slot to one winner.
    Decide,
    /// Never collapse; report the full surviving set.
    Consistency,
}

// ---------------------------------------------------------------------------
// The semantics ladder
// ---------------------------------------------------------------------------

/// Distinct preference values of one kind, in assertion order.
fn distinct_values(ctx: &Ctx<'_>, slot_id: SlotId, kind: PreferenceKind) -> Vec<SymbolId> {
    let Some(slot) = ctx.wm.slot(slot_id) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for pref_id in slot.prefs_of(kind) {
        if let Some(p) = ctx.prefs.get(*pref_id)
            && seen.insert(p.value)
        {
            out.push(p.value);
        }
    }
    out
}

fn value_set(ctx: &Ctx<'_>, slot_id: SlotId, kind: PreferenceKind) -> HashSet<SymbolId> {
    distinct_values(ctx, slot_id, kind).into_iter().collect()
}

/// Ordered (value, referent) pairs for a binary kind.
fn binary_pairs(
    ctx: &Ctx<'_>,
    slot_id: SlotId,
    kind: PreferenceKind,
) -> Vec<(SymbolId, SymbolId)> {
    let Some(slot) = ctx.wm.slot(slot_id) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for pref_id in slot.prefs_of(kind) {
        if let Some(p) = ctx.prefs.get(*pref_id)
            && let Some(r) = p.referent
        {
            out.push((p.value, r));
        }
    }
    out
}

/// Values carrying a numeric-indifferent preference (an indifferent with a
/// numeric referent). The weighting formula is stubbed; under mode 0 these
/// count as plain indifference.
fn numeric_indifferent_values(ctx: &Ctx<'_>, slot_id: SlotId) -> HashSet<SymbolId> {
    let Some(slot) = ctx.wm.slot(slot_id) else {
        return HashSet::new();
    };
    let mut out = HashSet::new();
    for pref_id in slot.prefs_of(PreferenceKind::BinaryIndifferent) {
        if let Some(p) = ctx.prefs.get(*pref_id)
            && let Some(r) = p.referent
            && matches!(
                ctx.syms.get(r),
                Some(SymbolValue::IntConstant(_) | SymbolValue::FloatConstant(_))
            )
        {
            out.insert(p.value);
        }
    }
    out
}

/// `resolve(slot)`: classify the slot's preference multiset.
pub(crate) fn run_preference_semantics(
    ctx: &mut Ctx<'_>,
    slot_id: SlotId,
    mode: ConsiderMode,
) -> SiaResult<Decision> {
    let is_context = ctx.wm.expect_slot(slot_id)?.is_context;
    let prohibited = value_set(ctx, slot_id, PreferenceKind::Prohibit);

    // 1. Requires dominate everything else.
    let required = distinct_values(ctx, slot_id, PreferenceKind::Require);
    if !required.is_empty() {
        if required.len() > 1 {
            return Ok(Decision {
                impasse: ImpasseKind::ConstraintFailure,
                candidates: required,
            });
        }
        let winner = required[0];
        if prohibited.contains(&winner) {
            return Ok(Decision {
                impasse: ImpasseKind::ConstraintFailure,
                candidates: vec![winner],
            });
        }
        return Ok(Decision {
            impasse: ImpasseKind::None,
            candidates: vec![winner],
        });
    }

    // 2. Acceptables, minus prohibits and rejects.
    let rejected = value_set(ctx, slot_id, PreferenceKind::Reject);
    let mut candidates: Vec<SymbolId> =
        distinct_values(ctx, slot_id, PreferenceKind::Acceptable)
            .into_iter()
            .filter(|v| !prohibited.contains(v) && !rejected.contains(v))
            .collect();
    if candidates.len() <= 1 {
        return Ok(Decision {
            impasse: ImpasseKind::None,
            candidates,
        });
    }

    // 3. Better/worse edges between surviving candidates.
    let candidate_set: HashSet<SymbolId> = candidates.iter().copied().collect();
    let mut dominates: HashSet<(SymbolId, SymbolId)> = HashSet::new();
    for (value, referent) in binary_pairs(ctx, slot_id, PreferenceKind::Better) {
        if candidate_set.contains(&value) && candidate_set.contains(&referent) {
            dominates.insert((value, referent));
        }
    }
    for (value, referent) in binary_pairs(ctx, slot_id, PreferenceKind::Worse) {
        if candidate_set.contains(&value) && candidate_set.contains(&referent) {
            dominates.insert((referent, value));
        }
    }
    if !dominates.is_empty() {
        let conflicted: Vec<SymbolId> = candidates
            .iter()
            .copied()
            .filter(|c| {
                candidates
                    .iter()
                    .any(|d| dominates.contains(&(*c, *d)) && dominates.contains(&(*d, *c)))
            })
            .collect();
        if !conflicted.is_empty() {
            return Ok(Decision {
                impasse: ImpasseKind::Conflict,
                candidates: conflicted,
            });
        }
        // Consistent ordering: drop everything dominated as a loser. A cycle
        // longer than two dominates every member, which is also a conflict.
        let before = candidates.clone();
        candidates.retain(|c| !candidates_dominating(c, &dominates));
        if candidates.is_empty() {
            return Ok(Decision {
                impasse: ImpasseKind::Conflict,
                candidates: before,
            });
        }
        if candidates.len() <= 1 {
            return Ok(Decision {
                impasse: ImpasseKind::None,
                candidates,
            });
        }
    }

    // 4. Best narrows, worst excludes.
    let best = value_set(ctx, slot_id, PreferenceKind::Best);
    if candidates.iter().any(|c| best.contains(c)) {
        candidates.retain(|c| best.contains(c));
    }
    let worst = value_set(ctx, slot_id, PreferenceKind::Worst);
    if !worst.is_empty() {
        let survivors: Vec<SymbolId> = candidates
            .iter()
            .copied()
            .filter(|c| !worst.contains(c))
            .collect();
        if !survivors.is_empty() {
            candidates = survivors;
        }
    }
    if candidates.len() <= 1 {
        return Ok(Decision {
            impasse: ImpasseKind::None,
            candidates,
        });
    }

    // 5. Indifference: unary, numeric, or pairwise to every other survivor.
    let unary = value_set(ctx, slot_id, PreferenceKind::UnaryIndifferent);
    let numeric = numeric_indifferent_values(ctx, slot_id);
    let mutual: HashSet<(SymbolId, SymbolId)> =
        binary_pairs(ctx, slot_id, PreferenceKind::BinaryIndifferent)
            .into_iter()
            .collect();
    let all_indifferent = all_pairs_fine(&candidates, |c, d| {
        unary.contains(&c)
            || numeric.contains(&c)
            || mutual.contains(&(c, d))
            || mutual.contains(&(d, c))
    });
    if all_indifferent {
        if is_context && mode == ConsiderMode::Decide {
            let winner = select_candidate(ctx, &candidates)?;
            return Ok(Decision {
                impasse: ImpasseKind::None,
                candidates: vec![winner],
            });
        }
        return Ok(Decision {
            impasse: ImpasseKind::None,
            candidates,
        });
    }

    // 6. An undecidable context slot ties.
    if is_context {
        return Ok(Decision {
            impasse: ImpasseKind::Tie,
            candidates,
        });
    }

    // 7. Non-context slots may still be installed in parallel.
    let up = value_set(ctx, slot_id, PreferenceKind::UnaryParallel);
    let bp: HashSet<(SymbolId, SymbolId)> =
        binary_pairs(ctx, slot_id, PreferenceKind::BinaryParallel)
            .into_iter()
            .collect();
    let all_parallel = all_pairs_fine(&candidates, |c, d| {
        up.contains(&c) || bp.contains(&(c, d)) || bp.contains(&(d, c))
    });
    if all_parallel {
        return Ok(Decision {
            impasse: ImpasseKind::None,
            candidates,
        });
    }
    Ok(Decision {
        impasse: ImpasseKind::Tie,
        candidates,
    })
}

fn candidates_dominating(c: &SymbolId, dominates: &HashSet<(SymbolId, SymbolId)>) -> bool {
    dominates.iter().any(|(_, loser)| loser == c)
}

/// Every candidate must pass the check against every other candidate.
fn all_pairs_fine<F>(candidates: &[SymbolId], fine: F) -> bool
where
    F: Fn(SymbolId, SymbolId) -> bool,
{
    candidates.iter().all(|&c| {
        candidates
            .iter()
            .filter(|&&d| d != c)
            .all(|&d| fine(c, d))
    })
}

/// Pick one winner from an all-indifferent context-slot set.
fn select_candidate(ctx: &mut Ctx<'_>, candidates: &[SymbolId]) -> SiaResult<SymbolId> {
    let policy = ctx.options.selection_policy();
    let winner = match policy {
        SelectionPolicy::First => candidates[0],
        SelectionPolicy::Last => candidates[candidates.len() - 1],
        SelectionPolicy::Ask => {
            // Interactive selection is a host concern; stubbed to `first`.
            tracing::warn!("selection policy 'ask' is stubbed; picking the first candidate");
            candidates[0]
        }
        SelectionPolicy::Random => candidates[ctx.rng.gen_range(0..candidates.len())],
    };
    Ok(winner)
}

// ---------------------------------------------------------------------------
// Consistency of an earlier decision
// ---------------------------------------------------------------------------

/// Does the installed context value still follow from the slot's preferences?
pub(crate) fn installed_value_consistent(
    ctx: &mut Ctx<'_>,
    slot_id: SlotId,
    installed: SymbolId,
) -> SiaResult<bool> {
    // A reconsider preference on the installed value forces a re-decision.
    let reconsidered = distinct_values(ctx, slot_id, PreferenceKind::Reconsider)
        .contains(&installed);
    if reconsidered {
        return Ok(false);
    }
    let d = run_preference_semantics(ctx, slot_id, ConsiderMode::Consistency)?;
    Ok(d.impasse == ImpasseKind::None && d.candidates.contains(&installed))
}

// ---------------------------------------------------------------------------
// Decision phase: context slots
// ---------------------------------------------------------------------------

/// Walk the goal stack top to bottom, re-deciding stale context slots.
/// Falls through to a no-change impasse at the bottom goal when nothing moved.
pub(crate) fn decide_context_slots(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    let mut goal_opt = ctx.stack.top;
    let mut moved = false;
    while let Some(goal) = goal_opt {
        let (slot_id, lower) = {
            let data = ctx.syms.expect_id(goal)?;
            let Some(frame) = data.frame.as_ref() else {
                return Err(fatal("context-stack identifier without a goal frame"));
            };
            let Some(slot_id) = frame.operator_slot else {
                return Err(fatal("goal without an operator slot"));
            };
            (slot_id, frame.lower_goal)
        };
        let installed = installed_context_value(ctx, slot_id)?;
        let changed = ctx.wm.expect_slot(slot_id)?.changed;
        let needs = if changed {
            true
        } else if let Some((_, value)) = installed {
            !installed_value_consistent(ctx, slot_id, value)?
        } else {
            false
        };
        if !needs {
            goal_opt = lower;
            continue;
        }
        if let Some(slot) = ctx.wm.slot_mut(slot_id) {
            slot.changed = false;
        }

        let decision = run_preference_semantics(ctx, slot_id, ConsiderMode::Decide)?;
        match decision.impasse {
            ImpasseKind::None => {
                if decision.candidates.len() == 1
                    && installed.is_some_and(|(_, v)| v == decision.candidates[0])
                {
                    // Reconfirmed; nothing below is invalidated.
                    goal_opt = lower;
                    continue;
                }
                goal::remove_lower_goals(ctx, goal)?;
                if let Some((wme_id, _)) = installed {
                    memory::remove_wme(ctx, wme_id)?;
                }
                if let Some(&winner) = decision.candidates.first() {
                    install_context_value(ctx, goal, slot_id, winner)?;
                    moved = true;
                }
                break;
            }
            kind => {
                // Keep an identical existing subgoal rather than thrash it.
                if same_existing_impasse(ctx, goal, kind, &decision.candidates) {
                    goal_opt = lower;
                    continue;
                }
                goal::remove_lower_goals(ctx, goal)?;
                if let Some((wme_id, _)) = installed {
                    memory::remove_wme(ctx, wme_id)?;
                }
                goal::create_goal(
                    ctx,
                    Some(goal),
                    ContextKind::Operator,
                    kind,
                    &decision.candidates,
                )?;
                moved = true;
                break;
            }
        }
    }

    if moved {
        return Ok(());
    }

    // Quiescent stack: the bottom goal impasses on no-change.
    let Some(bottom) = ctx.stack.bottom else {
        return Err(fatal("decision phase with no goal stack"));
    };
    let slot_id = ctx
        .syms
        .id_data(bottom)
        .and_then(|d| d.frame.as_ref())
        .and_then(|f| f.operator_slot)
        .ok_or_else(|| fatal("bottom goal without an operator slot"))?;
    match installed_context_value(ctx, slot_id)? {
        Some((_, op)) => {
            goal::create_goal(
                ctx,
                Some(bottom),
                ContextKind::Operator,
                ImpasseKind::NoChange,
                &[op],
            )?;
        }
        None => {
            goal::create_goal(
                ctx,
                Some(bottom),
                ContextKind::State,
                ImpasseKind::NoChange,
                &[],
            )?;
        }
    }
    Ok(())
}

/// The single installed WME of a context slot, if any.
fn installed_context_value(
    ctx: &Ctx<'_>,
    slot_id: SlotId,
) -> SiaResult<Option<(crate::wme::WmeId, SymbolId)>> {
    let slot = ctx.wm.expect_slot(slot_id)?;
    if slot.wmes.len() > 1 {
        return Err(fatal("context slot holds more than one installed value"));
    }
    Ok(slot
        .wmes
        .first()
        .and_then(|w| ctx.wm.wme(*w).map(|wme| (*w, wme.value))))
}

fn install_context_value(
    ctx: &mut Ctx<'_>,
    goal: SymbolId,
    slot_id: SlotId,
    winner: SymbolId,
) -> SiaResult<()> {
    // The installed WME is owned by the preference that nominated the winner.
    let owning_pref = {
        let slot = ctx.wm.expect_slot(slot_id)?;
        let mut found = None;
        for kind in [PreferenceKind::Require, PreferenceKind::Acceptable] {
            for pref_id in slot.prefs_of(kind) {
                if ctx.prefs.get(*pref_id).is_some_and(|p| p.value == winner) {
                    found = Some(*pref_id);
                    break;
                }
            }
            if found.is_some() {
                break;
            }
        }
        found.ok_or_else(|| fatal("decided value has no nominating preference"))?
    };
    let attr = ctx.wm.expect_slot(slot_id)?.attr;
    memory::add_wme(
        ctx,
        WmeHome::Slot(slot_id),
        goal,
        attr,
        winner,
        false,
        Some(owning_pref),
    )?;
    let level = ctx.syms.expect_id(goal)?.level;
    tracing::info!(
        goal = %ctx.syms.display(goal),
        value = %ctx.syms.display(winner),
        "context slot decided"
    );
    ctx.events.fire(
        EventKind::ContextSlotDecided,
        &Event::ContextSlotDecided {
            goal,
            kind: ContextKind::Operator,
            value: winner,
        },
    );
    ctx.run.count_context_decision(level, ContextKind::Operator);
    Ok(())
}

/// Whether `goal` already has a child impasse of the same kind with the same
/// item set (in which case it is kept and only its items would differ).
fn same_existing_impasse(
    ctx: &Ctx<'_>,
    goal: SymbolId,
    kind: ImpasseKind,
    items: &[SymbolId],
) -> bool {
    let Some(child) = ctx
        .syms
        .id_data(goal)
        .and_then(|d| d.frame.as_ref())
        .and_then(|f| f.lower_goal)
    else {
        return false;
    };
    let Some(frame) = ctx.syms.id_data(child).and_then(|d| d.frame.as_ref()) else {
        return false;
    };
    if frame.impasse_kind != kind {
        return false;
    }
    let existing: HashSet<SymbolId> = frame
        .impasse_wmes
        .iter()
        .filter_map(|w| ctx.wm.wme(*w))
        .filter(|w| w.attr == ctx.arch.item)
        .map(|w| w.value)
        .collect();
    let wanted: HashSet<SymbolId> = items.iter().copied().collect();
    existing == wanted
}

// ---------------------------------------------------------------------------
// Working-memory phase: non-context slots
// ---------------------------------------------------------------------------

/// Re-decide every changed non-context slot, syncing its installed WMEs to
/// the surviving candidate set (or raising an attribute impasse).
pub(crate) fn decide_non_context_slots(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    let changed = std::mem::take(&mut ctx.wm.changed_slots);
    for slot_id in changed {
        let Some(slot) = ctx.wm.slot_mut(slot_id) else {
            continue;
        };
        if slot.is_context {
            continue;
        }
        slot.changed = false;
        let decision = run_preference_semantics(ctx, slot_id, ConsiderMode::Decide)?;
        match decision.impasse {
            ImpasseKind::None => {
                if ctx.wm.expect_slot(slot_id)?.impasse.is_some() {
                    goal::remove_attribute_impasse(ctx, slot_id)?;
                }
                sync_slot_wmes(ctx, slot_id, &decision.candidates)?;
            }
            kind => {
                // Undecidable: clear installed values, raise the impasse.
                sync_slot_wmes(ctx, slot_id, &[])?;
                let existing_kind = existing_attribute_impasse(ctx, slot_id);
                if existing_kind != Some(kind) {
                    if existing_kind.is_some() {
                        goal::remove_attribute_impasse(ctx, slot_id)?;
                    }
                    goal::create_attribute_impasse(ctx, slot_id, kind, &decision.candidates)?;
                }
            }
        }
    }
    Ok(())
}

fn existing_attribute_impasse(ctx: &Ctx<'_>, slot_id: SlotId) -> Option<ImpasseKind> {
    let impasse = ctx.wm.slot(slot_id)?.impasse?;
    ctx.syms
        .id_data(impasse)
        .and_then(|d| d.frame.as_ref())
        .map(|f| f.impasse_kind)
}

/// Make the slot's installed WMEs exactly mirror `candidates`.
fn sync_slot_wmes(
    ctx: &mut Ctx<'_>,
    slot_id: SlotId,
    candidates: &[SymbolId],
) -> SiaResult<()> {
    let (id, attr, existing) = {
        let slot = ctx.wm.expect_slot(slot_id)?;
        (slot.id, slot.attr, slot.wmes.clone())
    };
    let mut already_installed: HashSet<SymbolId> = HashSet::new();
    for wme_id in existing {
        let Some(wme) = ctx.wm.wme(wme_id) else {
            continue;
        };
        if candidates.contains(&wme.value) {
            already_installed.insert(wme.value);
        } else {
            memory::remove_wme(ctx, wme_id)?;
        }
    }
    for &value in candidates {
        if already_installed.contains(&value) {
            continue;
        }
        let owning_pref = {
            let slot = ctx.wm.expect_slot(slot_id)?;
            let mut found = None;
            for kind in [PreferenceKind::Require, PreferenceKind::Acceptable] {
                for pref_id in slot.prefs_of(kind) {
                    if ctx.prefs.get(*pref_id).is_some_and(|p| p.value == value) {
                        found = Some(*pref_id);
                        break;
                    }
                }
                if found.is_some() {
                    break;
                }
            }
            found
        };
        let Some(owning_pref) = owning_pref else {
            return Err(fatal("candidate value has no nominating preference"));
        };
        memory::add_wme(
            ctx,
            WmeHome::Slot(slot_id),
            id,
            attr,
            value,
            false,
            Some(owning_pref),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impasse_kind_display_names() {
        assert_eq!(ImpasseKind::Tie.to_string(), "tie");
        assert_eq!(ImpasseKind::ConstraintFailure.to_string(), "constraint-failure");
        assert_eq!(ImpasseKind::None.to_string(), "none");
    }

    #[test]
    fn all_pairs_fine_trivial_cases() {
        let a = SymbolId::new(1).unwrap();
        let b = SymbolId::new(2).unwrap();
        assert!(all_pairs_fine(&[a], |_, _| false));
        assert!(all_pairs_fine(&[a, b], |_, _| true));
        assert!(!all_pairs_fine(&[a, b], |_, _| false));
    }
}
