//! Working-memory ownership and garbage collection.
//!
//! Identifier reachability is tracked with link counts (one per WME pointing
//! at the identifier, plus a permanent anchor for goals and impasses). Plain
//! counting cannot reclaim cycles, so removals fall back to a bounded
//! mark-and-walk pass scoped by goal-stack level:
//!
//! 1. queued identifiers whose count reached zero are swept outright;
//! 2. the rest are marked together with everything they reach, tracking the
//!    min/max goal levels touched;
//! 3. the goal stack is walked across exactly that level range, top to
//!    bottom, unmarking (and level-correcting) everything still reachable;
//! 4. whatever stays marked is truly disconnected and is collected with
//!    count-only link updates, since reachability is already settled.
//!
//! Promotions are the cheap direction: a link from level L to a deeper
//! identifier drags the identifier (and its transitive closure) up to L at
//! the next flush. `flush` is the once-per-phase buffered-change commit.

use crate::agent::Ctx;
use crate::error::{SiaResult, fatal};
use crate::goal;
use crate::matcher::{Matcher, MatchOutput, WmeBatch};
use crate::memory;
use crate::pref::PreferenceKind;
use crate::symbol::{GoalLevel, SymbolId};
use crate::wme::WmeHome;

// ---------------------------------------------------------------------------
// Link bookkeeping state
// ---------------------------------------------------------------------------

/// How `post_link_removal` reacts to a dropped link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkUpdateMode {
    /// Queue targets for possible demotion.
    Normal,
    /// Only collect targets whose count reaches zero (used while sweeping the
    /// disconnected set, where deeper reachability questions cannot arise).
    CollectDisconnected,
    /// Only adjust counts (used by the final collection pass, after
    /// reachability has been conclusively determined).
    CountOnly,
}

pub(crate) struct LinkState {
    pub mode: LinkUpdateMode,
    /// Buffered (from, to) pairs awaiting promotion at the next flush.
    promotions: Vec<(SymbolId, SymbolId)>,
    /// Identifiers whose level is in question after a link removal.
    demotion_queue: Vec<SymbolId>,
    /// Identifiers with no remaining links, awaiting collection.
    disconnected: Vec<SymbolId>,
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            mode: LinkUpdateMode::Normal,
            promotions: Vec::new(),
            demotion_queue: Vec::new(),
            disconnected: Vec::new(),
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Link add / remove
// ---------------------------------------------------------------------------

/// Record a link to `to`. A link with no `from` is a permanent anchor (goals
/// and impasses), never reclaimed by this mechanism. Adding a link from a
/// higher level to a deeper target buffers a promotion; promoting early can
/// never be wrong, so no reachability question arises on this path.
pub(crate) fn post_link_addition(
    ctx: &mut Ctx<'_>,
    from: Option<SymbolId>,
    to: SymbolId,
) -> SiaResult<()> {
    let to_level = {
        let data = ctx.syms.expect_id_mut(to)?;
        data.link_count += 1;
        data.level
    };
    let Some(from) = from else {
        return Ok(());
    };
    let from_level = ctx.syms.expect_id(from)?.level;
    if from_level < to_level {
        ctx.links.promotions.push((from, to));
    } else if from_level > to_level
        && let Some(data) = ctx.syms.id_data_mut(to)
    {
        data.could_be_linked_from_below = true;
    }
    Ok(())
}

/// Drop a link to `to`. Only decrements the count; what happens next depends
/// on the current [`LinkUpdateMode`].
pub(crate) fn post_link_removal(
    ctx: &mut Ctx<'_>,
    from: Option<SymbolId>,
    to: SymbolId,
) -> SiaResult<()> {
    let _ = from;
    let (count, on_queue, is_frame) = {
        let Some(data) = ctx.syms.id_data_mut(to) else {
            // Target already reclaimed; nothing to track.
            return Ok(());
        };
        if data.link_count == 0 {
            return Err(fatal(format!(
                "link count underflow on identifier {}{}",
                data.letter, data.number
            )));
        }
        data.link_count -= 1;
        (data.link_count, data.on_demotion_queue, data.frame.is_some())
    };
    match ctx.links.mode {
        LinkUpdateMode::CountOnly => {}
        LinkUpdateMode::CollectDisconnected => {
            if count == 0 && !on_queue {
                set_queue_flag(ctx, to, true);
                ctx.links.disconnected.push(to);
            }
        }
        LinkUpdateMode::Normal => {
            if on_queue {
                return Ok(());
            }
            if count == 0 {
                set_queue_flag(ctx, to, true);
                ctx.links.disconnected.push(to);
            } else if !is_frame {
                // Still linked, but possibly only from below: level unknown.
                set_queue_flag(ctx, to, true);
                ctx.links.demotion_queue.push(to);
            }
        }
    }
    Ok(())
}

fn set_queue_flag(ctx: &mut Ctx<'_>, id: SymbolId, value: bool) {
    if let Some(data) = ctx.syms.id_data_mut(id) {
        data.on_demotion_queue = value;
    }
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Raise `start` and its transitive closure to `new_level` if they sit deeper.
fn promote_id_and_tc(ctx: &mut Ctx<'_>, start: SymbolId, new_level: GoalLevel) {
    let mut stack = vec![start];
    while let Some(sym) = stack.pop() {
        let Some(data) = ctx.syms.id_data_mut(sym) else {
            continue;
        };
        // Goal and impasse frames keep the level they were created at.
        if data.frame.is_some() || data.level <= new_level {
            continue;
        }
        data.level = new_level;
        data.promotion_level = new_level;
        push_linked_ids(ctx, sym, &mut stack);
    }
}

/// Push every identifier `sym` links to (attrs and values of its WMEs).
fn push_linked_ids(ctx: &Ctx<'_>, sym: SymbolId, out: &mut Vec<SymbolId>) {
    let Some(data) = ctx.syms.id_data(sym) else {
        return;
    };
    let mut wme_ids: Vec<_> = data.input_wmes.clone();
    if let Some(frame) = data.frame.as_ref() {
        wme_ids.extend(frame.impasse_wmes.iter().copied());
    }
    for slot_id in &data.slots {
        if let Some(slot) = ctx.wm.slot(*slot_id) {
            wme_ids.extend(slot.wmes.iter().copied());
            wme_ids.extend(slot.acceptable_wmes.iter().copied());
        }
    }
    for wme_id in wme_ids {
        let Some(wme) = ctx.wm.wme(wme_id) else {
            continue;
        };
        if wme.removed {
            continue;
        }
        if ctx.syms.is_identifier(wme.attr) {
            out.push(wme.attr);
        }
        if ctx.syms.is_identifier(wme.value) {
            out.push(wme.value);
        }
    }
}

fn do_promotion(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    let promotions = std::mem::take(&mut ctx.links.promotions);
    for (from, to) in promotions {
        let Some(level) = ctx.syms.id_data(from).map(|d| d.level) else {
            continue;
        };
        promote_id_and_tc(ctx, to, level);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Demotion / collection
// ---------------------------------------------------------------------------

fn do_demotion(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    // Split the queue: zero-count identifiers are certainly disconnected.
    let queued = std::mem::take(&mut ctx.links.demotion_queue);
    let mut unknown: Vec<SymbolId> = Vec::new();
    for id in queued {
        set_queue_flag(ctx, id, false);
        let Some(data) = ctx.syms.id_data(id) else {
            continue;
        };
        if data.link_count == 0 {
            set_queue_flag(ctx, id, true);
            ctx.links.disconnected.push(id);
        } else {
            unknown.push(id);
        }
    }

    sweep_disconnected(ctx)?;

    if unknown.is_empty() {
        return Ok(());
    }

    // Mark phase: color everything the questioned identifiers reach, tracking
    // the goal-level range touched.
    let mark = ctx.syms.fresh_tc();
    let mut min_level = GoalLevel::MAX;
    let mut max_level = GoalLevel::MIN;
    let mut marked: Vec<SymbolId> = Vec::new();
    for id in &unknown {
        mark_id_and_tc(ctx, *id, mark, &mut min_level, &mut max_level, &mut marked);
    }

    // Walk the goal stack across exactly that level range, top to bottom,
    // unmarking (and level-correcting) everything still reachable.
    let walk = ctx.syms.fresh_tc();
    let mut goal = ctx.stack.top;
    while let Some(g) = goal {
        let Some(data) = ctx.syms.id_data(g) else {
            break;
        };
        let level = data.level;
        let lower = data.frame.as_ref().and_then(|f| f.lower_goal);
        if level > max_level {
            break;
        }
        walk_and_update_levels(ctx, g, level, walk, mark);
        goal = lower;
    }

    // Anything left marked is truly disconnected. Collection here only
    // adjusts counts: reachability is already settled, so re-queuing would
    // only redo work.
    ctx.links.mode = LinkUpdateMode::CountOnly;
    let result: SiaResult<()> = (|| {
        for id in marked {
            let still_marked = ctx
                .syms
                .id_data(id)
                .is_some_and(|d| d.tc_marker == mark);
            if still_marked {
                garbage_collect_id(ctx, id)?;
            }
        }
        Ok(())
    })();
    ctx.links.mode = LinkUpdateMode::Normal;
    result?;

    sweep_disconnected(ctx)
}

/// Fully collect everything on the disconnected set, cascading. Removals
/// performed while sweeping may only add more zero-count identifiers.
fn sweep_disconnected(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    if ctx.links.disconnected.is_empty() {
        return Ok(());
    }
    ctx.links.mode = LinkUpdateMode::CollectDisconnected;
    let result: SiaResult<()> = (|| {
        while let Some(id) = ctx.links.disconnected.pop() {
            set_queue_flag(ctx, id, false);
            let Some(data) = ctx.syms.id_data(id) else {
                continue;
            };
            if data.link_count != 0 {
                continue;
            }
            garbage_collect_id(ctx, id)?;
        }
        Ok(())
    })();
    ctx.links.mode = LinkUpdateMode::Normal;
    result
}

fn mark_id_and_tc(
    ctx: &mut Ctx<'_>,
    start: SymbolId,
    mark: u64,
    min_level: &mut GoalLevel,
    max_level: &mut GoalLevel,
    marked: &mut Vec<SymbolId>,
) {
    let mut stack = vec![start];
    while let Some(sym) = stack.pop() {
        let Some(data) = ctx.syms.id_data_mut(sym) else {
            continue;
        };
        if data.tc_marker == mark {
            continue;
        }
        data.tc_marker = mark;
        let level = data.level;
        *min_level = (*min_level).min(level);
        *max_level = (*max_level).max(level);
        marked.push(sym);
        push_linked_ids(ctx, sym, &mut stack);
    }
}

fn walk_and_update_levels(
    ctx: &mut Ctx<'_>,
    root: SymbolId,
    walk_level: GoalLevel,
    walk: u64,
    mark: u64,
) {
    let mut stack = vec![root];
    while let Some(sym) = stack.pop() {
        let Some(data) = ctx.syms.id_data_mut(sym) else {
            continue;
        };
        if data.walk_marker == walk {
            continue;
        }
        data.walk_marker = walk;
        if data.tc_marker == mark {
            data.tc_marker = 0;
            data.level = walk_level;
            data.promotion_level = walk_level;
            data.could_be_linked_from_below = false;
        }
        push_linked_ids(ctx, sym, &mut stack);
    }
}

/// Tear down a disconnected identifier: input WMEs, attribute impasse,
/// every preference in every slot (cascading further link removals), and
/// queue its emptied slots for discard.
pub(crate) fn garbage_collect_id(ctx: &mut Ctx<'_>, id: SymbolId) -> SiaResult<()> {
    let Some(data) = ctx.syms.id_data(id) else {
        return Ok(());
    };
    tracing::debug!(id = %ctx.syms.display(id), "garbage collecting identifier");
    let input_wmes = data.input_wmes.clone();
    let slots = data.slots.clone();
    let marker_wmes = data
        .frame
        .as_ref()
        .map(|f| f.impasse_wmes.clone())
        .unwrap_or_default();

    for wme_id in input_wmes {
        memory::remove_wme(ctx, wme_id)?;
    }
    for wme_id in marker_wmes {
        memory::remove_wme(ctx, wme_id)?;
    }
    for slot_id in slots {
        let Some(slot) = ctx.wm.slot(slot_id) else {
            continue;
        };
        if slot.impasse.is_some() {
            goal::remove_attribute_impasse(ctx, slot_id)?;
        }
        let Some(slot) = ctx.wm.slot_mut(slot_id) else {
            continue;
        };
        slot.marked_for_deletion = true;
        let wmes = slot.wmes.clone();
        let acceptable = slot.acceptable_wmes.clone();
        let prefs = slot.all_prefs.clone();
        for wme_id in wmes {
            memory::remove_wme(ctx, wme_id)?;
        }
        for wme_id in acceptable {
            memory::remove_wme(ctx, wme_id)?;
        }
        for pref_id in prefs {
            memory::remove_preference_from_slot(ctx, pref_id)?;
        }
        ctx.wm.slots_to_discard.push(slot_id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-phase flush
// ---------------------------------------------------------------------------

/// Commit all buffered ownership and working-memory changes for this phase:
/// reconcile acceptable-preference WMEs for changed context slots, run
/// promotion, run the demotion pass, push the buffered WME batch through the
/// external matcher, deallocate, and discard emptied slots.
pub(crate) fn flush(ctx: &mut Ctx<'_>, matcher: &mut dyn Matcher) -> SiaResult<MatchOutput> {
    reconcile_acceptable_wmes(ctx)?;
    do_promotion(ctx)?;
    do_demotion(ctx)?;

    let batch = WmeBatch {
        added: ctx
            .wm
            .buffered_adds
            .iter()
            .filter_map(|w| ctx.wm.wme(*w))
            .filter(|w| !w.removed)
            .map(|w| w.snapshot())
            .collect(),
        removed: ctx
            .wm
            .buffered_removes
            .iter()
            .filter_map(|w| ctx.wm.wme(*w))
            .map(|w| w.snapshot())
            .collect(),
    };
    ctx.wm.buffered_adds.clear();
    let out = matcher.update(&batch, ctx.syms);

    memory::deallocate_removed_wmes(ctx)?;
    memory::discard_emptied_slots(ctx)?;
    Ok(out)
}

/// Keep each changed context slot's acceptable-preference WMEs in sync with
/// its acceptable/require preferences, so rules can match proposed values.
fn reconcile_acceptable_wmes(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    let changed = std::mem::take(&mut ctx.wm.changed_context_acceptables);
    for slot_id in changed {
        let Some(slot) = ctx.wm.slot_mut(slot_id) else {
            continue;
        };
        slot.acceptable_changed = false;
        let (id, attr) = (slot.id, slot.attr);
        let existing: Vec<_> = slot.acceptable_wmes.clone();
        let mut desired: Vec<SymbolId> = Vec::new();
        let mut pref_ids: Vec<_> = slot.prefs_of(PreferenceKind::Acceptable).to_vec();
        pref_ids.extend_from_slice(slot.prefs_of(PreferenceKind::Require));
        for pref_id in pref_ids {
            if let Some(p) = ctx.prefs.get(pref_id)
                && !desired.contains(&p.value)
            {
                desired.push(p.value);
            }
        }
        for wme_id in existing {
            let keep = ctx
                .wm
                .wme(wme_id)
                .is_some_and(|w| desired.contains(&w.value));
            if keep {
                if let Some(w) = ctx.wm.wme(wme_id) {
                    let v = w.value;
                    desired.retain(|d| *d != v);
                }
            } else {
                memory::remove_wme(ctx, wme_id)?;
            }
        }
        for value in desired {
            memory::add_wme(
                ctx,
                WmeHome::Acceptable(slot_id),
                id,
                attr,
                value,
                true,
                None,
            )?;
        }
    }
    Ok(())
}
