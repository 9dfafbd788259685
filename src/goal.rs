//! Goal/impasse stack manager.
//!
//! Goals form a simple path from the top state down (invariant 4). Each goal
//! is anchored with a permanent link so ordinary GC never reclaims it; closing
//! a goal recurses into its descendants first, fires the retraction hook with
//! the goal-dependency set, retracts the instantiations matched there, removes
//! the impasse markers, and releases the anchor so the ordinary collector can
//! take the rest. Non-context slots that fail to resolve get an attribute
//! impasse attached to the slot instead of a subgoal.

use crate::agent::Ctx;
use crate::decide::ImpasseKind;
use crate::error::{GoalError, SiaResult, fatal};
use crate::events::{Event, EventKind};
use crate::gc;
use crate::memory;
use crate::slot::SlotId;
use crate::symbol::{GoalFrame, GoalLevel, SymbolId, SymbolTable, TOP_GOAL_LEVEL};
use crate::wme::WmeHome;

/// Which context slot a decision concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A new state was created (an impasse was subgoaled).
    State,
    /// An operator was selected.
    Operator,
}

/// The context stack: a simple path from top state to bottom goal.
#[derive(Debug, Default)]
pub struct GoalStack {
    pub top: Option<SymbolId>,
    pub bottom: Option<SymbolId>,
}

/// Architectural symbols interned once per agent and kept alive for its
/// lifetime (marker attributes and impasse-kind constants).
#[derive(Clone, Copy)]
pub(crate) struct ArchSymbols {
    pub operator: SymbolId,
    pub state: SymbolId,
    pub r#type: SymbolId,
    pub superstate: SymbolId,
    pub attribute: SymbolId,
    pub impasse: SymbolId,
    pub quiescence: SymbolId,
    pub item: SymbolId,
    pub t: SymbolId,
    pub nil: SymbolId,
    pub none: SymbolId,
    pub tie: SymbolId,
    pub conflict: SymbolId,
    pub constraint_failure: SymbolId,
    pub no_change: SymbolId,
}

impl ArchSymbols {
    pub(crate) fn new(syms: &mut SymbolTable) -> Self {
        Self {
            operator: syms.sym_constant("operator"),
            state: syms.sym_constant("state"),
            r#type: syms.sym_constant("type"),
            superstate: syms.sym_constant("superstate"),
            attribute: syms.sym_constant("attribute"),
            impasse: syms.sym_constant("impasse"),
            quiescence: syms.sym_constant("quiescence"),
            item: syms.sym_constant("item"),
            t: syms.sym_constant("t"),
            nil: syms.sym_constant("nil"),
            none: syms.sym_constant("none"),
            tie: syms.sym_constant("tie"),
            conflict: syms.sym_constant("conflict"),
            constraint_failure: syms.sym_constant("constraint-failure"),
            no_change: syms.sym_constant("no-change"),
        }
    }

    /// The constant naming an impasse kind in marker WMEs.
    pub(crate) fn impasse_constant(&self, kind: ImpasseKind) -> SymbolId {
        match kind {
            ImpasseKind::None => self.none,
            ImpasseKind::NoChange => self.no_change,
            ImpasseKind::Tie => self.tie,
            ImpasseKind::Conflict => self.conflict,
            ImpasseKind::ConstraintFailure => self.constraint_failure,
        }
    }
}

fn add_marker_wme(
    ctx: &mut Ctx<'_>,
    frame_id: SymbolId,
    attr: SymbolId,
    value: SymbolId,
) -> SiaResult<()> {
    memory::add_wme(
        ctx,
        WmeHome::ImpasseMarker(frame_id),
        frame_id,
        attr,
        value,
        false,
        None,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Goal creation
// ---------------------------------------------------------------------------

/// Open a goal below `parent` (or the top state when `parent` is `None`),
/// anchored permanently and described by fixed marker WMEs. Returns `None`
/// (with a clean stop) instead of exceeding the configured stack depth.
pub(crate) fn create_goal(
    ctx: &mut Ctx<'_>,
    parent: Option<SymbolId>,
    kind_attr: ContextKind,
    kind: ImpasseKind,
    items: &[SymbolId],
) -> SiaResult<Option<SymbolId>> {
    let level = match parent {
        Some(p) => ctx.syms.expect_id(p)?.level + 1,
        None => TOP_GOAL_LEVEL,
    };
    if level > ctx.options.max_goal_depth() {
        tracing::warn!(level, "maximum goal stack depth exceeded; stopping");
        ctx.run
            .stop_with_reason("maximum goal stack depth exceeded");
        return Ok(None);
    }

    let goal = ctx.syms.make_identifier('S', level);
    let attr_sym = match kind_attr {
        ContextKind::State => ctx.arch.state,
        ContextKind::Operator => ctx.arch.operator,
    };
    {
        let data = ctx.syms.expect_id_mut(goal)?;
        data.frame = Some(Box::new(GoalFrame::new(false, kind, Some(attr_sym))));
    }
    // Permanent anchor: goals are torn down explicitly, never by the collector.
    gc::post_link_addition(ctx, None, goal)?;

    let arch = *ctx.arch;
    add_marker_wme(ctx, goal, arch.r#type, arch.state)?;
    add_marker_wme(ctx, goal, arch.superstate, parent.unwrap_or(arch.nil))?;
    if kind != ImpasseKind::None {
        add_marker_wme(ctx, goal, arch.attribute, attr_sym)?;
        add_marker_wme(ctx, goal, arch.impasse, arch.impasse_constant(kind))?;
        add_marker_wme(ctx, goal, arch.quiescence, arch.t)?;
        for &item in items {
            add_marker_wme(ctx, goal, arch.item, item)?;
        }
    }

    // Every goal owns a context slot for its operator decision.
    let op_slot = memory::find_or_make_slot(ctx, goal, arch.operator)?;
    {
        let data = ctx.syms.expect_id_mut(goal)?;
        let Some(frame) = data.frame.as_mut() else {
            return Err(fatal("goal frame vanished during creation"));
        };
        frame.operator_slot = Some(op_slot);
        frame.higher_goal = parent;
    }

    match parent {
        Some(p) => {
            if !ctx.syms.isa_goal(p) {
                return Err(GoalError::NotAGoal {
                    display: ctx.syms.display(p),
                }
                .into());
            }
            let has_lower = ctx
                .syms
                .id_data(p)
                .and_then(|d| d.frame.as_ref())
                .is_some_and(|f| f.lower_goal.is_some());
            if has_lower {
                return Err(fatal("goal stack would branch"));
            }
            if let Some(f) = ctx.syms.id_data_mut(p).and_then(|d| d.frame.as_mut()) {
                f.lower_goal = Some(goal);
            }
        }
        None => ctx.stack.top = Some(goal),
    }
    ctx.stack.bottom = Some(goal);

    tracing::info!(
        goal = %ctx.syms.display(goal),
        level,
        kind = %kind,
        "goal created"
    );
    ctx.events.fire(
        EventKind::GoalCreated,
        &Event::Goal { goal, level, kind },
    );
    if kind != ImpasseKind::None {
        ctx.events
            .fire(EventKind::ImpasseCreated, &Event::Impasse { id: goal, kind });
    }
    ctx.run.count_context_decision(level, ContextKind::State);
    Ok(Some(goal))
}

// ---------------------------------------------------------------------------
// Goal removal
// ---------------------------------------------------------------------------

/// Close `goal` and everything below it, bottom-up.
pub(crate) fn remove_goal_and_descendents(ctx: &mut Ctx<'_>, goal: SymbolId) -> SiaResult<()> {
    let frame = {
        let data = ctx.syms.expect_id(goal)?;
        let Some(frame) = data.frame.as_ref() else {
            return Err(GoalError::NotAGoal {
                display: ctx.syms.display(goal),
            }
            .into());
        };
        (**frame).clone()
    };
    if let Some(lower) = frame.lower_goal {
        remove_goal_and_descendents(ctx, lower)?;
    }

    // Chunker hook: hand over the dependency set before anything retracts.
    let gds: Vec<_> = frame
        .gds_wmes
        .iter()
        .filter_map(|w| ctx.wm.wme(*w))
        .map(|w| w.snapshot())
        .collect();
    ctx.events.fire(
        EventKind::BeforeGoalRetraction,
        &Event::GoalRetraction { goal, gds },
    );
    for wme_id in &frame.gds_wmes {
        if let Some(wme) = ctx.wm.wme_mut(*wme_id) {
            wme.gds_goal = None;
            wme.reference_count = wme.reference_count.saturating_sub(1);
        }
    }
    if let Some(f) = ctx
        .syms
        .id_data_mut(goal)
        .and_then(|d| d.frame.as_mut())
    {
        f.gds_wmes.clear();
    }

    // Preferences asserted by this goal go atomically.
    for inst_id in ctx.insts.matched_in(goal) {
        memory::retract_instantiation(ctx, inst_id)?;
    }

    let markers = ctx
        .syms
        .id_data(goal)
        .and_then(|d| d.frame.as_ref())
        .map(|f| f.impasse_wmes.clone())
        .unwrap_or_default();
    for wme_id in markers {
        memory::remove_wme(ctx, wme_id)?;
    }

    // Release the permanent anchor; ordinary GC reclaims the rest.
    gc::post_link_removal(ctx, None, goal)?;

    match frame.higher_goal {
        Some(parent) => {
            if let Some(f) = ctx
                .syms
                .id_data_mut(parent)
                .and_then(|d| d.frame.as_mut())
            {
                f.lower_goal = None;
            }
            ctx.stack.bottom = Some(parent);
        }
        None => {
            ctx.stack.top = None;
            ctx.stack.bottom = None;
        }
    }
    if let Some(f) = ctx
        .syms
        .id_data_mut(goal)
        .and_then(|d| d.frame.as_mut())
    {
        f.higher_goal = None;
    }

    let level = ctx.syms.id_data(goal).map(|d| d.level).unwrap_or(0);
    tracing::info!(goal = %ctx.syms.display(goal), level, "goal removed");
    ctx.events.fire(
        EventKind::GoalRemoved,
        &Event::Goal {
            goal,
            level,
            kind: frame.impasse_kind,
        },
    );
    if frame.impasse_kind != ImpasseKind::None {
        ctx.events.fire(
            EventKind::ImpasseRemoved,
            &Event::Impasse {
                id: goal,
                kind: frame.impasse_kind,
            },
        );
    }
    // The stack manager's creation reference. Markers and slots pending
    // deallocation keep the entry alive until the flush finishes.
    ctx.syms.release(goal)?;
    Ok(())
}

/// Close the goal immediately below `goal`, if any.
pub(crate) fn remove_lower_goals(ctx: &mut Ctx<'_>, goal: SymbolId) -> SiaResult<()> {
    let lower = ctx
        .syms
        .id_data(goal)
        .and_then(|d| d.frame.as_ref())
        .and_then(|f| f.lower_goal);
    if let Some(lower) = lower {
        remove_goal_and_descendents(ctx, lower)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Attribute impasses (non-context slots)
// ---------------------------------------------------------------------------

/// Attach an impasse identifier to an undecided non-context slot.
pub(crate) fn create_attribute_impasse(
    ctx: &mut Ctx<'_>,
    slot_id: SlotId,
    kind: ImpasseKind,
    items: &[SymbolId],
) -> SiaResult<()> {
    let (owner, attr) = {
        let slot = ctx.wm.expect_slot(slot_id)?;
        (slot.id, slot.attr)
    };
    let level = ctx.syms.expect_id(owner)?.level;
    let impasse = ctx.syms.make_identifier('I', level);
    {
        let data = ctx.syms.expect_id_mut(impasse)?;
        data.frame = Some(Box::new(GoalFrame::new(true, kind, Some(attr))));
    }
    gc::post_link_addition(ctx, None, impasse)?;
    let arch = *ctx.arch;
    add_marker_wme(ctx, impasse, arch.attribute, attr)?;
    add_marker_wme(ctx, impasse, arch.impasse, arch.impasse_constant(kind))?;
    for &item in items {
        add_marker_wme(ctx, impasse, arch.item, item)?;
    }
    ctx.wm.expect_slot_mut(slot_id)?.impasse = Some(impasse);
    tracing::debug!(
        impasse = %ctx.syms.display(impasse),
        attr = %ctx.syms.display(attr),
        kind = %kind,
        "attribute impasse created"
    );
    ctx.events
        .fire(EventKind::ImpasseCreated, &Event::Impasse { id: impasse, kind });
    Ok(())
}

/// Release the attribute impasse hanging off a slot, if any.
pub(crate) fn remove_attribute_impasse(ctx: &mut Ctx<'_>, slot_id: SlotId) -> SiaResult<()> {
    let Some(impasse) = ctx.wm.slot_mut(slot_id).and_then(|s| s.impasse.take()) else {
        return Ok(());
    };
    let (markers, kind) = {
        let Some(frame) = ctx.syms.id_data(impasse).and_then(|d| d.frame.as_ref()) else {
            return Ok(());
        };
        (frame.impasse_wmes.clone(), frame.impasse_kind)
    };
    for wme_id in markers {
        memory::remove_wme(ctx, wme_id)?;
    }
    gc::post_link_removal(ctx, None, impasse)?;
    ctx.events
        .fire(EventKind::ImpasseRemoved, &Event::Impasse { id: impasse, kind });
    ctx.syms.release(impasse)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Goal-dependency sets
// ---------------------------------------------------------------------------

/// Insertion hook: record that `goal`'s decision depended on `wme`. The WME
/// is pinned until the goal lets go; removing it invalidates the goal.
pub(crate) fn add_wme_to_gds(
    ctx: &mut Ctx<'_>,
    goal: SymbolId,
    wme_id: crate::wme::WmeId,
) -> SiaResult<()> {
    if !ctx.syms.isa_goal(goal) {
        return Err(GoalError::NotAGoal {
            display: ctx.syms.display(goal),
        }
        .into());
    }
    {
        let Some(frame) = ctx.syms.id_data_mut(goal).and_then(|d| d.frame.as_mut()) else {
            return Err(fatal("goal frame missing in add_wme_to_gds"));
        };
        if frame.gds_wmes.contains(&wme_id) {
            return Ok(());
        }
        frame.gds_wmes.push(wme_id);
    }
    let wme = ctx
        .wm
        .wme_mut(wme_id)
        .ok_or_else(|| crate::error::MemoryError::UnknownWme {
            timetag: wme_id.timetag(),
        })?;
    wme.gds_goal = Some(goal);
    wme.reference_count += 1;
    Ok(())
}

/// Depth of the stack below and including `goal` (used by tests and traces).
pub(crate) fn stack_depth(syms: &SymbolTable, stack: &GoalStack) -> GoalLevel {
    let mut depth = 0;
    let mut goal = stack.top;
    while let Some(g) = goal {
        depth += 1;
        goal = syms
            .id_data(g)
            .and_then(|d| d.frame.as_ref())
            .and_then(|f| f.lower_goal);
    }
    depth
}
