//! Working-memory store: WME and slot arenas plus the buffered-change queues.
//!
//! All additions and removals are buffered and pushed to the external matcher
//! exactly once per scheduler phase (by `gc::flush`), never incrementally.
//! The cross-store operations here (`add_wme`, `remove_wme`, preference and
//! instantiation plumbing) run against the agent context so link bookkeeping,
//! events, and the output journal stay consistent in one place.

use std::collections::HashMap;

use crate::agent::Ctx;
use crate::error::{MemoryError, SiaResult, fatal};
use crate::events::{Event, EventKind};
use crate::gc;
use crate::io::OutputChange;
use crate::matcher::PreferenceSpec;
use crate::pref::{InstId, Instantiation, PrefId, Preference, PreferenceKind};
use crate::slot::{Slot, SlotId};
use crate::symbol::SymbolId;
use crate::wme::{Wme, WmeHome, WmeId, WmeSnapshot};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Per-agent working-memory store.
pub struct WorkingMemory {
    wmes: HashMap<WmeId, Wme>,
    next_timetag: u64,
    slots: HashMap<SlotId, Slot>,
    slot_index: HashMap<(SymbolId, SymbolId), SlotId>,
    next_slot: u64,
    /// Non-context slots whose preference set changed since last decided.
    pub(crate) changed_slots: Vec<SlotId>,
    /// Context slots whose acceptable/require set changed since last reconciled.
    pub(crate) changed_context_acceptables: Vec<SlotId>,
    /// WMEs added this phase, awaiting the matcher.
    pub(crate) buffered_adds: Vec<WmeId>,
    /// WMEs removed this phase, awaiting the matcher.
    pub(crate) buffered_removes: Vec<WmeId>,
    /// Removed WMEs still pinned (e.g. by a GDS) after the matcher saw them.
    pub(crate) pending_dealloc: Vec<WmeId>,
    /// Slots that may have emptied this phase.
    pub(crate) slots_to_discard: Vec<SlotId>,
    /// WME changes on output-designated identifiers, drained each Output phase.
    pub(crate) output_journal: Vec<OutputChange>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self {
            wmes: HashMap::new(),
            next_timetag: 1,
            slots: HashMap::new(),
            slot_index: HashMap::new(),
            next_slot: 1,
            changed_slots: Vec::new(),
            changed_context_acceptables: Vec::new(),
            buffered_adds: Vec::new(),
            buffered_removes: Vec::new(),
            pending_dealloc: Vec::new(),
            slots_to_discard: Vec::new(),
            output_journal: Vec::new(),
        }
    }

    pub fn wme(&self, id: WmeId) -> Option<&Wme> {
        self.wmes.get(&id)
    }

    pub fn wme_mut(&mut self, id: WmeId) -> Option<&mut Wme> {
        self.wmes.get_mut(&id)
    }

    pub(crate) fn expect_wme(&self, id: WmeId) -> SiaResult<&Wme> {
        self.wmes.get(&id).ok_or_else(|| {
            MemoryError::UnknownWme {
                timetag: id.timetag(),
            }
            .into()
        })
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots.get_mut(&id)
    }

    pub(crate) fn expect_slot(&self, id: SlotId) -> SiaResult<&Slot> {
        self.slots
            .get(&id)
            .ok_or_else(|| MemoryError::UnknownSlot { raw: id.get() }.into())
    }

    pub(crate) fn expect_slot_mut(&mut self, id: SlotId) -> SiaResult<&mut Slot> {
        self.slots
            .get_mut(&id)
            .ok_or_else(|| MemoryError::UnknownSlot { raw: id.get() }.into())
    }

    /// Find the slot for (id, attr) without creating it.
    pub fn find_slot(&self, id: SymbolId, attr: SymbolId) -> Option<SlotId> {
        self.slot_index.get(&(id, attr)).copied()
    }

    /// Count of WMEs currently in working memory (not yet removed).
    pub fn wme_count(&self) -> usize {
        self.wmes.values().filter(|w| !w.removed).count()
    }

    /// Whether a live (id ^attr value) triple exists.
    pub fn contains(&self, id: SymbolId, attr: SymbolId, value: SymbolId) -> bool {
        self.wmes
            .values()
            .any(|w| !w.removed && w.id == id && w.attr == attr && w.value == value)
    }

    /// Snapshots of every live WME with the given id.
    pub fn wmes_of(&self, id: SymbolId) -> Vec<WmeSnapshot> {
        let mut out: Vec<WmeSnapshot> = self
            .wmes
            .values()
            .filter(|w| !w.removed && w.id == id)
            .map(Wme::snapshot)
            .collect();
        out.sort_by_key(|w| w.timetag);
        out
    }

    pub(crate) fn buffers_empty(&self) -> bool {
        self.buffered_adds.is_empty() && self.buffered_removes.is_empty()
    }

    fn alloc_wme(&mut self, mut wme: Wme) -> SiaResult<WmeId> {
        let timetag = self.next_timetag;
        self.next_timetag += 1;
        wme.timetag = timetag;
        let id = WmeId::new(timetag)
            .ok_or_else(|| fatal("timetag counter wrapped to zero"))?;
        self.wmes.insert(id, wme);
        Ok(id)
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Find or create the slot for (id, attr). The slot is a context slot when
/// `id` is a goal and `attr` is the architectural `operator` attribute.
pub(crate) fn find_or_make_slot(
    ctx: &mut Ctx<'_>,
    id: SymbolId,
    attr: SymbolId,
) -> SiaResult<SlotId> {
    if let Some(slot_id) = ctx.wm.find_slot(id, attr) {
        if let Some(slot) = ctx.wm.slot_mut(slot_id) {
            slot.marked_for_deletion = false;
        }
        return Ok(slot_id);
    }
    let is_context = ctx.syms.isa_goal(id) && attr == ctx.arch.operator;
    let raw = ctx.wm.next_slot;
    ctx.wm.next_slot += 1;
    let slot_id =
        SlotId::from_raw(raw).ok_or_else(|| fatal("slot counter wrapped to zero"))?;
    ctx.syms.acquire(id);
    ctx.syms.acquire(attr);
    ctx.wm.slots.insert(slot_id, Slot::new(id, attr, is_context));
    ctx.wm.slot_index.insert((id, attr), slot_id);
    ctx.syms.expect_id_mut(id)?.slots.push(slot_id);
    Ok(slot_id)
}

/// Discard every queued slot that is still empty, releasing its symbols.
pub(crate) fn discard_emptied_slots(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    let queued = std::mem::take(&mut ctx.wm.slots_to_discard);
    for slot_id in queued {
        let Some(slot) = ctx.wm.slot(slot_id) else {
            continue;
        };
        if !slot.is_empty() || !slot.marked_for_deletion {
            continue;
        }
        let (id, attr) = (slot.id, slot.attr);
        ctx.wm.slots.remove(&slot_id);
        ctx.wm.slot_index.remove(&(id, attr));
        ctx.wm.changed_slots.retain(|s| *s != slot_id);
        ctx.wm.changed_context_acceptables.retain(|s| *s != slot_id);
        if let Some(data) = ctx.syms.id_data_mut(id) {
            data.slots.retain(|s| *s != slot_id);
            if let Some(frame) = data.frame.as_mut()
                && frame.operator_slot == Some(slot_id)
            {
                frame.operator_slot = None;
            }
        }
        ctx.syms.release(id)?;
        ctx.syms.release(attr)?;
    }
    Ok(())
}

fn queue_slot_discard_if_empty(ctx: &mut Ctx<'_>, slot_id: SlotId) {
    let Some(slot) = ctx.wm.slot(slot_id) else {
        return;
    };
    if !slot.is_empty() {
        return;
    }
    // A goal keeps its context slot for its whole lifetime, even with no
    // preferences left; the slot leaves with the goal itself.
    if slot.is_context && ctx.syms.isa_goal(slot.id) {
        return;
    }
    if let Some(slot) = ctx.wm.slot_mut(slot_id) {
        slot.marked_for_deletion = true;
        ctx.wm.slots_to_discard.push(slot_id);
    }
}

fn mark_slot_changed(ctx: &mut Ctx<'_>, slot_id: SlotId) {
    let Some(slot) = ctx.wm.slot_mut(slot_id) else {
        return;
    };
    if slot.changed {
        return;
    }
    slot.changed = true;
    if !slot.is_context {
        // Context slots are picked up by the decision phase's goal walk.
        ctx.wm.changed_slots.push(slot_id);
    }
}

// ---------------------------------------------------------------------------
// WMEs
// ---------------------------------------------------------------------------

/// Add a WME to working memory: links, buffers, journal, and the added hook.
pub(crate) fn add_wme(
    ctx: &mut Ctx<'_>,
    home: WmeHome,
    id: SymbolId,
    attr: SymbolId,
    value: SymbolId,
    acceptable: bool,
    preference: Option<PrefId>,
) -> SiaResult<WmeId> {
    ctx.syms.acquire(id);
    ctx.syms.acquire(attr);
    ctx.syms.acquire(value);
    if let Some(p) = preference {
        ctx.prefs.acquire(p);
    }
    let wme_id = ctx.wm.alloc_wme(Wme {
        id,
        attr,
        value,
        acceptable,
        timetag: 0,
        reference_count: 1,
        preference,
        gds_goal: None,
        home,
        removed: false,
    })?;
    match home {
        WmeHome::Slot(s) => ctx.wm.expect_slot_mut(s)?.wmes.push(wme_id),
        WmeHome::Acceptable(s) => ctx.wm.expect_slot_mut(s)?.acceptable_wmes.push(wme_id),
        WmeHome::Input => ctx.syms.expect_id_mut(id)?.input_wmes.push(wme_id),
        WmeHome::ImpasseMarker(goal) => {
            let data = ctx.syms.expect_id_mut(goal)?;
            let Some(frame) = data.frame.as_mut() else {
                return Err(fatal("impasse-marker WME on an identifier without a frame"));
            };
            frame.impasse_wmes.push(wme_id);
        }
    }
    if ctx.syms.is_identifier(attr) {
        gc::post_link_addition(ctx, Some(id), attr)?;
    }
    if ctx.syms.is_identifier(value) {
        gc::post_link_addition(ctx, Some(id), value)?;
    }
    ctx.wm.buffered_adds.push(wme_id);
    let snapshot = ctx
        .wm
        .expect_wme(wme_id)?
        .snapshot();
    if ctx
        .syms
        .id_data(id)
        .is_some_and(|d| d.output_root)
    {
        ctx.wm.output_journal.push(OutputChange {
            added: true,
            wme: snapshot,
        });
    }
    tracing::trace!(
        timetag = snapshot.timetag,
        id = %ctx.syms.display(id),
        attr = %ctx.syms.display(attr),
        value = %ctx.syms.display(value),
        "wme added"
    );
    ctx.events
        .fire(EventKind::WmeAdded, &Event::Wme { wme: snapshot, added: true });
    Ok(wme_id)
}

/// Remove a WME from working memory. The arena entry survives until the
/// matcher has seen the removal (and any GDS holding it lets go).
pub(crate) fn remove_wme(ctx: &mut Ctx<'_>, wme_id: WmeId) -> SiaResult<()> {
    let (snapshot, home, gds_goal) = {
        let wme = ctx.wm.expect_wme(wme_id)?;
        if wme.removed {
            return Ok(());
        }
        (wme.snapshot(), wme.home, wme.gds_goal)
    };
    if let Some(w) = ctx.wm.wme_mut(wme_id) {
        w.removed = true;
    }
    match home {
        WmeHome::Slot(s) => {
            if let Some(slot) = ctx.wm.slot_mut(s) {
                slot.wmes.retain(|w| *w != wme_id);
            }
            queue_slot_discard_if_empty(ctx, s);
        }
        WmeHome::Acceptable(s) => {
            if let Some(slot) = ctx.wm.slot_mut(s) {
                slot.acceptable_wmes.retain(|w| *w != wme_id);
            }
            queue_slot_discard_if_empty(ctx, s);
        }
        WmeHome::Input => {
            if let Some(data) = ctx.syms.id_data_mut(snapshot.id) {
                data.input_wmes.retain(|w| *w != wme_id);
            }
        }
        WmeHome::ImpasseMarker(goal) => {
            if let Some(frame) = ctx
                .syms
                .id_data_mut(goal)
                .and_then(|d| d.frame.as_mut())
            {
                frame.impasse_wmes.retain(|w| *w != wme_id);
            }
        }
    }
    if ctx.syms.is_identifier(snapshot.attr) {
        gc::post_link_removal(ctx, Some(snapshot.id), snapshot.attr)?;
    }
    if ctx.syms.is_identifier(snapshot.value) {
        gc::post_link_removal(ctx, Some(snapshot.id), snapshot.value)?;
    }
    // A removed GDS member invalidates its goal; the decision phase tears it down.
    if let Some(goal) = gds_goal {
        ctx.run.gds_violations.push(goal);
    }
    if ctx
        .syms
        .id_data(snapshot.id)
        .is_some_and(|d| d.output_root)
    {
        ctx.wm.output_journal.push(OutputChange {
            added: false,
            wme: snapshot,
        });
    }
    tracing::trace!(timetag = snapshot.timetag, "wme removed");
    ctx.events
        .fire(EventKind::WmeRemoved, &Event::Wme { wme: snapshot, added: false });
    ctx.wm.buffered_removes.push(wme_id);
    Ok(())
}

/// Free removed WMEs the matcher has already seen, releasing symbol and
/// preference references. WMEs pinned by a GDS stay until the goal lets go.
pub(crate) fn deallocate_removed_wmes(ctx: &mut Ctx<'_>) -> SiaResult<()> {
    let mut pending = std::mem::take(&mut ctx.wm.pending_dealloc);
    pending.extend(ctx.wm.buffered_removes.drain(..));
    for wme_id in pending {
        let still_pinned = {
            let Some(wme) = ctx.wm.wme(wme_id) else {
                continue;
            };
            wme.reference_count > 1
        };
        if still_pinned {
            ctx.wm.pending_dealloc.push(wme_id);
            continue;
        }
        let Some(wme) = ctx.wm.wmes.remove(&wme_id) else {
            continue;
        };
        ctx.syms.release(wme.id)?;
        ctx.syms.release(wme.attr)?;
        ctx.syms.release(wme.value)?;
        if let Some(p) = wme.preference {
            release_preference(ctx, p)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Release one reference to a preference, freeing its symbols at zero.
pub(crate) fn release_preference(ctx: &mut Ctx<'_>, pref_id: PrefId) -> SiaResult<()> {
    if let Some(freed) = ctx.prefs.release(pref_id) {
        ctx.syms.release(freed.id)?;
        ctx.syms.release(freed.attr)?;
        ctx.syms.release(freed.value)?;
        if let Some(r) = freed.referent {
            ctx.syms.release(r)?;
        }
    }
    Ok(())
}

/// Materialize a preference from a spec and install it in its slot.
///
/// The returned handle carries one reference for the caller (normally the
/// owning instantiation) on top of the slot's own reference.
pub(crate) fn add_preference(
    ctx: &mut Ctx<'_>,
    spec: &PreferenceSpec,
    inst: Option<InstId>,
) -> SiaResult<PrefId> {
    if spec.kind.requires_referent() && spec.referent.is_none() {
        return Err(MemoryError::MissingReferent {
            kind: spec.kind.to_string(),
        }
        .into());
    }
    ctx.syms.acquire(spec.id);
    ctx.syms.acquire(spec.attr);
    ctx.syms.acquire(spec.value);
    if let Some(r) = spec.referent {
        ctx.syms.acquire(r);
    }
    let pref_id = ctx.prefs.alloc(Preference {
        kind: spec.kind,
        id: spec.id,
        attr: spec.attr,
        value: spec.value,
        referent: spec.referent,
        o_supported: spec.o_supported,
        inst,
        slot: None,
        reference_count: 0,
    });
    // Caller's reference.
    ctx.prefs.acquire(pref_id);

    let slot_id = find_or_make_slot(ctx, spec.id, spec.attr)?;
    ctx.prefs.acquire(pref_id);
    let is_context;
    {
        let slot = ctx.wm.expect_slot_mut(slot_id)?;
        slot.prefs[spec.kind.index()].push(pref_id);
        slot.all_prefs.push(pref_id);
        is_context = slot.is_context;
    }
    if let Some(p) = ctx.prefs.get_mut(pref_id) {
        p.slot = Some(slot_id);
    }
    mark_slot_changed(ctx, slot_id);
    if is_context
        && matches!(spec.kind, PreferenceKind::Acceptable | PreferenceKind::Require)
    {
        let slot = ctx.wm.expect_slot_mut(slot_id)?;
        if !slot.acceptable_changed {
            slot.acceptable_changed = true;
            ctx.wm.changed_context_acceptables.push(slot_id);
        }
    }
    tracing::trace!(
        kind = %spec.kind,
        id = %ctx.syms.display(spec.id),
        attr = %ctx.syms.display(spec.attr),
        value = %ctx.syms.display(spec.value),
        "preference asserted"
    );
    Ok(pref_id)
}

/// Take a preference out of its slot, marking the slot changed.
pub(crate) fn remove_preference_from_slot(
    ctx: &mut Ctx<'_>,
    pref_id: PrefId,
) -> SiaResult<()> {
    let Some(slot_id) = ctx.prefs.get(pref_id).and_then(|p| p.slot) else {
        return Ok(());
    };
    let (kind, is_context) = {
        let Some(p) = ctx.prefs.get(pref_id) else {
            return Ok(());
        };
        let kind = p.kind;
        let Some(slot) = ctx.wm.slot_mut(slot_id) else {
            return Ok(());
        };
        slot.prefs[kind.index()].retain(|p| *p != pref_id);
        slot.all_prefs.retain(|p| *p != pref_id);
        (kind, slot.is_context)
    };
    if let Some(p) = ctx.prefs.get_mut(pref_id) {
        p.slot = None;
    }
    mark_slot_changed(ctx, slot_id);
    if is_context
        && matches!(kind, PreferenceKind::Acceptable | PreferenceKind::Require)
    {
        let slot = ctx.wm.expect_slot_mut(slot_id)?;
        if !slot.acceptable_changed {
            slot.acceptable_changed = true;
            ctx.wm.changed_context_acceptables.push(slot_id);
        }
    }
    queue_slot_discard_if_empty(ctx, slot_id);
    release_preference(ctx, pref_id)
}

// ---------------------------------------------------------------------------
// Instantiations
// ---------------------------------------------------------------------------

/// Record a rule firing: install all of its preferences atomically.
pub(crate) fn create_instantiation(
    ctx: &mut Ctx<'_>,
    match_goal: Option<SymbolId>,
    specs: &[PreferenceSpec],
) -> SiaResult<InstId> {
    let inst_id = ctx.insts.alloc(Instantiation {
        preferences: Vec::new(),
        match_goal,
    });
    let mut prefs = Vec::with_capacity(specs.len());
    for spec in specs {
        prefs.push(add_preference(ctx, spec, Some(inst_id))?);
    }
    if let Some(inst) = ctx.insts.get_mut(inst_id) {
        inst.preferences = prefs;
    }
    Ok(inst_id)
}

/// Retract a rule firing: its i-supported preferences leave their slots
/// atomically; o-supported ones stay with the slot.
pub(crate) fn retract_instantiation(ctx: &mut Ctx<'_>, inst_id: InstId) -> SiaResult<()> {
    let Some(inst) = ctx.insts.remove(inst_id) else {
        return Err(MemoryError::UnknownInstantiation { raw: inst_id.get() }.into());
    };
    for pref_id in inst.preferences {
        let o_supported = ctx
            .prefs
            .get(pref_id)
            .is_some_and(|p| p.o_supported);
        if o_supported {
            if let Some(p) = ctx.prefs.get_mut(pref_id) {
                p.inst = None;
            }
        } else {
            remove_preference_from_slot(ctx, pref_id)?;
        }
        // Instantiation's own reference.
        release_preference(ctx, pref_id)?;
    }
    Ok(())
}
