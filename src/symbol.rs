//! Core symbol types for the sia engine.
//!
//! Symbols are the atomic units of the decision core. Every working-memory
//! element, preference, and goal frame is built from interned, reference-counted
//! symbols held in a per-agent [`SymbolTable`]. A symbol is one of five variants
//! (identifier, variable, symbolic constant, integer constant, float constant);
//! identifiers additionally carry the goal-stack bookkeeping the ownership/GC
//! subsystem lives on.

use std::collections::HashMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::decide::ImpasseKind;
use crate::error::{SiaResult, SymbolError};
use crate::slot::SlotId;
use crate::wme::WmeId;

/// Goal-stack level. The top goal is level 1; deeper subgoals count up.
pub type GoalLevel = u32;

/// Level of the top goal.
pub const TOP_GOAL_LEVEL: GoalLevel = 1;

/// Unique, niche-optimized handle for a symbol-table entry.
///
/// Uses `NonZeroU64` so that `Option<SymbolId>` is the same size as `SymbolId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Create a `SymbolId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SymbolId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym:{}", self.0)
    }
}

/// The five symbol variants.
///
/// Equality, ordering, and hashing are per variant; float constants are
/// interned by bit pattern so the table key is hashable.
#[derive(Debug, Clone)]
pub enum SymbolValue {
    /// A working-memory identifier with goal-stack bookkeeping.
    Identifier(IdentifierData),
    /// A rule variable such as `<x>` (only flows through the matcher seam).
    Variable(String),
    /// A symbolic constant such as `state` or `ponder`.
    SymConstant(String),
    /// An integer constant.
    IntConstant(i64),
    /// A float constant.
    FloatConstant(f64),
}

/// Mutable bookkeeping attached to every identifier.
///
/// The level/link fields implement invariant (1): an identifier's level equals
/// the minimum goal level from which it is currently reachable. The two marker
/// fields are transitive-closure "colors" reused across graph walks so no pass
/// ever has to clear a visited set.
#[derive(Debug, Clone)]
pub struct IdentifierData {
    /// Name letter, e.g. the `S` of `S3`.
    pub letter: char,
    /// Name number, e.g. the `3` of `S3`.
    pub number: u64,
    /// Goal-stack level this identifier currently belongs to.
    pub level: GoalLevel,
    /// Level this identifier was last promoted to.
    pub promotion_level: GoalLevel,
    /// Number of links (WMEs plus the permanent goal anchor) pointing at it.
    pub link_count: u32,
    /// Set while a link from a deeper level may exist, making the recorded
    /// level an upper bound until the next demotion pass confirms it.
    pub could_be_linked_from_below: bool,
    /// Set while the identifier sits on the demotion queue (dedup flag).
    pub on_demotion_queue: bool,
    /// Transitive-closure color for the mark phase.
    pub tc_marker: u64,
    /// Transitive-closure color for the goal-stack walk.
    pub walk_marker: u64,
    /// Slots owned by this identifier.
    pub slots: Vec<SlotId>,
    /// WMEs inserted by the I/O adapter with this identifier as their id.
    pub input_wmes: Vec<WmeId>,
    /// Set when the I/O adapter designated this identifier as an output root.
    pub output_root: bool,
    /// Goal/impasse frame, present only for goals and attribute impasses.
    pub frame: Option<Box<GoalFrame>>,
}

/// Bookkeeping for a goal or attribute-impasse identifier.
#[derive(Debug, Clone)]
pub struct GoalFrame {
    /// `false` for goals on the context stack, `true` for attribute impasses
    /// hanging off ordinary slots.
    pub isa_impasse: bool,
    /// Why this frame exists.
    pub impasse_kind: ImpasseKind,
    /// The undecided attribute (`operator`, `state`, or an ordinary attribute).
    pub impasse_attr: Option<SymbolId>,
    /// Next goal up the stack (toward the top goal).
    pub higher_goal: Option<SymbolId>,
    /// Next goal down the stack. Invariant (4): at most one, no branching.
    pub lower_goal: Option<SymbolId>,
    /// The goal's operator slot (context slot). `None` for attribute impasses.
    pub operator_slot: Option<SlotId>,
    /// Fixed marker WMEs describing the impasse (`^type state`, `^impasse tie`, ...).
    pub impasse_wmes: Vec<WmeId>,
    /// Goal-dependency set: WMEs this goal's decision depended on. Maintained
    /// through the insertion hook; consumed by the external chunker.
    pub gds_wmes: Vec<WmeId>,
}

impl GoalFrame {
    pub(crate) fn new(isa_impasse: bool, kind: ImpasseKind, attr: Option<SymbolId>) -> Self {
        Self {
            isa_impasse,
            impasse_kind: kind,
            impasse_attr: attr,
            higher_goal: None,
            lower_goal: None,
            operator_slot: None,
            impasse_wmes: Vec::new(),
            gds_wmes: Vec::new(),
        }
    }
}

struct SymbolEntry {
    refcount: u32,
    value: SymbolValue,
}

// ---------------------------------------------------------------------------
// Symbol table
// ---------------------------------------------------------------------------

/// Per-agent interning table with explicit reference counting.
///
/// Interning returns a handle with one reference already acquired; every
/// structure that stores a handle owns one reference and must `release` it
/// when it lets go. Entries are reclaimed when their count reaches zero.
/// Identifier *reachability* is tracked separately through link counts; a
/// disconnected identifier can still have a positive refcount while buffered
/// WMEs mentioning it await the matcher.
pub struct SymbolTable {
    entries: HashMap<SymbolId, SymbolEntry>,
    sym_constants: HashMap<String, SymbolId>,
    variables: HashMap<String, SymbolId>,
    int_constants: HashMap<i64, SymbolId>,
    float_constants: HashMap<u64, SymbolId>,
    identifiers: HashMap<(char, u64), SymbolId>,
    id_counters: HashMap<char, u64>,
    next_raw: u64,
    next_tc: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            sym_constants: HashMap::new(),
            variables: HashMap::new(),
            int_constants: HashMap::new(),
            float_constants: HashMap::new(),
            identifiers: HashMap::new(),
            id_counters: HashMap::new(),
            next_raw: 1,
            next_tc: 1,
        }
    }

    fn alloc(&mut self, value: SymbolValue) -> SymbolId {
        let raw = self.next_raw;
        self.next_raw += 1;
        let id = SymbolId::new(raw).unwrap_or_else(|| unreachable!("raw starts at 1"));
        self.entries.insert(id, SymbolEntry { refcount: 1, value });
        id
    }

    /// Intern a symbolic constant. Returns a handle with one reference acquired.
    pub fn sym_constant(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.sym_constants.get(name) {
            self.acquire(id);
            return id;
        }
        let id = self.alloc(SymbolValue::SymConstant(name.to_string()));
        self.sym_constants.insert(name.to_string(), id);
        id
    }

    /// Intern a variable (matcher-side symbol). One reference acquired.
    pub fn variable(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.variables.get(name) {
            self.acquire(id);
            return id;
        }
        let id = self.alloc(SymbolValue::Variable(name.to_string()));
        self.variables.insert(name.to_string(), id);
        id
    }

    /// Intern an integer constant. One reference acquired.
    pub fn int_constant(&mut self, v: i64) -> SymbolId {
        if let Some(&id) = self.int_constants.get(&v) {
            self.acquire(id);
            return id;
        }
        let id = self.alloc(SymbolValue::IntConstant(v));
        self.int_constants.insert(v, id);
        id
    }

    /// Intern a float constant (keyed by bit pattern). One reference acquired.
    pub fn float_constant(&mut self, v: f64) -> SymbolId {
        let bits = v.to_bits();
        if let Some(&id) = self.float_constants.get(&bits) {
            self.acquire(id);
            return id;
        }
        let id = self.alloc(SymbolValue::FloatConstant(v));
        self.float_constants.insert(bits, id);
        id
    }

    /// Create a fresh identifier at the given goal-stack level.
    ///
    /// The name number is drawn from a per-letter counter (`S1`, `S2`, `O1`, ...).
    /// One reference acquired.
    pub fn make_identifier(&mut self, letter: char, level: GoalLevel) -> SymbolId {
        let counter = self.id_counters.entry(letter).or_insert(0);
        *counter += 1;
        let number = *counter;
        let id = self.alloc(SymbolValue::Identifier(IdentifierData {
            letter,
            number,
            level,
            promotion_level: level,
            link_count: 0,
            could_be_linked_from_below: false,
            on_demotion_queue: false,
            tc_marker: 0,
            walk_marker: 0,
            slots: Vec::new(),
            input_wmes: Vec::new(),
            output_root: false,
            frame: None,
        }));
        self.identifiers.insert((letter, number), id);
        id
    }

    /// Look up a live identifier by name, without acquiring a reference.
    pub fn find_identifier(&self, letter: char, number: u64) -> Option<SymbolId> {
        self.identifiers.get(&(letter, number)).copied()
    }

    /// Acquire one reference.
    pub fn acquire(&mut self, id: SymbolId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.refcount += 1;
        }
    }

    /// Release one reference, reclaiming the entry at zero.
    pub fn release(&mut self, id: SymbolId) -> SiaResult<()> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(SymbolError::Unknown { raw: id.get() }.into());
        };
        if entry.refcount == 0 {
            let display = self.display(id);
            return Err(SymbolError::RefcountUnderflow { display }.into());
        }
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let Some(entry) = self.entries.remove(&id) else {
                unreachable!("entry present above");
            };
            match entry.value {
                SymbolValue::Identifier(data) => {
                    self.identifiers.remove(&(data.letter, data.number));
                }
                SymbolValue::Variable(name) => {
                    self.variables.remove(&name);
                }
                SymbolValue::SymConstant(name) => {
                    self.sym_constants.remove(&name);
                }
                SymbolValue::IntConstant(v) => {
                    self.int_constants.remove(&v);
                }
                SymbolValue::FloatConstant(v) => {
                    self.float_constants.remove(&v.to_bits());
                }
            }
        }
        Ok(())
    }

    /// Current reference count, or `None` if the entry is gone.
    pub fn refcount(&self, id: SymbolId) -> Option<u32> {
        self.entries.get(&id).map(|e| e.refcount)
    }

    /// Whether the entry is still live.
    pub fn is_live(&self, id: SymbolId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Read a symbol's value.
    pub fn get(&self, id: SymbolId) -> Option<&SymbolValue> {
        self.entries.get(&id).map(|e| &e.value)
    }

    /// Whether the symbol is an identifier.
    pub fn is_identifier(&self, id: SymbolId) -> bool {
        matches!(self.get(id), Some(SymbolValue::Identifier(_)))
    }

    /// Identifier bookkeeping, if the symbol is a live identifier.
    pub fn id_data(&self, id: SymbolId) -> Option<&IdentifierData> {
        match self.get(id) {
            Some(SymbolValue::Identifier(data)) => Some(data),
            _ => None,
        }
    }

    /// Mutable identifier bookkeeping.
    pub fn id_data_mut(&mut self, id: SymbolId) -> Option<&mut IdentifierData> {
        match self.entries.get_mut(&id).map(|e| &mut e.value) {
            Some(SymbolValue::Identifier(data)) => Some(data),
            _ => None,
        }
    }

    /// Identifier bookkeeping or a diagnostic error.
    pub(crate) fn expect_id(&self, id: SymbolId) -> SiaResult<&IdentifierData> {
        self.id_data(id).ok_or_else(|| {
            SymbolError::NotAnIdentifier {
                display: self.display(id),
            }
            .into()
        })
    }

    /// Mutable identifier bookkeeping or a diagnostic error.
    pub(crate) fn expect_id_mut(&mut self, id: SymbolId) -> SiaResult<&mut IdentifierData> {
        if self.id_data(id).is_none() {
            return Err(SymbolError::NotAnIdentifier {
                display: self.display(id),
            }
            .into());
        }
        let Some(data) = self.id_data_mut(id) else {
            unreachable!("checked above");
        };
        Ok(data)
    }

    /// Whether the identifier is a goal on the context stack.
    pub fn isa_goal(&self, id: SymbolId) -> bool {
        self.id_data(id)
            .and_then(|d| d.frame.as_ref())
            .is_some_and(|f| !f.isa_impasse)
    }

    /// Whether the identifier is an attribute impasse.
    pub fn isa_impasse(&self, id: SymbolId) -> bool {
        self.id_data(id)
            .and_then(|d| d.frame.as_ref())
            .is_some_and(|f| f.isa_impasse)
    }

    /// Allocate a fresh transitive-closure color.
    pub fn fresh_tc(&mut self) -> u64 {
        let tc = self.next_tc;
        self.next_tc += 1;
        tc
    }

    /// Human-readable rendering: `S3`, `ponder`, `<x>`, `42`, `3.14`.
    pub fn display(&self, id: SymbolId) -> String {
        match self.get(id) {
            Some(SymbolValue::Identifier(d)) => format!("{}{}", d.letter, d.number),
            Some(SymbolValue::Variable(name)) => format!("<{name}>"),
            Some(SymbolValue::SymConstant(name)) => name.clone(),
            Some(SymbolValue::IntConstant(v)) => v.to_string(),
            Some(SymbolValue::FloatConstant(v)) => format!("{v}"),
            None => format!("?{}", id.get()),
        }
    }

    /// Number of live symbol-table entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
