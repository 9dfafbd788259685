//! Lifecycle hooks.
//!
//! A host registers at most one handler per event kind; registering a second
//! replaces the first. Handlers observe the engine, they do not mutate it,
//! so they receive a borrowed [`Event`] payload.

use std::collections::HashMap;

use crate::decide::ImpasseKind;
use crate::goal::ContextKind;
use crate::scheduler::Phase;
use crate::symbol::SymbolId;
use crate::wme::WmeSnapshot;

/// Hook points fired by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforePhase,
    AfterPhase,
    BeforeDecision,
    AfterDecision,
    WmeAdded,
    WmeRemoved,
    GoalCreated,
    GoalRemoved,
    ImpasseCreated,
    ImpasseRemoved,
    /// Fired before a goal retracts, with a snapshot of its dependency set.
    BeforeGoalRetraction,
    ContextSlotDecided,
    ParamChanged,
    AfterHalt,
}

/// Payload delivered to a handler.
#[derive(Debug, Clone)]
pub enum Event {
    Phase {
        phase: Phase,
    },
    Decision {
        goal: Option<SymbolId>,
    },
    Wme {
        wme: WmeSnapshot,
        added: bool,
    },
    Goal {
        goal: SymbolId,
        level: u32,
        kind: ImpasseKind,
    },
    Impasse {
        id: SymbolId,
        kind: ImpasseKind,
    },
    GoalRetraction {
        goal: SymbolId,
        gds: Vec<WmeSnapshot>,
    },
    ContextSlotDecided {
        goal: SymbolId,
        kind: ContextKind,
        value: SymbolId,
    },
    Param {
        name: String,
        value: i64,
    },
    Halt {
        fatal: bool,
        reason: String,
    },
}

type Handler = Box<dyn FnMut(&Event)>;

/// Registered handlers, one slot per event kind.
#[derive(Default)]
pub struct Callbacks {
    handlers: HashMap<EventKind, Handler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any existing one for the same kind.
    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(?kind, "replacing existing event handler");
        }
    }

    pub fn unregister(&mut self, kind: EventKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn fire(&mut self, kind: EventKind, event: &Event) {
        if let Some(handler) = self.handlers.get_mut(&kind) {
            handler(event);
        }
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("registered", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn register_fire_unregister() {
        let mut cbs = Callbacks::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        cbs.register(
            EventKind::AfterHalt,
            Box::new(move |_| h.set(h.get() + 1)),
        );
        cbs.fire(
            EventKind::AfterHalt,
            &Event::Halt {
                fatal: false,
                reason: "System halted.".into(),
            },
        );
        assert_eq!(hits.get(), 1);
        assert!(cbs.unregister(EventKind::AfterHalt));
        cbs.fire(
            EventKind::AfterHalt,
            &Event::Halt {
                fatal: false,
                reason: "System halted.".into(),
            },
        );
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn second_registration_replaces_first() {
        let mut cbs = Callbacks::new();
        let first = Rc::new(Cell::new(false));
        let second = Rc::new(Cell::new(false));
        let f = Rc::clone(&first);
        let s = Rc::clone(&second);
        cbs.register(EventKind::BeforePhase, Box::new(move |_| f.set(true)));
        cbs.register(EventKind::BeforePhase, Box::new(move |_| s.set(true)));
        cbs.fire(
            EventKind::BeforePhase,
            &Event::Phase {
                phase: Phase::Input,
            },
        );
        assert!(!first.get());
        assert!(second.get());
    }
}
