//! Host I/O seam.
//!
//! An [`IoAdapter`] is called once per input phase to inject sensor WMEs and
//! once per output phase with the changes that touched output-designated
//! identifiers since the previous output cycle. Input WMEs hang directly off
//! an identifier (no preference owns them) and the adapter is responsible
//! for removing what it added.

use serde::{Deserialize, Serialize};

use crate::agent::Ctx;
use crate::error::SiaResult;
use crate::memory;
use crate::symbol::SymbolId;
use crate::wme::{WmeHome, WmeId, WmeSnapshot};

/// One addition or removal seen on an output-designated identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutputChange {
    pub added: bool,
    pub wme: WmeSnapshot,
}

/// Host-side sensors and effectors.
pub trait IoAdapter {
    /// Add or remove input WMEs for this cycle.
    fn input_cycle(&mut self, input: &mut InputContext<'_, '_>) -> SiaResult<()>;

    /// Consume the output journal. Called only when it is non-empty.
    fn output_cycle(&mut self, changes: &[OutputChange]) -> SiaResult<()>;
}

/// Capabilities exposed to an adapter during the input phase.
pub struct InputContext<'a, 'b> {
    pub(crate) ctx: &'a mut Ctx<'b>,
}

impl InputContext<'_, '_> {
    /// The current top goal.
    pub fn top_state(&self) -> Option<SymbolId> {
        self.ctx.stack.top
    }

    pub fn sym_constant(&mut self, name: &str) -> SymbolId {
        self.ctx.syms.sym_constant(name)
    }

    pub fn int_constant(&mut self, value: i64) -> SymbolId {
        self.ctx.syms.int_constant(value)
    }

    pub fn float_constant(&mut self, value: f64) -> SymbolId {
        self.ctx.syms.float_constant(value)
    }

    /// Mint a fresh identifier at the top level.
    pub fn create_identifier(&mut self, letter: char) -> SymbolId {
        self.ctx.syms.make_identifier(letter, crate::symbol::TOP_GOAL_LEVEL)
    }

    /// Add an input WME `(id ^attr value)`.
    pub fn add_wme(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
    ) -> SiaResult<WmeId> {
        memory::add_wme(self.ctx, WmeHome::Input, id, attr, value, false, None)
    }

    /// Remove a previously added input WME.
    pub fn remove_wme(&mut self, wme: WmeId) -> SiaResult<()> {
        memory::remove_wme(self.ctx, wme)
    }

    /// Mark an identifier so changes beneath it are journaled for the
    /// output phase.
    pub fn designate_output(&mut self, id: SymbolId) -> SiaResult<()> {
        self.ctx.syms.expect_id_mut(id)?.output_root = true;
        Ok(())
    }
}
