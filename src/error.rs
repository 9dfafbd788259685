//! Rich diagnostic error types for the sia engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so embedding hosts know exactly what went
//! wrong and how to fix it. Internal invariant violations surface as
//! [`RunError::Fatal`] through the scheduler's public entry points rather than
//! aborting the process; the host decides what to do with them.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the sia engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the embedding host.
#[derive(Debug, Error, Diagnostic)]
pub enum SiaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decide(#[from] DecideError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Run(#[from] RunError),
}

/// Convenience alias used throughout the crate.
pub type SiaResult<T> = Result<T, SiaError>;

/// Build a fatal error for a broken internal invariant.
///
/// The reference behavior for this class of defect was a process abort after
/// best-effort diagnostics; here it propagates as an ordinary error value.
pub(crate) fn fatal(message: impl Into<String>) -> SiaError {
    SiaError::Run(RunError::Fatal {
        message: message.into(),
    })
}

// ---------------------------------------------------------------------------
// Symbol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SymbolError {
    #[error("unknown symbol handle {raw}")]
    #[diagnostic(
        code(sia::symbol::unknown),
        help(
            "The symbol handle does not name a live symbol-table entry. \
             It was most likely released (reference count reached zero) \
             while something still held the handle."
        )
    )]
    Unknown { raw: u64 },

    #[error("symbol {display} is not an identifier")]
    #[diagnostic(
        code(sia::symbol::not_an_identifier),
        help(
            "This operation requires an identifier symbol. Constants and \
             variables carry no level/link bookkeeping and cannot own slots."
        )
    )]
    NotAnIdentifier { display: String },

    #[error("reference count underflow on symbol {display}")]
    #[diagnostic(
        code(sia::symbol::refcount_underflow),
        help(
            "release() was called more times than acquire(). Every holder of \
             a symbol handle must balance its acquires and releases exactly."
        )
    )]
    RefcountUnderflow { display: String },
}

// ---------------------------------------------------------------------------
// Working-memory errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("no working-memory element with timetag {timetag}")]
    #[diagnostic(
        code(sia::memory::unknown_wme),
        help(
            "The WME was already removed or never added. Adapters must not \
             retain timetags across a reinitialize()."
        )
    )]
    UnknownWme { timetag: u64 },

    #[error("no slot with handle {raw}")]
    #[diagnostic(
        code(sia::memory::unknown_slot),
        help("The slot was discarded after its last preference and WME left.")
    )]
    UnknownSlot { raw: u64 },

    #[error("no instantiation with handle {raw}")]
    #[diagnostic(
        code(sia::memory::unknown_instantiation),
        help(
            "The instantiation was already retracted. Retractions are atomic; \
             a second retraction of the same handle is a collaborator bug."
        )
    )]
    UnknownInstantiation { raw: u64 },

    #[error("preference referent missing for binary kind {kind}")]
    #[diagnostic(
        code(sia::memory::missing_referent),
        help(
            "better/worse and the binary indifferent/parallel kinds compare \
             the value against a referent; supply one in the PreferenceSpec."
        )
    )]
    MissingReferent { kind: String },
}

// ---------------------------------------------------------------------------
// Decision errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DecideError {
    #[error("slot ({id} ^{attr}) does not exist")]
    #[diagnostic(
        code(sia::decide::no_such_slot),
        help("resolve() needs a slot with at least one preference asserted.")
    )]
    NoSuchSlot { id: String, attr: String },
}

// ---------------------------------------------------------------------------
// Goal-stack errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GoalError {
    #[error("symbol {display} is not a goal")]
    #[diagnostic(
        code(sia::goal::not_a_goal),
        help("Goal-stack operations require an identifier created by the stack manager.")
    )]
    NotAGoal { display: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown option '{name}'")]
    #[diagnostic(
        code(sia::config::unknown_option),
        help("Option names are fixed; config::Options::names() lists them.")
    )]
    UnknownOption { name: String },

    #[error("option '{name}' rejects value {value}")]
    #[diagnostic(
        code(sia::config::unsupported_value),
        help("{reason}")
    )]
    UnsupportedValue {
        name: String,
        value: i64,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    #[error("fatal: {message}")]
    #[diagnostic(
        code(sia::run::fatal),
        help(
            "An internal invariant of the decision core was violated. The \
             agent's state is no longer trustworthy; destroy or reinitialize \
             it. Please file a bug report with the message above."
        )
    )]
    Fatal { message: String },

    #[error("I/O adapter failed during the {phase} phase: {message}")]
    #[diagnostic(
        code(sia::run::adapter),
        help(
            "The embedding host's adapter returned an error. The cycle \
             stopped at the phase boundary; working memory is consistent."
        )
    )]
    Adapter { phase: String, message: String },
}
