//! # sia
//!
//! A symbolic decision engine: typed preferences over candidate values,
//! resolved into decisions or impasses, driving a goal stack through a
//! phased decision cycle.
//!
//! ## Architecture
//!
//! - **Symbols** (`symbol`): interned constants and reference-counted identifiers
//! - **Working memory** (`memory`, `wme`, `slot`): id/attribute/value triples grouped into slots
//! - **Preferences** (`pref`, `decide`): thirteen preference kinds and the resolution ladder
//! - **Ownership** (`gc`): hybrid link-count plus mark-and-sweep reclamation
//! - **Goal stack** (`goal`): impasses open subgoals; dependency sets close them
//! - **Scheduler** (`scheduler`): the phased cycle with propose/apply and single-cycle modes
//! - **Seams** (`matcher`, `io`): rule matching and host I/O as traits
//!
//! ## Library usage
//!
//! ```no_run
//! use sia::agent::Agent;
//! use sia::matcher::PreferenceSpec;
//! use sia::pref::PreferenceKind;
//!
//! let mut agent = Agent::new().unwrap();
//! let state = agent.top_state().unwrap();
//! let op = agent.create_identifier('O');
//! let operator = agent.sym_constant("operator");
//! agent.assert_instantiation(Some(state), &[PreferenceSpec {
//!     kind: PreferenceKind::Acceptable,
//!     id: state,
//!     attr: operator,
//!     value: op,
//!     referent: None,
//!     o_supported: false,
//! }]).unwrap();
//! agent.run_for_decisions(1).unwrap();
//! ```

pub mod agent;
pub mod config;
pub mod decide;
pub mod error;
pub mod events;
pub mod gc;
pub mod goal;
pub mod io;
pub mod matcher;
pub mod memory;
pub mod pref;
pub mod scheduler;
pub mod slot;
pub mod symbol;
pub mod wme;

pub use agent::Agent;
pub use decide::{Decision, ImpasseKind};
pub use error::{SiaError, SiaResult};
pub use scheduler::{Phase, RunOutcome};
