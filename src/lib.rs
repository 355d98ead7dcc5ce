//! # cogtrace - Execution history for cognitive agents
//!
//! cogtrace records what a running agent does, one [`Occurrence`] at a
//! time, into a durable per-agent [`EventLog`]. The same log drives a
//! debugger (step backward and forward through the run, undoing and
//! re-applying state changes) and a [`TraceExplainer`] that answers why an
//! action happened or why it did not.
//!
//! ## Core Concepts
//!
//! - **Occurrence**: An immutable, reversible record of one decision or state change
//! - **EventLog**: An append-only, cursor-addressed sequence of occurrences backed by a trace file
//! - **AsyncWriter**: A background thread that makes appends durable without blocking the agent
//! - **HistoryRegistry**: The per-agent table of live logs
//! - **Reason**: A causal explanation of an action, or of its absence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cogtrace::{HistoryConfig, HistoryRegistry, Occurrence, SourcePosition, Signature};
//!
//! let mut registry = HistoryRegistry::new(HistoryConfig::new("traces"))?;
//! let log = registry.open("alice")?;
//! log.append(Occurrence::module_enter(
//!     SourcePosition::new("alice.mod2g", 1, 1),
//!     Signature::new("main", 0),
//! ))?;
//!
//! let path = registry.dispose("alice")?;
//! let finished = registry.inspect(&path)?;
//! assert_eq!(finished.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod occurrence;
pub mod program;
pub mod state;
pub mod term;

// Persistence
pub mod config;
pub mod log;
pub mod registry;
pub mod storage;
pub mod writer;

// Analysis
pub mod explain;

pub use config::HistoryConfig;
pub use error::{CodecError, CursorError, HistoryError, HistoryResult, StateError};
pub use explain::{ActionReason, InspectionEvidence, Reason, TraceExplainer};
pub use log::{EventLog, SearchMode};
pub use occurrence::{Condition, EvaluationKind, MentalLiteral, MentalOperator, Occurrence};
pub use program::{ProgramElement, ProgramMap, RuleInfo, SourcePosition};
pub use registry::HistoryRegistry;
pub use state::{AgentState, BaseKind, Focus, MentalState};
pub use term::{KrEngine, Signature, Substitution, SyntacticUnifier, Term};
pub use writer::AsyncWriter;
