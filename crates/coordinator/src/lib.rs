//! Turn coordinator for Quarry.
//!
//! The coordinator answers data questions by calling three sub-agents as
//! tools and letting a planner decide the order:
//! 1. Classifies the question with the intent sub-agent
//! 2. Retrieves data through the database sub-agent
//! 3. Analyzes the retrieved data with the analytics sub-agent
//! 4. Returns a markdown answer with overview, SQL, explanation, graph and results
//!
//! # Architecture
//!
//! ```text
//! User turn
//!      │
//!      ▼
//! ┌─────────────────┐      ┌───────────┐
//! │   Coordinator   │ ◄──► │  Planner  │  (model or protocol)
//! │   (this crate)  │      └───────────┘
//! └────────┬────────┘
//!          │ tool calls over &mut TurnState
//!    ┌─────┴──────────┬──────────────┐
//!    ▼                ▼              ▼
//! [Intent]       [Database]     [Analytics]
//! sub-agent      sub-agent      sub-agent
//! ```

pub mod artifacts;
pub mod capabilities;
pub mod config;
pub mod coordinator;
pub mod intent;
pub mod planner;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod state;

pub use artifacts::{Artifact, ArtifactStore, InMemoryArtifactStore};
pub use capabilities::{Capabilities, CapabilityFailure, CapabilityOutcome};
pub use config::{CoordinatorConfig, EnvSettings, PlannerConfig, PlannerKind};
pub use coordinator::{Coordinator, TurnOutcome, TurnStep};
pub use intent::{Intent, SubQuestion};
pub use planner::{LlmPlanner, Planner, PlannerContext, PlannerStep};
pub use protocol::{AnswerSections, ProtocolPlanner};
pub use session::{Session, SessionRegistry, SessionSummary};
pub use state::TurnState;
