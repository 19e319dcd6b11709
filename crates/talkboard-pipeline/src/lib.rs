//! The symbol suggestion pipeline.
//!
//! A transcript flows through the [`planner::QueryPlanner`] (keywords and
//! intent), the [`symbols::SymbolRetriever`] (candidate pictograms), and the
//! [`ranker::SymbolRanker`] (a shortlist of at most six). Once the user has
//! picked symbols, the [`phrase::PhraseComposer`] turns them into a sentence.
//! Every stage is one remote call with its own fallback.

pub mod extract;
pub mod guard;
pub mod phrase;
pub mod planner;
pub mod prompt;
pub mod ranker;
pub mod runtime;
pub mod symbols;

pub use guard::{FlightPermit, SessionGuard};
pub use phrase::{ComposedPhrase, PhraseComposer, PhraseSource};
pub use planner::QueryPlanner;
pub use ranker::SymbolRanker;
pub use runtime::{Pipeline, Suggestion};
pub use symbols::{GlobalSymbolsClient, RetrievalOutcome, SymbolRetriever, SymbolSource};
