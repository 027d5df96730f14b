//! Opportunity scoring: bucketed factors, weighted total, learned multipliers.

mod factors;
mod learning;
mod scorer;

pub use scorer::{OpportunityScorer, ScoredOpportunity};
