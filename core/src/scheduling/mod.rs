pub mod candidates;
pub mod decision;
pub mod ranker;

pub use candidates::{generate, Candidate, CandidateSet};
pub use decision::{
    history, record_auto_reschedule_decision, record_manager_decision, Decision,
    ManagerDecisionInput, Outcome, RescheduleHistoryEntry, TopRecommendation,
};
pub use ranker::{rank, RankedRecommendation, Ranker, RankingResult, RankingSource};
