pub mod conditions;
pub mod evaluator;
pub mod plan;
pub mod store;

pub use conditions::{Condition, ConditionOutcome, ConditionSet};
pub use evaluator::{
    EvalAction, Evaluation, EvaluatorConfig, PlanConditionEvaluator, ReEvalDecision,
    CANCEL_RISK_BOUNDARY,
};
pub use plan::{CancellationState, EntryLevel, ReEvalState, TradePlan};
pub use store::{
    PlanSpec, PlanStatusReport, PlanStore, ReEvalReport, ReEvalStatus, SharedPlanStore,
    ZoneStatus,
};
