pub mod classifier;
pub mod gate;

pub use classifier::{ActionClassifier, ActionType};
pub use gate::{
    create_gated_result, format_confirmation_message, should_gate, ApprovalDecision,
    ApprovalStore, GatedResult, PendingAction, PendingActionInfo,
};
