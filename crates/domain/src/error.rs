use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid quest type: {0}")]
    InvalidQuestType(String),
    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),
    #[error("You have already completed this quest.")]
    AlreadyCompleted,
    #[error("You have already submitted this quest and it is pending approval.")]
    AlreadyPending,
    #[error("Another submission for this quest is still being processed. Please try again.")]
    AdmissionBusy,
    #[error("store error: {0}")]
    Store(String),
}
