use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainResult;
use crate::admission::{AdmissionClaims, AdmissionConfig, admission_keys};
use crate::error::DomainError;
use crate::ports::admission::AdmissionLock;
use crate::ports::store::{Filter, RecordStore, Row, StoreError};
use crate::quest::{ACCEPTED_QUESTS_TABLE, IdentityField, QuestType};

pub const QUEST_ID_FIELD: &str = "questId";
pub const USER_STATUS_FIELD: &str = "userStatus";

/// Submission payload as received, before validation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDraft {
    pub quest_id: Option<String>,
    pub discord_username: Option<String>,
    pub twitter_username: Option<String>,
    pub user_status: Option<String>,
    pub short_answer: Option<String>,
    pub submission_link: Option<String>,
    pub tweet_post_link: Option<String>,
    pub reply_submission_link: Option<String>,
    pub retweet_submission_link: Option<String>,
}

impl SubmissionDraft {
    pub fn identity(&self, field: IdentityField) -> Option<&str> {
        match field {
            IdentityField::DiscordUsername => self.discord_username.as_deref(),
            IdentityField::TwitterUsername => self.twitter_username.as_deref(),
        }
    }

    /// Trims every field and drops the ones left empty.
    pub fn normalized(&self) -> Self {
        Self {
            quest_id: clean(&self.quest_id),
            discord_username: clean(&self.discord_username),
            twitter_username: clean(&self.twitter_username),
            user_status: clean(&self.user_status),
            short_answer: clean(&self.short_answer),
            submission_link: clean(&self.submission_link),
            tweet_post_link: clean(&self.tweet_post_link),
            reply_submission_link: clean(&self.reply_submission_link),
            retweet_submission_link: clean(&self.retweet_submission_link),
        }
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Row written to a pending table. Unset optional fields are left out of the
/// serialized form so the store applies its own defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub quest_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweet_post_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_submission_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retweet_submission_link: Option<String>,
    pub status: bool,
    pub submitted_at: String,
}

impl SubmissionRecord {
    pub fn pending(submission: &ValidatedSubmission, submitted_at: String) -> Self {
        let draft = &submission.draft;
        Self {
            quest_id: submission.quest_id.clone(),
            discord_username: draft.discord_username.clone(),
            twitter_username: draft.twitter_username.clone(),
            user_status: draft.user_status.clone(),
            short_answer: draft.short_answer.clone(),
            submission_link: draft.submission_link.clone(),
            tweet_post_link: draft.tweet_post_link.clone(),
            reply_submission_link: draft.reply_submission_link.clone(),
            retweet_submission_link: draft.retweet_submission_link.clone(),
            status: false,
            submitted_at,
        }
    }

    pub fn to_row(&self) -> DomainResult<Row> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => Ok(row),
            Ok(other) => Err(DomainError::Store(format!(
                "submission serialized to non-object: {other}"
            ))),
            Err(err) => Err(DomainError::Store(format!(
                "failed to serialize submission: {err}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSubmission {
    pub quest_type: QuestType,
    pub quest_id: String,
    /// Identity values the duplicate check matches on, in route order.
    pub identities: Vec<(IdentityField, String)>,
    pub draft: SubmissionDraft,
}

/// Checks the fields a quest type mandates. Reports every missing field at
/// once, in payload order.
pub fn validate_submission(
    quest_type: QuestType,
    draft: &SubmissionDraft,
) -> DomainResult<ValidatedSubmission> {
    let draft = draft.normalized();
    let mut missing = Vec::new();

    if draft.quest_id.is_none() {
        missing.push(QUEST_ID_FIELD.to_string());
    }

    let mut identities = Vec::with_capacity(quest_type.required_identities().len());
    for field in quest_type.required_identities() {
        match draft.identity(*field) {
            Some(value) => identities.push((*field, value.to_string())),
            None => missing.push(field.field_name().to_string()),
        }
    }

    if quest_type.requires_user_status() && draft.user_status.is_none() {
        missing.push(USER_STATUS_FIELD.to_string());
    }

    if !missing.is_empty() {
        return Err(DomainError::MissingRequiredFields(missing));
    }

    let quest_id = draft.quest_id.clone().unwrap_or_default();
    Ok(ValidatedSubmission {
        quest_type,
        quest_id,
        identities,
        draft,
    })
}

/// Identity match: plain equality for a single identity, logical OR when a
/// quest type carries several.
pub fn identity_filter(identities: &[(IdentityField, String)]) -> Filter {
    match identities {
        [(field, value)] => Filter::eq(field.column(), value.clone()),
        _ => Filter::any_of(
            identities
                .iter()
                .map(|(field, value)| (field.column(), value.clone())),
        ),
    }
}

/// Outcome of the duplicate-check predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admissibility {
    Admissible,
    AlreadyCompleted,
    AlreadyPending,
}

impl Admissibility {
    pub fn into_result(self) -> DomainResult<()> {
        match self {
            Admissibility::Admissible => Ok(()),
            Admissibility::AlreadyCompleted => Err(DomainError::AlreadyCompleted),
            Admissibility::AlreadyPending => Err(DomainError::AlreadyPending),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Admissibility::Admissible => "admissible",
            Admissibility::AlreadyCompleted => "already_completed",
            Admissibility::AlreadyPending => "already_pending",
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ExistenceCheck {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SubmissionReceipt {
    pub quest_type: QuestType,
    pub table: &'static str,
    pub record: Row,
}

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn RecordStore>,
    lock: Arc<dyn AdmissionLock>,
    config: AdmissionConfig,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        lock: Arc<dyn AdmissionLock>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            store,
            lock,
            config,
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Validates, claims the admission keys, runs the duplicate check and
    /// writes one pending row.
    ///
    /// A concurrent attempt on the same key waits for the holder and then runs
    /// the duplicate check itself, so it only sees `AlreadyPending` once the
    /// holder's row exists.
    pub async fn submit(
        &self,
        quest_type: QuestType,
        draft: &SubmissionDraft,
    ) -> DomainResult<SubmissionReceipt> {
        let submission = validate_submission(quest_type, draft)?;
        let table = quest_type.pending_table();
        let keys = admission_keys(table, &submission.quest_id, &submission.identities);

        let claims = AdmissionClaims::acquire(Arc::clone(&self.lock), keys, &self.config)
            .await?;
        let result = self.admit_locked(&submission).await;
        claims.release().await;
        result
    }

    async fn admit_locked(
        &self,
        submission: &ValidatedSubmission,
    ) -> DomainResult<SubmissionReceipt> {
        let quest_type = submission.quest_type;
        let table = quest_type.pending_table();

        let verdict = self
            .admissibility(quest_type, &submission.quest_id, &submission.identities)
            .await?;
        if verdict != Admissibility::Admissible {
            tracing::info!(
                quest_type = %quest_type,
                quest_id = %submission.quest_id,
                verdict = verdict.as_str(),
                "submission rejected"
            );
            verdict.into_result()?;
        }

        let record = SubmissionRecord::pending(submission, crate::util::now_rfc3339());
        let row = record.to_row()?;
        let stored = match self.store.insert(table, row).await {
            Ok(stored) => stored,
            Err(StoreError::Conflict(message)) => {
                tracing::info!(
                    quest_type = %quest_type,
                    quest_id = %submission.quest_id,
                    %message,
                    "insert rejected by uniqueness constraint"
                );
                return Err(DomainError::AlreadyPending);
            }
            Err(err) => return Err(map_store_error(err)),
        };

        tracing::info!(
            quest_type = %quest_type,
            quest_id = %submission.quest_id,
            table,
            "submission admitted"
        );
        Ok(SubmissionReceipt {
            quest_type,
            table,
            record: stored,
        })
    }

    /// Duplicate-check predicate: accepted records first, then the pending
    /// table for the quest type.
    pub async fn admissibility(
        &self,
        quest_type: QuestType,
        quest_id: &str,
        identities: &[(IdentityField, String)],
    ) -> DomainResult<Admissibility> {
        if self
            .find_accepted(quest_type, quest_id, identities)
            .await?
            .is_some()
        {
            return Ok(Admissibility::AlreadyCompleted);
        }
        if self
            .find_pending(quest_type, quest_id, identities)
            .await?
            .is_some()
        {
            return Ok(Admissibility::AlreadyPending);
        }
        Ok(Admissibility::Admissible)
    }

    /// Read-only lookup of the pending table. Onboarding matches `username`
    /// against both identity columns.
    pub async fn check_exists(
        &self,
        quest_type: QuestType,
        quest_id: &str,
        username: &str,
    ) -> DomainResult<ExistenceCheck> {
        let quest_id = quest_id.trim();
        let username = username.trim();
        let mut missing = Vec::new();
        if username.is_empty() {
            missing.push("username".to_string());
        }
        if quest_id.is_empty() {
            missing.push("quest_id".to_string());
        }
        if !missing.is_empty() {
            return Err(DomainError::MissingRequiredFields(missing));
        }

        let identities = quest_type
            .required_identities()
            .iter()
            .map(|field| (*field, username.to_string()))
            .collect::<Vec<_>>();

        tracing::debug!(
            quest_type = %quest_type,
            quest_id,
            table = quest_type.pending_table(),
            "checking for pending submission"
        );
        let existing = self.find_pending(quest_type, quest_id, &identities).await?;
        Ok(match existing {
            Some(_) => ExistenceCheck {
                exists: true,
                message: Some("You have already submitted this quest.".to_string()),
            },
            None => ExistenceCheck {
                exists: false,
                message: None,
            },
        })
    }

    async fn find_accepted(
        &self,
        quest_type: QuestType,
        quest_id: &str,
        identities: &[(IdentityField, String)],
    ) -> DomainResult<Option<Row>> {
        // Scoped to the same quest: an accepted record for another quest of
        // this type does not block the submission.
        let filters = [
            Filter::eq("quest_id", quest_id),
            Filter::eq("quest_type", quest_type.as_str()),
            identity_filter(identities),
        ];
        self.store
            .find_one(ACCEPTED_QUESTS_TABLE, &filters)
            .await
            .map_err(map_store_error)
    }

    async fn find_pending(
        &self,
        quest_type: QuestType,
        quest_id: &str,
        identities: &[(IdentityField, String)],
    ) -> DomainResult<Option<Row>> {
        let filters = [Filter::eq("quest_id", quest_id), identity_filter(identities)];
        self.store
            .find_one(quest_type.pending_table(), &filters)
            .await
            .map_err(map_store_error)
    }
}

fn map_store_error(err: StoreError) -> DomainError {
    tracing::error!(error = %err, "store call failed");
    DomainError::Store(err.to_string())
}
