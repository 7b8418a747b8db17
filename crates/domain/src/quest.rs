//! Quest type routing.
//!
//! Every quest type owns one pending-submission table and a fixed set of
//! identity columns. The canonical wire form is the lowercase tag; the legacy
//! numeric codes `1`, `2` and `3` are still accepted on input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

pub const DISCORD_PENDING_TABLE: &str = "discord_pending_submissions";
pub const TWITTER_PENDING_TABLE: &str = "twitter_pending_submissions";
pub const ONBOARDING_PENDING_TABLE: &str = "onboarding_pending_submissions";
pub const ACCEPTED_QUESTS_TABLE: &str = "accepted_quests";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestType {
    Discord,
    Twitter,
    Onboarding,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum IdentityField {
    DiscordUsername,
    TwitterUsername,
}

impl IdentityField {
    /// Column name in the store.
    pub fn column(self) -> &'static str {
        match self {
            IdentityField::DiscordUsername => "discord_username",
            IdentityField::TwitterUsername => "twitter_username",
        }
    }

    /// Field name as it appears in request payloads.
    pub fn field_name(self) -> &'static str {
        match self {
            IdentityField::DiscordUsername => "discordUsername",
            IdentityField::TwitterUsername => "twitterUsername",
        }
    }
}

/// Storage target and identity requirements for one quest type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuestRoute {
    pub table: &'static str,
    pub required_identities: &'static [IdentityField],
}

const DISCORD_IDENTITIES: &[IdentityField] = &[IdentityField::DiscordUsername];
const TWITTER_IDENTITIES: &[IdentityField] = &[IdentityField::TwitterUsername];
const ONBOARDING_IDENTITIES: &[IdentityField] = &[
    IdentityField::DiscordUsername,
    IdentityField::TwitterUsername,
];

impl QuestType {
    pub const ALL: [QuestType; 3] = [QuestType::Discord, QuestType::Twitter, QuestType::Onboarding];

    pub fn as_str(self) -> &'static str {
        match self {
            QuestType::Discord => "discord",
            QuestType::Twitter => "twitter",
            QuestType::Onboarding => "onboarding",
        }
    }

    pub fn legacy_code(self) -> u8 {
        match self {
            QuestType::Discord => 1,
            QuestType::Twitter => 2,
            QuestType::Onboarding => 3,
        }
    }

    pub fn route(self) -> QuestRoute {
        match self {
            QuestType::Discord => QuestRoute {
                table: DISCORD_PENDING_TABLE,
                required_identities: DISCORD_IDENTITIES,
            },
            QuestType::Twitter => QuestRoute {
                table: TWITTER_PENDING_TABLE,
                required_identities: TWITTER_IDENTITIES,
            },
            QuestType::Onboarding => QuestRoute {
                table: ONBOARDING_PENDING_TABLE,
                required_identities: ONBOARDING_IDENTITIES,
            },
        }
    }

    pub fn pending_table(self) -> &'static str {
        self.route().table
    }

    pub fn required_identities(self) -> &'static [IdentityField] {
        self.route().required_identities
    }

    pub fn requires_user_status(self) -> bool {
        matches!(self, QuestType::Onboarding)
    }

    /// Parses a discriminator taken from a JSON payload. Strings and integers
    /// are accepted; every other JSON type is rejected.
    pub fn from_json(value: &Value) -> Result<Self, DomainError> {
        match value {
            Value::String(raw) => raw.parse(),
            Value::Number(number) => number.to_string().parse(),
            other => Err(DomainError::InvalidQuestType(other.to_string())),
        }
    }
}

impl FromStr for QuestType {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        match value.to_ascii_lowercase().as_str() {
            "discord" | "1" => Ok(QuestType::Discord),
            "twitter" | "2" => Ok(QuestType::Twitter),
            "onboarding" | "3" => Ok(QuestType::Onboarding),
            _ => Err(DomainError::InvalidQuestType(value.to_string())),
        }
    }
}

impl fmt::Display for QuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
