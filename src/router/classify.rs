//! Inbound text classification.
//!
//! Order of precedence:
//! 1. structured profile info (`name: ...` / `email: ...` lines)
//! 2. check-in (`<tenant> - <branch>`)
//! 3. keyword commands, exact match on the trimmed, lowercased text
//! 4. anything else is unrecognized

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{LoyaltyError, Result};
use crate::storage::ProfileUpdate;

static CHECK_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*-\s*(.+)$").expect("check-in pattern is valid"));

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

const BALANCE_KEYWORDS: &[&str] = &["balance", "points", "my points"];
const CHALLENGE_KEYWORDS: &[&str] = &["challenge", "progress", "next reward"];
const HELP_KEYWORDS: &[&str] = &["help", "menu", "?"];
const OPT_OUT_KEYWORDS: &[&str] = &["stop", "unsubscribe", "opt out", "optout"];

const NAME_MAX_LEN: usize = 80;

/// What an inbound message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CheckIn {
        tenant_name: String,
        branch_name: String,
    },
    BalanceQuery,
    ChallengeQuery,
    Help,
    OptOut,
    StructuredInfo(ProfileUpdate),
    Unrecognized,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CheckIn { .. } => "check_in",
            Command::BalanceQuery => "balance_query",
            Command::ChallengeQuery => "challenge_query",
            Command::Help => "help",
            Command::OptOut => "opt_out",
            Command::StructuredInfo(_) => "structured_info",
            Command::Unrecognized => "unrecognized",
        }
    }
}

/// Classify free text into exactly one [`Command`].
pub fn classify(text: &str) -> Command {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Command::Unrecognized;
    }

    if let Some(profile) = parse_structured_info(trimmed) {
        return Command::StructuredInfo(profile);
    }

    if let Some(captures) = CHECK_IN.captures(trimmed) {
        let tenant_name = captures[1].trim();
        let branch_name = captures[2].trim();
        if !tenant_name.is_empty() && !branch_name.is_empty() {
            return Command::CheckIn {
                tenant_name: tenant_name.to_string(),
                branch_name: branch_name.to_string(),
            };
        }
    }

    let lowered = trimmed.to_lowercase();
    let keyword = lowered.as_str();
    if BALANCE_KEYWORDS.contains(&keyword) {
        Command::BalanceQuery
    } else if CHALLENGE_KEYWORDS.contains(&keyword) {
        Command::ChallengeQuery
    } else if HELP_KEYWORDS.contains(&keyword) {
        Command::Help
    } else if OPT_OUT_KEYWORDS.contains(&keyword) {
        Command::OptOut
    } else {
        Command::Unrecognized
    }
}

/// Text made only of `key: value` lines for known profile keys.
///
/// Values are not validated here; see [`validate_profile`].
fn parse_structured_info(text: &str) -> Option<ProfileUpdate> {
    let mut profile = ProfileUpdate::default();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line.split_once(':')?;
        let value = value.trim().to_string();
        match key.trim().to_lowercase().as_str() {
            "name" => profile.display_name = Some(value),
            "email" => profile.email = Some(value),
            _ => return None,
        }
    }
    if profile.is_empty() {
        None
    } else {
        Some(profile)
    }
}

/// Reject profile values that cannot be stored as given.
pub fn validate_profile(profile: &ProfileUpdate) -> Result<()> {
    if let Some(name) = &profile.display_name {
        if name.is_empty() {
            return Err(LoyaltyError::Validation("name cannot be empty".to_string()));
        }
        if name.chars().count() > NAME_MAX_LEN {
            return Err(LoyaltyError::Validation(format!(
                "name is longer than {NAME_MAX_LEN} characters"
            )));
        }
    }
    if let Some(email) = &profile.email {
        if !EMAIL.is_match(email) {
            return Err(LoyaltyError::Validation(format!(
                "\"{email}\" is not an email address"
            )));
        }
    }
    Ok(())
}

/// Group chats use a distinct identity suffix.
pub fn is_group_sender(identity: &str) -> bool {
    identity.ends_with("@g.us")
}
