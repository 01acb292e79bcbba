use std::collections::BTreeSet;

use serde::Serialize;

const ALLOW_SENDER_ALLOWLIST: &str = "allow_sender_allowlist";
const ALLOW_DESTINATION_MATCH: &str = "allow_destination_match";
const DENY_UNCONFIGURED: &str = "deny_unconfigured";
const DENY_SENDER_MISSING: &str = "deny_sender_missing";
const DENY_SENDER_NOT_ALLOWED: &str = "deny_sender_not_allowed";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Identities allowed to answer escalation requests.
pub struct SenderAuthorizationConfig {
    pub allowed_sender_ids: BTreeSet<String>,
    pub allowed_destination_id: Option<String>,
}

impl SenderAuthorizationConfig {
    /// Builds a config from raw identity strings, dropping blank entries.
    pub fn new<I, S>(allowed_sender_ids: I, allowed_destination_id: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_sender_ids = allowed_sender_ids
            .into_iter()
            .map(|value| value.as_ref().trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();
        let allowed_destination_id = allowed_destination_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        Self {
            allowed_sender_ids,
            allowed_destination_id,
        }
    }

    /// Parses a comma-separated allowlist such as `"1234, 5678"`.
    pub fn from_csv(allowed_sender_ids: &str, allowed_destination_id: Option<&str>) -> Self {
        Self::new(allowed_sender_ids.split(','), allowed_destination_id)
    }

    pub fn is_configured(&self) -> bool {
        !self.allowed_sender_ids.is_empty() || self.allowed_destination_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
/// Outcome of a sender authorization check.
pub enum SenderAccessDecision {
    Allow { reason_code: String },
    Deny { reason_code: String },
}

impl SenderAccessDecision {
    fn allow(reason_code: &str) -> Self {
        Self::Allow {
            reason_code: reason_code.to_string(),
        }
    }

    fn deny(reason_code: &str) -> Self {
        Self::Deny {
            reason_code: reason_code.to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn reason_code(&self) -> &str {
        match self {
            Self::Allow { reason_code } | Self::Deny { reason_code } => reason_code,
        }
    }
}

/// Decides whether `sender_id`, writing in `conversation_id`, may answer.
///
/// A non-empty sender allowlist is authoritative; the destination match is
/// only consulted when no sender ids are configured.
pub fn evaluate_sender_access(
    config: &SenderAuthorizationConfig,
    sender_id: Option<&str>,
    conversation_id: &str,
) -> SenderAccessDecision {
    if !config.is_configured() {
        return SenderAccessDecision::deny(DENY_UNCONFIGURED);
    }
    let Some(sender_id) = sender_id.map(str::trim).filter(|value| !value.is_empty()) else {
        return SenderAccessDecision::deny(DENY_SENDER_MISSING);
    };

    if !config.allowed_sender_ids.is_empty() {
        if config.allowed_sender_ids.contains(sender_id) {
            return SenderAccessDecision::allow(ALLOW_SENDER_ALLOWLIST);
        }
        return SenderAccessDecision::deny(DENY_SENDER_NOT_ALLOWED);
    }
    if config
        .allowed_destination_id
        .as_deref()
        .is_some_and(|destination| destination == conversation_id.trim())
    {
        return SenderAccessDecision::allow(ALLOW_DESTINATION_MATCH);
    }
    SenderAccessDecision::deny(DENY_SENDER_NOT_ALLOWED)
}

#[cfg(test)]
mod tests {
    use super::{evaluate_sender_access, SenderAccessDecision, SenderAuthorizationConfig};

    #[test]
    fn unit_from_csv_trims_and_drops_blank_entries() {
        let config = SenderAuthorizationConfig::from_csv(" 42, ,7 ,", Some("  "));
        assert_eq!(
            config.allowed_sender_ids.iter().collect::<Vec<_>>(),
            vec!["42", "7"]
        );
        assert_eq!(config.allowed_destination_id, None);
        assert!(config.is_configured());
    }

    #[test]
    fn unit_unconfigured_filter_denies_every_sender() {
        let config = SenderAuthorizationConfig::default();
        assert!(!config.is_configured());
        for sender in [Some("1"), Some("anyone"), None] {
            let decision = evaluate_sender_access(&config, sender, "1");
            assert_eq!(decision.reason_code(), "deny_unconfigured");
            assert!(!decision.is_allowed());
        }
    }

    #[test]
    fn unit_allowlisted_sender_is_allowed_in_any_conversation() {
        let config = SenderAuthorizationConfig::from_csv("42", None);
        let decision = evaluate_sender_access(&config, Some("42"), "-100999");
        assert_eq!(
            decision,
            SenderAccessDecision::Allow {
                reason_code: "allow_sender_allowlist".to_string()
            }
        );
    }

    #[test]
    fn unit_destination_mode_allows_messages_from_the_destination_conversation() {
        let config = SenderAuthorizationConfig::new(Vec::<String>::new(), Some("555"));
        let private_chat = evaluate_sender_access(&config, Some("555"), "555");
        assert_eq!(private_chat.reason_code(), "allow_destination_match");

        let elsewhere = evaluate_sender_access(&config, Some("555"), "777");
        assert_eq!(elsewhere.reason_code(), "deny_sender_not_allowed");
    }

    #[test]
    fn regression_allowlist_is_not_bypassed_by_destination_match() {
        let config = SenderAuthorizationConfig::from_csv("42", Some("-100555"));
        let group_member = evaluate_sender_access(&config, Some("666"), "-100555");
        assert_eq!(
            group_member,
            SenderAccessDecision::Deny {
                reason_code: "deny_sender_not_allowed".to_string()
            }
        );
        let allowlisted = evaluate_sender_access(&config, Some("42"), "-100555");
        assert_eq!(allowlisted.reason_code(), "allow_sender_allowlist");
    }

    #[test]
    fn unit_missing_sender_identity_is_denied_even_in_destination_conversation() {
        let config = SenderAuthorizationConfig::new(["42"], Some("555"));
        let decision = evaluate_sender_access(&config, Some("   "), "555");
        assert_eq!(decision.reason_code(), "deny_sender_missing");
        let decision = evaluate_sender_access(&config, None, "555");
        assert_eq!(decision.reason_code(), "deny_sender_missing");
    }

    #[test]
    fn unit_decision_serializes_with_tag_and_reason() {
        let decision = SenderAccessDecision::Deny {
            reason_code: "deny_sender_not_allowed".to_string(),
        };
        let value = serde_json::to_value(&decision).expect("serialize");
        assert_eq!(value["decision"], "deny");
        assert_eq!(value["reason_code"], "deny_sender_not_allowed");
    }
}
