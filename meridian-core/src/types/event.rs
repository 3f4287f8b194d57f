//! Raw marketing events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of user interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    Click,
    AddToCart,
    Purchase,
    /// Any interaction the engines do not model individually
    #[serde(other)]
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::AddToCart => "add_to_cart",
            Self::Purchase => "purchase",
            Self::Other => "other",
        }
    }

    /// All variants for iteration
    pub fn all() -> &'static [EventType] {
        &[
            Self::View,
            Self::Click,
            Self::AddToCart,
            Self::Purchase,
            Self::Other,
        ]
    }

    /// Whether the interaction is a touchpoint that can earn attribution credit
    pub fn is_touch(&self) -> bool {
        matches!(self, Self::View | Self::Click | Self::AddToCart)
    }

    /// Whether the interaction is a conversion
    pub fn is_conversion(&self) -> bool {
        matches!(self, Self::Purchase)
    }
}

/// One user interaction as ingested from the event plane.
///
/// Governance fields are optional on the wire so that records lacking them
/// can be parsed and quarantined instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub profile_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    #[serde(default)]
    pub spend: f64,
    /// Order value on purchases
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub consent_purpose: Option<String>,
    #[serde(default)]
    pub consent_expiry: Option<DateTime<Utc>>,
}

impl Event {
    /// Build an event with consent for `purpose` valid until `consent_expiry`.
    pub fn new(
        profile_id: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
        channel: impl Into<String>,
        purpose: impl Into<String>,
        consent_expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            event_type,
            timestamp,
            channel: channel.into(),
            spend: 0.0,
            revenue: 0.0,
            content_id: None,
            campaign_id: None,
            consent_purpose: Some(purpose.into()),
            consent_expiry: Some(consent_expiry),
        }
    }

    pub fn with_spend(mut self, spend: f64) -> Self {
        self.spend = spend;
        self
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = revenue;
        self
    }

    pub fn with_content(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::AddToCart).unwrap();
        assert_eq!(json, "\"add_to_cart\"");
        let parsed: EventType = serde_json::from_str("\"signup\"").unwrap();
        assert_eq!(parsed, EventType::Other);
    }

    #[test]
    fn test_event_missing_consent_parses() {
        let json = r#"{
            "profile_id": "p1",
            "event_type": "click",
            "timestamp": "2026-01-01T00:00:00Z",
            "channel": "search"
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(event.consent_purpose.is_none());
        assert!(event.consent_expiry.is_none());
        assert_eq!(event.spend, 0.0);
    }

    #[test]
    fn test_touch_and_conversion() {
        assert!(EventType::Click.is_touch());
        assert!(!EventType::Purchase.is_touch());
        assert!(EventType::Purchase.is_conversion());
    }
}
