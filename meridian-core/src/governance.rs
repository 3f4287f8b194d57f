//! Consent validation and quarantine at ingest
//!
//! Every event must carry a consent purpose and a consent expiry that has
//! not passed. Records failing these checks, or carrying malformed values,
//! are set aside with a reason and never reach a model. The remaining
//! records continue through the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MeridianError;
use crate::types::Event;

/// Why a record was quarantined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum QuarantineReason {
    MissingConsentPurpose,
    MissingConsentExpiry,
    ConsentExpired,
    Malformed(String),
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingConsentPurpose => write!(f, "missing consent_purpose"),
            Self::MissingConsentExpiry => write!(f, "missing consent_expiry"),
            Self::ConsentExpired => write!(f, "consent expired"),
            Self::Malformed(detail) => write!(f, "malformed: {detail}"),
        }
    }
}

/// A rejected record and the reason it was set aside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedEvent {
    pub event: Event,
    pub reason: QuarantineReason,
}

impl QuarantinedEvent {
    /// Express the rejection in the crate error taxonomy.
    pub fn to_error(&self) -> MeridianError {
        MeridianError::DataQuality(format!(
            "profile {}: {}",
            self.event.profile_id, self.reason
        ))
    }
}

/// Outcome of validating a batch; accepted records borrow from the input
#[derive(Debug, Clone, Default)]
pub struct IngestReport<'a> {
    pub accepted: Vec<&'a Event>,
    pub quarantined: Vec<QuarantinedEvent>,
}

impl IngestReport<'_> {
    pub fn quarantine_rate(&self) -> f64 {
        let total = self.accepted.len() + self.quarantined.len();
        if total == 0 {
            0.0
        } else {
            self.quarantined.len() as f64 / total as f64
        }
    }
}

/// Check one record against governance and shape rules.
pub fn validate_event(event: &Event, now: DateTime<Utc>) -> Option<QuarantineReason> {
    match event.consent_purpose.as_deref() {
        None => return Some(QuarantineReason::MissingConsentPurpose),
        Some(p) if p.trim().is_empty() => return Some(QuarantineReason::MissingConsentPurpose),
        Some(_) => {}
    }
    match event.consent_expiry {
        None => return Some(QuarantineReason::MissingConsentExpiry),
        Some(expiry) if expiry <= now => return Some(QuarantineReason::ConsentExpired),
        Some(_) => {}
    }
    if event.profile_id.trim().is_empty() {
        return Some(QuarantineReason::Malformed("empty profile_id".into()));
    }
    if !event.spend.is_finite() || event.spend < 0.0 {
        return Some(QuarantineReason::Malformed(format!(
            "spend {}",
            event.spend
        )));
    }
    if !event.revenue.is_finite() || event.revenue < 0.0 {
        return Some(QuarantineReason::Malformed(format!(
            "revenue {}",
            event.revenue
        )));
    }
    None
}

/// Split a batch into accepted and quarantined records.
pub fn ingest(events: &[Event], now: DateTime<Utc>) -> IngestReport<'_> {
    let mut report = IngestReport::default();
    for event in events {
        match validate_event(event, now) {
            None => report.accepted.push(event),
            Some(reason) => {
                debug!(profile_id = %event.profile_id, %reason, "Quarantined event");
                report.quarantined.push(QuarantinedEvent {
                    event: event.clone(),
                    reason,
                });
            }
        }
    }
    if !report.quarantined.is_empty() {
        warn!(
            accepted = report.accepted.len(),
            quarantined = report.quarantined.len(),
            "Events quarantined at ingest"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn valid() -> Event {
        Event::new(
            "p1",
            EventType::Click,
            now() - Duration::days(1),
            "search",
            "analytics",
            now() + Duration::days(30),
        )
    }

    #[test]
    fn test_valid_event_accepted() {
        assert_eq!(validate_event(&valid(), now()), None);
    }

    #[test]
    fn test_missing_purpose_quarantined() {
        let mut e = valid();
        e.consent_purpose = None;
        assert_eq!(
            validate_event(&e, now()),
            Some(QuarantineReason::MissingConsentPurpose)
        );
    }

    #[test]
    fn test_blank_purpose_quarantined() {
        let mut e = valid();
        e.consent_purpose = Some("  ".into());
        assert_eq!(
            validate_event(&e, now()),
            Some(QuarantineReason::MissingConsentPurpose)
        );
    }

    #[test]
    fn test_expired_consent_quarantined() {
        let mut e = valid();
        e.consent_expiry = Some(now() - Duration::seconds(1));
        assert_eq!(
            validate_event(&e, now()),
            Some(QuarantineReason::ConsentExpired)
        );
    }

    #[test]
    fn test_negative_spend_malformed() {
        let e = valid().with_spend(-1.0);
        assert!(matches!(
            validate_event(&e, now()),
            Some(QuarantineReason::Malformed(_))
        ));
    }

    #[test]
    fn test_ingest_continues_on_valid_records() {
        let mut bad = valid();
        bad.consent_expiry = None;
        let batch = vec![valid(), bad, valid()];
        let report = ingest(&batch, now());
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.quarantined.len(), 1);
        assert!((report.quarantine_rate() - 1.0 / 3.0).abs() < 1e-12);
        assert!(matches!(
            report.quarantined[0].to_error(),
            MeridianError::DataQuality(_)
        ));
    }
}
