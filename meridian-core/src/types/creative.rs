//! Creative performance time series

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};

/// One day of delivery metrics for a creative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeDay {
    pub date: NaiveDate,
    pub impressions: u64,
    pub clicks: u64,
    pub spend: f64,
    pub conversions: u64,
    /// Average impressions per reached user
    pub frequency: f64,
    pub ctr: f64,
    pub cpc: f64,
}

impl CreativeDay {
    /// Build a day from raw counts, deriving CTR and CPC.
    pub fn from_counts(
        date: NaiveDate,
        impressions: u64,
        clicks: u64,
        spend: f64,
        conversions: u64,
        frequency: f64,
    ) -> Self {
        let ctr = if impressions > 0 {
            clicks as f64 / impressions as f64
        } else {
            0.0
        };
        let cpc = if clicks > 0 { spend / clicks as f64 } else { 0.0 };
        Self {
            date,
            impressions,
            clicks,
            spend,
            conversions,
            frequency,
            ctr,
            cpc,
        }
    }
}

/// Static creative attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreativeAttributes {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub copy_length: u32,
    #[serde(default)]
    pub cta_type: String,
}

/// Append-only daily series for one creative on one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeSeries {
    pub creative_id: String,
    pub platform: String,
    #[serde(default)]
    pub attributes: CreativeAttributes,
    /// Addressable audience, used for saturation when known
    #[serde(default)]
    pub audience_size: Option<u64>,
    pub days: Vec<CreativeDay>,
}

impl CreativeSeries {
    pub fn new(creative_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            creative_id: creative_id.into(),
            platform: platform.into(),
            attributes: CreativeAttributes::default(),
            audience_size: None,
            days: Vec::new(),
        }
    }

    pub fn with_audience(mut self, audience_size: u64) -> Self {
        self.audience_size = Some(audience_size);
        self
    }

    /// Append a day; dates must be strictly increasing.
    pub fn push_day(&mut self, day: CreativeDay) -> Result<()> {
        if let Some(last) = self.days.last()
            && day.date <= last.date
        {
            return Err(MeridianError::DataQuality(format!(
                "creative {} day {} is not after {}",
                self.creative_id, day.date, last.date
            )));
        }
        self.days.push(day);
        Ok(())
    }

    /// Number of observed days
    pub fn age_days(&self) -> usize {
        self.days.len()
    }

    /// Whether days are strictly increasing by date
    pub fn is_ordered(&self) -> bool {
        self.days.windows(2).all(|w| w[0].date < w[1].date)
    }

    pub fn total_impressions(&self) -> u64 {
        self.days.iter().map(|d| d.impressions).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32, impressions: u64, clicks: u64) -> CreativeDay {
        CreativeDay::from_counts(
            NaiveDate::from_ymd_opt(2026, 3, d).unwrap(),
            impressions,
            clicks,
            10.0,
            1,
            1.5,
        )
    }

    #[test]
    fn test_from_counts_derives_rates() {
        let d = day(1, 1000, 20);
        assert!((d.ctr - 0.02).abs() < 1e-12);
        assert!((d.cpc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_push_day_rejects_out_of_order() {
        let mut series = CreativeSeries::new("c1", "meta");
        series.push_day(day(2, 100, 1)).unwrap();
        let err = series.push_day(day(1, 100, 1)).unwrap_err();
        assert!(matches!(err, MeridianError::DataQuality(_)));
        assert_eq!(series.age_days(), 1);
    }

    #[test]
    fn test_zero_impressions_rates_are_zero() {
        let d = day(1, 0, 0);
        assert_eq!(d.ctr, 0.0);
        assert_eq!(d.cpc, 0.0);
    }
}
