//! Station health classification.
//!
//! Health is never stored: it is recomputed from the latest heartbeat on
//! every request. Checks run in a fixed order: no reports, timeout,
//! malfunction, and otherwise OK.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::{HealthState, HeartbeatReport, StationHealth, StationId};
use crate::status::{CoverState, SensorFlag};

pub const DEFAULT_TIMEOUT_SECONDS: i64 = 180;

/// A sensor flag whose value indicates a fault, e.g. `computer_power=false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub flag: SensorFlag,
    pub fault_when: bool,
}

impl fmt::Display for FaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.flag, self.fault_when)
    }
}

impl FromStr for FaultRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (flag, value) = s
            .split_once('=')
            .ok_or_else(|| format!("fault rule {:?} is not of the form flag=value", s))?;
        let fault_when = value
            .trim()
            .parse::<bool>()
            .map_err(|_| format!("fault rule {:?} must end in =true or =false", s))?;
        Ok(FaultRule {
            flag: flag.parse()?,
            fault_when,
        })
    }
}

/// Thresholds the classifier works against
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    pub timeout: Duration,
    pub fault_rules: Vec<FaultRule>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::seconds(DEFAULT_TIMEOUT_SECONDS),
            fault_rules: Vec::new(),
        }
    }
}

impl HealthPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Classify a station from its most recent heartbeat
///
/// Pure and deterministic: the caller supplies `now`.
pub fn classify(
    station_id: StationId,
    latest: Option<&HeartbeatReport>,
    now: DateTime<Utc>,
    policy: &HealthPolicy,
) -> StationHealth {
    let Some(report) = latest else {
        return StationHealth {
            station_id,
            state: HealthState::NoReports,
            last_report_age: None,
            detail: "The station has never sent any reports".to_string(),
        };
    };

    let age = now - report.timestamp;

    let (state, detail) = if age > policy.timeout {
        (
            HealthState::Timeout,
            format!(
                "The station has not sent a report since {}",
                report.timestamp.format("%Y-%m-%d %H:%M:%S")
            ),
        )
    } else if let Some(fault) = malfunction(report, &policy.fault_rules) {
        (HealthState::Malfunction, fault)
    } else {
        (
            HealthState::Ok,
            "The station is working correctly".to_string(),
        )
    };

    StationHealth {
        station_id,
        state,
        last_report_age: Some(age),
        detail,
    }
}

fn malfunction(report: &HeartbeatReport, rules: &[FaultRule]) -> Option<String> {
    if report.status.cover_state == CoverState::Problem {
        return Some("The cover reports a problem".to_string());
    }

    let tripped: Vec<String> = rules
        .iter()
        .filter(|rule| report.status.flag(rule.flag) == Some(rule.fault_when))
        .map(|rule| rule.to_string())
        .collect();

    if tripped.is_empty() {
        None
    } else {
        Some(format!("Sensor fault: {}", tripped.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DomeReadings, StorageReadings};
    use crate::status::{decode, DecodedStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap()
    }

    fn report_from(timestamp: DateTime<Utc>, status: DecodedStatus) -> HeartbeatReport {
        HeartbeatReport {
            id: 1,
            station_id: 7,
            timestamp,
            received_at: timestamp,
            automatic: true,
            raw_status_string: None,
            status,
            cover_position: None,
            readings: DomeReadings::default(),
            storage: StorageReadings::default(),
        }
    }

    fn healthy() -> DecodedStatus {
        decode(Some("--O-------X"))
    }

    fn problem() -> DecodedStatus {
        DecodedStatus {
            cover_state: CoverState::Problem,
            ..healthy()
        }
    }

    #[test]
    fn test_no_reports() {
        let health = classify(7, None, now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::NoReports);
        assert_eq!(health.last_report_age, None);
        assert_eq!(health.station_id, 7);
    }

    #[test]
    fn test_timeout() {
        let report = report_from(now() - Duration::seconds(181), healthy());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Timeout);
        assert_eq!(health.last_report_age, Some(Duration::seconds(181)));
        assert_eq!(
            health.detail,
            "The station has not sent a report since 2024-01-01 00:06:59"
        );
    }

    #[test]
    fn test_exactly_at_threshold_is_not_timeout() {
        let report = report_from(now() - Duration::seconds(180), healthy());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Ok);
    }

    #[test]
    fn test_timeout_takes_precedence_over_malfunction() {
        let report = report_from(now() - Duration::seconds(600), problem());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Timeout);
    }

    #[test]
    fn test_cover_problem_is_malfunction() {
        let report = report_from(now() - Duration::seconds(10), problem());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Malfunction);
    }

    #[test]
    fn test_healthy_report_is_ok() {
        let report = report_from(now() - Duration::seconds(10), healthy());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Ok);
        assert_eq!(health.detail, "The station is working correctly");
    }

    #[test]
    fn test_undecodable_status_is_ok() {
        let report = report_from(now() - Duration::seconds(10), DecodedStatus::default());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Ok);
    }

    #[test]
    fn test_fault_rules() {
        let policy = HealthPolicy {
            fault_rules: vec!["computer_power=false".parse().unwrap()],
            ..HealthPolicy::default()
        };

        let powered = report_from(now() - Duration::seconds(10), healthy());
        assert_eq!(classify(7, Some(&powered), now(), &policy).state, HealthState::Ok);

        let unpowered = report_from(
            now() - Duration::seconds(10),
            DecodedStatus {
                computer_power: Some(false),
                ..healthy()
            },
        );
        let health = classify(7, Some(&unpowered), now(), &policy);
        assert_eq!(health.state, HealthState::Malfunction);
        assert_eq!(health.detail, "Sensor fault: computer_power=false");

        // Unknown flag values never trip a rule
        let unknown = report_from(now() - Duration::seconds(10), DecodedStatus::default());
        assert_eq!(classify(7, Some(&unknown), now(), &policy).state, HealthState::Ok);
    }

    #[test]
    fn test_custom_timeout() {
        let policy = HealthPolicy::with_timeout(Duration::seconds(30));
        let report = report_from(now() - Duration::seconds(31), healthy());
        assert_eq!(classify(7, Some(&report), now(), &policy).state, HealthState::Timeout);
    }

    #[test]
    fn test_report_from_the_future_is_ok() {
        let report = report_from(now() + Duration::seconds(5), healthy());
        let health = classify(7, Some(&report), now(), &HealthPolicy::default());
        assert_eq!(health.state, HealthState::Ok);
        assert_eq!(health.last_report_age, Some(Duration::seconds(-5)));
    }

    #[test]
    fn test_fault_rule_parse() {
        let rule: FaultRule = "rain_sensor_active=true".parse().unwrap();
        assert_eq!(rule.flag, SensorFlag::RainSensorActive);
        assert!(rule.fault_when);
        assert_eq!(rule.to_string(), "rain_sensor_active=true");

        assert!("rain_sensor_active".parse::<FaultRule>().is_err());
        assert!("rain_sensor_active=maybe".parse::<FaultRule>().is_err());
        assert!("warp=true".parse::<FaultRule>().is_err());
    }
}
