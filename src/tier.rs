//! Adaptive sync cadence
//!
//! Connections are classified into tiers from their recent upstream
//! activity, and each tier maps to a polling interval. Owners can pin a
//! connection to a tier through the `sync_tier` metadata key; otherwise
//! the newest observed record activity decides.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::models::connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hot" => Some(Tier::Hot),
            "warm" => Some(Tier::Warm),
            "cold" => Some(Tier::Cold),
            _ => None,
        }
    }
}

pub trait TierPolicy: Send + Sync {
    fn classify(&self, connection: &connection::Model, now: DateTime<Utc>) -> Tier;
}

/// Classifies by how recently upstream activity was observed
pub struct ActivityWindowPolicy {
    hot_within: chrono::Duration,
    warm_within: chrono::Duration,
}

impl ActivityWindowPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            hot_within: chrono::Duration::seconds(config.hot_activity_within_secs as i64),
            warm_within: chrono::Duration::seconds(config.warm_activity_within_secs as i64),
        }
    }
}

impl TierPolicy for ActivityWindowPolicy {
    fn classify(&self, connection: &connection::Model, now: DateTime<Utc>) -> Tier {
        // An explicit pin wins over observed activity
        let pinned = connection
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("sync_tier"))
            .and_then(|value| value.as_str())
            .and_then(Tier::parse);
        if let Some(tier) = pinned {
            return tier;
        }

        let Some(last_activity) = connection.last_activity_at else {
            return Tier::Cold;
        };
        let age = now - last_activity.with_timezone(&Utc);
        if age <= self.hot_within {
            Tier::Hot
        } else if age <= self.warm_within {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }
}

/// Polling interval for a tier, honoring per-provider overrides.
pub fn sync_interval(config: &SchedulerConfig, provider_key: &str, tier: Tier) -> Duration {
    let (hot, warm, cold) = config
        .provider_interval_overrides
        .get(provider_key)
        .map(|intervals| (intervals.hot_secs, intervals.warm_secs, intervals.cold_secs))
        .unwrap_or((
            config.hot_interval_secs,
            config.warm_interval_secs,
            config.cold_interval_secs,
        ));
    Duration::from_secs(match tier {
        Tier::Hot => hot,
        Tier::Warm => warm,
        Tier::Cold => cold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierIntervals;
    use crate::models::connection::ConnectionStatus;
    use serde_json::json;
    use uuid::Uuid;

    fn scheduler_config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    fn connection_with(
        last_activity: Option<DateTime<Utc>>,
        metadata: Option<serde_json::Value>,
    ) -> connection::Model {
        let now = Utc::now().fixed_offset();
        connection::Model {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            provider_key: "vimeo".to_string(),
            display_name: None,
            status: ConnectionStatus::Connected.as_str().to_string(),
            is_default: true,
            last_error: None,
            last_activity_at: last_activity.map(|t| t.fixed_offset()),
            last_synced_at: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_activity_windows_decide_tier() {
        let policy = ActivityWindowPolicy::from_config(&scheduler_config());
        let now = Utc::now();

        let fresh = connection_with(Some(now - chrono::Duration::minutes(5)), None);
        assert_eq!(policy.classify(&fresh, now), Tier::Hot);

        let recent = connection_with(Some(now - chrono::Duration::hours(2)), None);
        assert_eq!(policy.classify(&recent, now), Tier::Warm);

        let stale = connection_with(Some(now - chrono::Duration::days(3)), None);
        assert_eq!(policy.classify(&stale, now), Tier::Cold);
    }

    #[test]
    fn test_no_activity_is_cold() {
        let policy = ActivityWindowPolicy::from_config(&scheduler_config());
        let connection = connection_with(None, None);
        assert_eq!(policy.classify(&connection, Utc::now()), Tier::Cold);
    }

    #[test]
    fn test_metadata_pin_overrides_activity() {
        let policy = ActivityWindowPolicy::from_config(&scheduler_config());
        let now = Utc::now();

        let pinned_cold = connection_with(
            Some(now - chrono::Duration::minutes(1)),
            Some(json!({ "sync_tier": "cold" })),
        );
        assert_eq!(policy.classify(&pinned_cold, now), Tier::Cold);

        let pinned_hot = connection_with(None, Some(json!({ "sync_tier": "hot" })));
        assert_eq!(policy.classify(&pinned_hot, now), Tier::Hot);
    }

    #[test]
    fn test_unrecognized_pin_is_ignored() {
        let policy = ActivityWindowPolicy::from_config(&scheduler_config());
        let now = Utc::now();

        let connection = connection_with(
            Some(now - chrono::Duration::minutes(1)),
            Some(json!({ "sync_tier": "ludicrous" })),
        );
        assert_eq!(policy.classify(&connection, now), Tier::Hot);
    }

    #[test]
    fn test_interval_defaults_and_overrides() {
        let mut config = scheduler_config();
        assert_eq!(
            sync_interval(&config, "vimeo", Tier::Hot),
            Duration::from_secs(config.hot_interval_secs)
        );
        assert_eq!(
            sync_interval(&config, "vimeo", Tier::Cold),
            Duration::from_secs(config.cold_interval_secs)
        );

        config.provider_interval_overrides.insert(
            "broker".to_string(),
            TierIntervals {
                hot_secs: 15,
                warm_secs: 45,
                cold_secs: 300,
            },
        );
        assert_eq!(
            sync_interval(&config, "broker", Tier::Hot),
            Duration::from_secs(15)
        );
        assert_eq!(
            sync_interval(&config, "broker", Tier::Warm),
            Duration::from_secs(45)
        );
        // Other providers keep the defaults
        assert_eq!(
            sync_interval(&config, "vimeo", Tier::Warm),
            Duration::from_secs(config.warm_interval_secs)
        );
    }
}
