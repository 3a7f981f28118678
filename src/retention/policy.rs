// backuptool/src/retention/policy.rs
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{AppError, Result};

/// Retention granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Monthly,
    Weekly,
    Daily,
    Hourly,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Monthly, Tier::Weekly, Tier::Daily, Tier::Hourly];

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Monthly => "monthly",
            Tier::Weekly => "weekly",
            Tier::Daily => "daily",
            Tier::Hourly => "hourly",
        }
    }

    fn is_mandatory(&self) -> bool {
        !matches!(self, Tier::Hourly)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.name() == s)
            .ok_or_else(|| AppError::Config(format!("Unknown backup interval: {}", s)))
    }
}

/// Number of copies to keep per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TieredPolicy {
    pub monthly: u32,
    pub weekly: u32,
    pub daily: u32,
    pub hourly: u32,
}

impl TieredPolicy {
    /// Validates a `{"monthly": n, "weekly": n, "daily": n, "hourly": n}` mapping.
    ///
    /// `monthly`, `weekly` and `daily` must be present; `hourly` defaults to 0.
    pub fn from_map(setting: &str, map: &BTreeMap<String, u32>) -> Result<Self> {
        let mut policy = TieredPolicy::default();
        for (key, count) in map {
            let tier: Tier = key
                .parse()
                .map_err(|_| AppError::Config(format!("{}: unknown retention tier '{}'", setting, key)))?;
            policy.set(tier, *count);
        }
        if let Some(missing) = Tier::ALL
            .into_iter()
            .find(|tier| tier.is_mandatory() && !map.contains_key(tier.name()))
        {
            return Err(AppError::Config(format!(
                "{} is missing the mandatory '{}' tier",
                setting, missing
            )));
        }
        Ok(policy)
    }

    pub fn count(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Monthly => self.monthly,
            Tier::Weekly => self.weekly,
            Tier::Daily => self.daily,
            Tier::Hourly => self.hourly,
        }
    }

    fn set(&mut self, tier: Tier, count: u32) {
        match tier {
            Tier::Monthly => self.monthly = count,
            Tier::Weekly => self.weekly = count,
            Tier::Daily => self.daily = count,
            Tier::Hourly => self.hourly = count,
        }
    }

    /// Tiers with a non-zero count, coarsest first.
    pub fn active_tiers(&self) -> impl Iterator<Item = (Tier, u32)> + '_ {
        Tier::ALL
            .into_iter()
            .map(|tier| (tier, self.count(tier)))
            .filter(|(_, count)| *count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("weekly".parse::<Tier>().ok(), Some(Tier::Weekly));
        let err = "yearly".parse::<Tier>().unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("yearly")));
    }

    #[test]
    fn test_policy_without_hourly() -> anyhow::Result<()> {
        let policy = TieredPolicy::from_map(
            "database_copies",
            &map(&[("monthly", 2), ("weekly", 0), ("daily", 7)]),
        )?;
        assert_eq!(policy.hourly, 0);
        let active: Vec<_> = policy.active_tiers().collect();
        assert_eq!(active, vec![(Tier::Monthly, 2), (Tier::Daily, 7)]);
        Ok(())
    }

    #[test]
    fn test_policy_missing_daily() {
        let err = TieredPolicy::from_map("media_copies", &map(&[("monthly", 1), ("weekly", 1)]))
            .unwrap_err();
        match err {
            AppError::Config(msg) => {
                assert!(msg.contains("daily"));
                assert!(msg.contains("media_copies"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_policy_unknown_tier() {
        let err = TieredPolicy::from_map(
            "database_copies",
            &map(&[("monthly", 1), ("weekly", 1), ("daily", 1), ("yearly", 1)]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("yearly"));
    }
}
