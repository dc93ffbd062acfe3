// src/calendar.rs
// Trading sessions and precomputed news blackout windows. Shared read-only
// between symbol pipelines.
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::errors::CoreError;

/// Daily UTC window `[start_hour, end_hour)`. Wraps midnight when start > end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl SessionWindow {
    pub fn new(name: &str, start_hour: u32, end_hour: u32) -> Self {
        Self {
            name: name.to_string(),
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        let hour = time.hour();
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start_hour > 23 || self.end_hour > 24 || self.start_hour == self.end_hour {
            return Err(CoreError::InvalidConfiguration(format!(
                "session '{}' has invalid hours {}..{}",
                self.name, self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutWindow {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BlackoutWindow {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time <= self.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct Calendar {
    sessions: Vec<SessionWindow>,
    blackouts: Vec<BlackoutWindow>,
}

impl Calendar {
    pub fn new(sessions: Vec<SessionWindow>, mut blackouts: Vec<BlackoutWindow>) -> Self {
        blackouts.sort_by(|a, b| a.start.cmp(&b.start));
        Self { sessions, blackouts }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(
            config.session_windows.clone(),
            config.news_blackout_windows.clone(),
        )
    }

    /// No configured sessions means every hour is tradable.
    pub fn in_session(&self, time: DateTime<Utc>) -> bool {
        self.sessions.is_empty() || self.sessions.iter().any(|s| s.contains(time))
    }

    pub fn blackout_at(&self, time: DateTime<Utc>) -> Option<&BlackoutWindow> {
        self.blackouts
            .iter()
            .take_while(|w| w.start <= time)
            .find(|w| w.contains(time))
    }

    pub fn sessions(&self) -> &[SessionWindow] {
        &self.sessions
    }
}
