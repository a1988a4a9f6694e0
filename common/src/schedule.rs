use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_DESCRIPTION_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }

    /// Accepts `MON` or `monday`, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mon" | "monday" => Some(Self::Mon),
            "tue" | "tuesday" => Some(Self::Tue),
            "wed" | "wednesday" => Some(Self::Wed),
            "thu" | "thursday" => Some(Self::Thu),
            "fri" | "friday" => Some(Self::Fri),
            "sat" | "saturday" => Some(Self::Sat),
            "sun" | "sunday" => Some(Self::Sun),
            _ => None,
        }
    }
}

fn parse_days(raw: &[String]) -> Result<Vec<DayOfWeek>, ScheduleValidationError> {
    raw.iter()
        .map(|day| {
            DayOfWeek::parse(day).ok_or_else(|| ScheduleValidationError::InvalidDay(day.clone()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleValidationError {
    #[error("schedule entry needs at least one weekday")]
    NoDays,
    #[error("unknown weekday `{0}`")]
    InvalidDay(String),
    #[error("start and end time must differ")]
    EmptyWindow,
    #[error("invalid time `{0}`, expected HH:MM")]
    InvalidTime(String),
    #[error("description is {0} characters, limit is {max}", max = MAX_DESCRIPTION_CHARS)]
    DescriptionTooLong(usize),
}

/// Parses `HH:MM` (seconds are accepted and kept).
pub fn parse_time(raw: &str) -> Result<NaiveTime, ScheduleValidationError> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ScheduleValidationError::InvalidTime(raw.to_string()))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: u32,
    pub days: Vec<DayOfWeek>,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ScheduleEntry {
    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }

    pub fn validate(&self) -> Result<(), ScheduleValidationError> {
        if self.days.is_empty() {
            return Err(ScheduleValidationError::NoDays);
        }
        if self.start == self.end {
            return Err(ScheduleValidationError::EmptyWindow);
        }
        let chars = self.description.chars().count();
        if chars > MAX_DESCRIPTION_CHARS {
            return Err(ScheduleValidationError::DescriptionTooLong(chars));
        }
        Ok(())
    }

    /// Overnight windows match both halves on the listed weekday.
    pub fn matches(&self, now: NaiveDateTime) -> bool {
        if !self.enabled || !self.days.contains(&DayOfWeek::from_chrono(now.weekday())) {
            return false;
        }

        let time = now.time();
        if self.is_overnight() {
            time >= self.start || time <= self.end
        } else {
            self.start <= time && time <= self.end
        }
    }

    fn normalize_days(&mut self) {
        self.days.sort();
        self.days.dedup();
    }
}

/// Fields accepted when creating an entry. Days and times stay textual so
/// malformed input surfaces as a validation error rather than a decode
/// failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleDraft {
    pub days: Vec<String>,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleUpdate {
    pub days: Option<Vec<String>>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// Drops invalid and duplicate-id entries, sorts by id.
    pub fn normalize(&mut self) {
        for entry in &mut self.entries {
            entry.normalize_days();
        }
        self.entries.retain(|entry| entry.validate().is_ok());
        self.entries.sort_by_key(|entry| entry.id);
        self.entries.dedup_by_key(|entry| entry.id);
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    fn next_id(&self) -> u32 {
        self.entries
            .iter()
            .map(|entry| entry.id)
            .max()
            .map_or(1, |max| max.saturating_add(1))
    }

    pub fn add(&mut self, draft: ScheduleDraft) -> Result<ScheduleEntry, ScheduleValidationError> {
        let mut entry = ScheduleEntry {
            id: self.next_id(),
            days: parse_days(&draft.days)?,
            start: parse_time(&draft.start)?,
            end: parse_time(&draft.end)?,
            description: draft.description.trim().to_string(),
            enabled: true,
        };
        entry.normalize_days();
        entry.validate()?;

        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Returns `Ok(false)` when no entry has `id`. The merged entry is
    /// validated before anything is written back.
    pub fn update(
        &mut self,
        id: u32,
        update: &ScheduleUpdate,
    ) -> Result<bool, ScheduleValidationError> {
        let Some(slot) = self.entries.iter_mut().find(|entry| entry.id == id) else {
            return Ok(false);
        };

        let mut merged = slot.clone();
        if let Some(days) = &update.days {
            merged.days = parse_days(days)?;
        }
        if let Some(start) = &update.start {
            merged.start = parse_time(start)?;
        }
        if let Some(end) = &update.end {
            merged.end = parse_time(end)?;
        }
        if let Some(description) = &update.description {
            merged.description = description.trim().to_string();
        }
        if let Some(enabled) = update.enabled {
            merged.enabled = enabled;
        }
        merged.normalize_days();
        merged.validate()?;

        *slot = merged;
        Ok(true)
    }

    /// Most recently created (highest id) matching entry wins on overlap.
    pub fn active_entry(&self, now: NaiveDateTime) -> Option<&ScheduleEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(now))
            .max_by_key(|entry| entry.id)
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.active_entry(now).is_some()
    }
}
