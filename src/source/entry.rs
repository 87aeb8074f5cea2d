use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const MAX_MACHINE_ID_LENGTH: usize = 50;
pub const MAX_MESSAGE_LENGTH: usize = 8000;
pub const MAX_TAG_VALUE_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    #[default]
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

impl Severity {
    const ALL: [Severity; 6] = [
        Severity::Verbose,
        Severity::Debug,
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "Verbose",
            Severity::Debug => "Debug",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }

    pub fn from_ordinal(value: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Producers write either the level name or its ordinal.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SeverityVisitor;

        impl<'de> Visitor<'de> for SeverityVisitor {
            type Value = Severity;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a severity name or an ordinal between 0 and 5")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Severity, E> {
                Severity::from_name(v)
                    .ok_or_else(|| E::custom(format!("unknown severity '{}'", v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Severity, E> {
                Severity::from_ordinal(v)
                    .ok_or_else(|| E::custom(format!("severity ordinal out of range: {}", v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Severity, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(Severity::from_ordinal)
                    .ok_or_else(|| E::custom(format!("severity ordinal out of range: {}", v)))
            }
        }

        deserializer.deserialize_any(SeverityVisitor)
    }
}

/// One structured log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    #[serde(alias = "timeGenerated", default, with = "time_generated_format")]
    pub time_generated: DateTime<Utc>,

    #[serde(alias = "machineId", default)]
    pub machine_id: String,

    #[serde(alias = "severity", default)]
    pub severity: Severity,

    #[serde(alias = "eventId", default)]
    pub event_id: i32,

    #[serde(alias = "message", default)]
    pub message: String,

    #[serde(alias = "operationId", default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    #[serde(alias = "tags", default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
#[error("{}", .errors.join(", "))]
pub struct EntryValidationError {
    pub errors: Vec<String>,
}

impl LogEntry {
    /// Check the field rules an entry must satisfy before it is shipped.
    /// Every violation is reported, not just the first.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), EntryValidationError> {
        let mut errors = Vec::new();

        if self.time_generated == DateTime::<Utc>::default() {
            errors.push("TimeGenerated is required".to_string());
        } else if self.time_generated > now {
            errors.push("TimeGenerated cannot be in the future".to_string());
        }

        if self.machine_id.trim().is_empty() {
            errors.push("MachineId is required".to_string());
        } else if self.machine_id.chars().count() > MAX_MACHINE_ID_LENGTH {
            errors.push(format!(
                "MachineId must be at most {} characters",
                MAX_MACHINE_ID_LENGTH
            ));
        }

        if self.event_id == 0 {
            errors.push("EventId is required".to_string());
        }

        if self.message.trim().is_empty() {
            errors.push("Message is required".to_string());
        } else if self.message.chars().count() > MAX_MESSAGE_LENGTH {
            errors.push(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_LENGTH
            ));
        }

        for (key, value) in &self.tags {
            if value.chars().count() > MAX_TAG_VALUE_LENGTH {
                errors.push(format!(
                    "tag '{}' must be at most {} characters",
                    key, MAX_TAG_VALUE_LENGTH
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EntryValidationError { errors })
        }
    }
}

/// RFC 3339 on output; on input an offset-less timestamp is taken as UTC.
mod time_generated_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| naive.and_utc())
            .map_err(|_| format!("invalid timestamp '{}'", s))
    }
}
