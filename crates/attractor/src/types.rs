//! Shared vocabulary used across the graph, engine, and handlers.

use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};

/// The behavior a node's `shape` attribute maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    Start,
    Exit,
    Conditional,
    Fail,
    Codergen,
    WaitHuman,
    Tool,
    Parallel,
    FanIn,
    StackManager,
}

impl std::str::FromStr for HandlerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "exit" => Ok(Self::Exit),
            "conditional" => Ok(Self::Conditional),
            "fail" => Ok(Self::Fail),
            "codergen" => Ok(Self::Codergen),
            "wait_human" => Ok(Self::WaitHuman),
            "tool" => Ok(Self::Tool),
            "parallel" => Ok(Self::Parallel),
            "fan_in" => Ok(Self::FanIn),
            "stack_manager" => Ok(Self::StackManager),
            other => Err(format!("unknown handler type: {other}")),
        }
    }
}

impl HandlerType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Exit => "exit",
            Self::Conditional => "conditional",
            Self::Fail => "fail",
            Self::Codergen => "codergen",
            Self::WaitHuman => "wait_human",
            Self::Tool => "tool",
            Self::Parallel => "parallel",
            Self::FanIn => "fan_in",
            Self::StackManager => "stack_manager",
        }
    }
}

/// The disposition a handler's [`crate::handler::Outcome`] carries once it
/// returns, and the value the condition language's `outcome` key resolves
/// to (lowercased).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl OutcomeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Retry => "retry",
            Self::Fail => "fail",
            Self::Skipped => "skipped",
        }
    }
}

/// Whether the engine runs a node's handler for real or simulates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FidelityMode {
    #[default]
    Real,
    Simulated,
}

impl std::str::FromStr for FidelityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real" => Ok(Self::Real),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown fidelity mode: {other}")),
        }
    }
}

/// A duration attribute, accepted as either a bare number of milliseconds
/// or a suffixed string (`"5s"`, `"250ms"`, `"2m"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(pub StdDuration);

impl Duration {
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        Self(StdDuration::from_millis(ms))
    }

    #[must_use]
    pub fn as_std(&self) -> StdDuration {
        self.0
    }

    /// Parse `"500ms"`, `"5s"`, `"2m"`, `"1h"`, `"1d"`, or a bare integer
    /// (interpreted as milliseconds).
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if let Ok(ms) = input.parse::<u64>() {
            return Ok(Self::from_millis(ms));
        }
        let (number_part, unit) = input.split_at(
            input
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(|| format!("invalid duration: {input}"))?,
        );
        let value: f64 = number_part
            .parse()
            .map_err(|_| format!("invalid duration number: {input}"))?;
        let millis = match unit {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            "h" => value * 3_600_000.0,
            "d" => value * 86_400_000.0,
            other => return Err(format!("unknown duration unit: {other}")),
        };
        Ok(Self::from_millis(millis.round() as u64))
    }
}

impl Serialize for Duration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0.as_millis() as u64)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Self::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_integer_as_millis() {
        assert_eq!(Duration::parse("500").unwrap().as_std(), StdDuration::from_millis(500));
    }

    #[test]
    fn parses_suffixed_units() {
        assert_eq!(Duration::parse("5s").unwrap().as_std(), StdDuration::from_secs(5));
        assert_eq!(Duration::parse("2m").unwrap().as_std(), StdDuration::from_secs(120));
        assert_eq!(Duration::parse("250ms").unwrap().as_std(), StdDuration::from_millis(250));
        assert_eq!(Duration::parse("1h").unwrap().as_std(), StdDuration::from_secs(3_600));
        assert_eq!(Duration::parse("1d").unwrap().as_std(), StdDuration::from_secs(86_400));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(Duration::parse("5x").is_err());
    }
}
