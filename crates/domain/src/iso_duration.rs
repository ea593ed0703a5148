use std::fmt::{Display, Formatter};
use std::str::FromStr;

use azrbac_core::AppError;
use serde::{Deserialize, Serialize};

/// ISO-8601 duration restricted to the day/time designators Azure accepts.
///
/// Calendar designators (`Y`, date `M`) are rejected because their length is
/// not fixed. Weeks are accepted on input and normalized to days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IsoDuration {
    days: u32,
    hours: u32,
    minutes: u32,
    seconds: u32,
}

impl IsoDuration {
    /// Creates a duration from whole days and hours.
    #[must_use]
    pub fn from_days_and_hours(days: u32, hours: u32) -> Self {
        Self {
            days,
            hours,
            ..Self::default()
        }
    }

    /// Creates a duration from whole hours and minutes.
    #[must_use]
    pub fn from_hours_and_minutes(hours: u32, minutes: u32) -> Self {
        Self {
            hours,
            minutes,
            ..Self::default()
        }
    }

    /// Returns the day component.
    #[must_use]
    pub fn days(&self) -> u32 {
        self.days
    }

    /// Returns the hour component.
    #[must_use]
    pub fn hours(&self) -> u32 {
        self.hours
    }

    /// Returns the minute component.
    #[must_use]
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// Returns the second component.
    #[must_use]
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Returns the total length in seconds.
    #[must_use]
    pub fn total_seconds(&self) -> u64 {
        u64::from(self.days) * 86_400
            + u64::from(self.hours) * 3_600
            + u64::from(self.minutes) * 60
            + u64::from(self.seconds)
    }

    /// Returns true when every component is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.total_seconds() == 0
    }
}

impl Display for IsoDuration {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_zero() {
            return formatter.write_str("PT0S");
        }

        formatter.write_str("P")?;
        if self.days > 0 {
            write!(formatter, "{}D", self.days)?;
        }

        if self.hours > 0 || self.minutes > 0 || self.seconds > 0 {
            formatter.write_str("T")?;
            if self.hours > 0 {
                write!(formatter, "{}H", self.hours)?;
            }
            if self.minutes > 0 {
                write!(formatter, "{}M", self.minutes)?;
            }
            if self.seconds > 0 {
                write!(formatter, "{}S", self.seconds)?;
            }
        }

        Ok(())
    }
}

impl FromStr for IsoDuration {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            AppError::Validation(format!("invalid ISO-8601 duration '{value}': {reason}"))
        };

        let body = value
            .trim()
            .strip_prefix(['P', 'p'])
            .ok_or_else(|| invalid("must start with 'P'"))?;
        if body.is_empty() {
            return Err(invalid("no components"));
        }

        let (date_part, time_part) = match body.split_once(['T', 't']) {
            Some((_, "")) => return Err(invalid("'T' must be followed by a time component")),
            Some((date, time)) => (date, Some(time)),
            None => (body, None),
        };

        let mut duration = Self::default();
        for (designator, amount) in components(date_part, &['Y', 'M', 'W', 'D']).map_err(|r| invalid(&r))? {
            match designator {
                'W' => duration.days = amount.checked_mul(7).ok_or_else(|| invalid("overflow"))?,
                'D' => {
                    duration.days = duration
                        .days
                        .checked_add(amount)
                        .ok_or_else(|| invalid("overflow"))?;
                }
                _ => return Err(invalid("calendar years and months are not supported")),
            }
        }

        if let Some(time_part) = time_part {
            for (designator, amount) in components(time_part, &['H', 'M', 'S']).map_err(|r| invalid(&r))? {
                match designator {
                    'H' => duration.hours = amount,
                    'M' => duration.minutes = amount,
                    _ => duration.seconds = amount,
                }
            }
        }

        Ok(duration)
    }
}

impl TryFrom<String> for IsoDuration {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IsoDuration> for String {
    fn from(value: IsoDuration) -> Self {
        value.to_string()
    }
}

/// Splits `12H30M` style text into ordered `(designator, amount)` pairs.
fn components(text: &str, designators: &[char]) -> Result<Vec<(char, u32)>, String> {
    let mut parsed = Vec::new();
    let mut digits = String::new();
    let mut next_allowed = 0_usize;

    for character in text.chars() {
        if character.is_ascii_digit() {
            digits.push(character);
            continue;
        }

        let designator = character.to_ascii_uppercase();
        let position = designators[next_allowed..]
            .iter()
            .position(|candidate| *candidate == designator)
            .ok_or_else(|| format!("unexpected designator '{character}'"))?;
        if digits.is_empty() {
            return Err(format!("designator '{character}' has no amount"));
        }

        let amount = digits
            .parse::<u32>()
            .map_err(|error| format!("amount '{digits}' is invalid: {error}"))?;
        parsed.push((designator, amount));
        digits.clear();
        next_allowed += position + 1;
    }

    if !digits.is_empty() {
        return Err(format!("amount '{digits}' has no designator"));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::IsoDuration;

    #[test]
    fn eight_hours_formats_as_pt8h() {
        let duration = IsoDuration::from_days_and_hours(0, 8);
        assert_eq!(duration.to_string(), "PT8H");

        let parsed = "PT8H".parse::<IsoDuration>();
        assert!(parsed.is_ok());
        let parsed = parsed.unwrap_or_default();
        assert_eq!(parsed.hours(), 8);
        assert_eq!(parsed.days(), 0);
    }

    #[test]
    fn policy_durations_parse() {
        let cases = [
            ("P15D", 15, 0, 0),
            ("P365D", 365, 0, 0),
            ("PT1H30M", 0, 1, 30),
            ("P1D", 1, 0, 0),
            ("P1DT12H", 1, 12, 0),
            ("P2W", 14, 0, 0),
        ];

        for (text, days, hours, minutes) in cases {
            let parsed = text.parse::<IsoDuration>();
            assert!(parsed.is_ok(), "{text} should parse");
            let parsed = parsed.unwrap_or_default();
            assert_eq!(
                (parsed.days(), parsed.hours(), parsed.minutes()),
                (days, hours, minutes),
                "{text}"
            );
        }
    }

    #[test]
    fn malformed_durations_are_rejected() {
        for text in ["", "P", "8H", "PT", "P1Y", "P1M", "PT8", "PTH", "PT30M1H", "P1DD"] {
            assert!(text.parse::<IsoDuration>().is_err(), "{text} should fail");
        }
    }

    #[test]
    fn zero_duration_formats_as_pt0s() {
        assert_eq!(IsoDuration::default().to_string(), "PT0S");
        assert!(IsoDuration::default().is_zero());
    }

    proptest! {
        #[test]
        fn formatted_duration_parses_back(
            days in 0_u32..1000,
            hours in 0_u32..48,
            minutes in 0_u32..60,
        ) {
            let mut duration = IsoDuration::from_days_and_hours(days, hours);
            duration.minutes = minutes;

            let parsed = duration.to_string().parse::<IsoDuration>();
            prop_assert!(parsed.is_ok());
            prop_assert_eq!(parsed.unwrap_or_default(), duration);
        }
    }
}
