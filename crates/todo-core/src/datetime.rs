use anyhow::anyhow;
use chrono::{
  Datelike,
  NaiveDate
};

/// Format of the date field as it is
/// entered and stored.
pub const INPUT_DATE_FORMAT: &str =
  "%Y-%m-%d";

pub const INVALID_DATE_LABEL: &str =
  "Invalid Date";

pub fn parse_calendar_date(
  raw: &str
) -> anyhow::Result<NaiveDate> {
  NaiveDate::parse_from_str(
    raw.trim(),
    INPUT_DATE_FORMAT
  )
  .map_err(|err| {
    anyhow!(
      "invalid calendar date \
       {raw:?}: {err}"
    )
  })
}

/// Numeric month/day/year without
/// padding, e.g. `3/1/2024`.
#[must_use]
pub fn format_numeric_date(
  date: NaiveDate
) -> String {
  format!(
    "{}/{}/{}",
    date.month(),
    date.day(),
    date.year()
  )
}

/// Display form of a stored date
/// string. Unparsable values render as
/// [`INVALID_DATE_LABEL`].
#[must_use]
pub fn display_date(raw: &str) -> String {
  parse_calendar_date(raw)
    .map(format_numeric_date)
    .unwrap_or_else(|_| {
      INVALID_DATE_LABEL.to_string()
    })
}

#[must_use]
pub fn format_clock(
  hours: u8,
  minutes: u8
) -> String {
  format!("{hours:02}:{minutes:02}")
}

/// Parse one clock field (hours or
/// minutes) as typed by the user.
///
/// Accepts one or two ASCII digits,
/// zero-pads to two and checks the
/// value against `max`.
pub fn parse_clock_component(
  raw: &str,
  max: u8
) -> Option<u8> {
  let trimmed = raw.trim();
  if trimmed.is_empty()
    || trimmed.len() > 2
    || !trimmed
      .chars()
      .all(|ch| ch.is_ascii_digit())
  {
    return None;
  }

  let padded =
    format!("{trimmed:0>2}");
  let value =
    padded.parse::<u8>().ok()?;
  (value <= max).then_some(value)
}
