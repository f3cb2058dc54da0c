use std::fmt;

use chrono::{Local, TimeZone, Utc};

use crate::structs::{Stop, Train};

const KM_PER_MILE: f64 = 1.60934;
const CLOCK_FORMAT: &str = "%-I:%M %p";
const LINE_BREAK: &str = "\n";

//////////////////////////////////////////////////////////
// Derived values for the presentation layer
//////////////////////////////////////////////////////////

/// Markup that is emitted without escaping.
///
/// The only way in is [`TrustedMarkup::assume_trusted`] and the only way out is
/// [`TrustedMarkup::as_trusted_html`], so both sides of the passthrough are
/// visible at the call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedMarkup(String);

impl TrustedMarkup {
    pub fn assume_trusted(html: impl Into<String>) -> Self {
        TrustedMarkup(html.into())
    }

    pub fn as_trusted_html(&self) -> &str {
        &self.0
    }
}

/// Distance with the unit picked at the 1 km boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DisplayDistance {
    Kilometers(f64),
    Meters(i64),
}

impl DisplayDistance {
    pub fn unit(&self) -> &'static str {
        match self {
            DisplayDistance::Kilometers(_) => "km",
            DisplayDistance::Meters(_) => "m",
        }
    }
}

impl fmt::Display for DisplayDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayDistance::Kilometers(km) => write!(f, "{:.2}", km),
            DisplayDistance::Meters(m) => write!(f, "{}", m),
        }
    }
}

/// Parent station if the backend named one, the platform otherwise.
pub fn display_name(stop: &Stop) -> &str {
    match stop.parent_station_name.as_deref() {
        Some(parent) if !parent.is_empty() => parent,
        _ => &stop.stop_name,
    }
}

pub fn display_distance(stop: &Stop) -> DisplayDistance {
    let kilometers = stop.distance * KM_PER_MILE;
    if kilometers > 1.0 {
        DisplayDistance::Kilometers(kilometers)
    } else {
        DisplayDistance::Meters((kilometers * 1000.0).round() as i64)
    }
}

pub fn format_arrival(train: &Train) -> String {
    format_arrival_in(train, &Local)
}

pub fn format_arrival_in<Tz>(train: &Train, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    match Utc.timestamp_opt(train.sch_arr_dt, 0).single() {
        Some(at) => at.with_timezone(tz).format(CLOCK_FORMAT).to_string(),
        None => String::new(),
    }
}

/// Current local time as shown next to "Updated".
pub fn clock_now() -> String {
    Local::now().format(CLOCK_FORMAT).to_string()
}

/// Trip name without the "... Line" segments, one segment per line.
pub fn trip_summary(train: &Train) -> TrustedMarkup {
    let details = train
        .trip_name
        .split(" - ")
        .filter(|segment| !segment.to_lowercase().contains("line"))
        .collect::<Vec<&str>>();
    TrustedMarkup::assume_trusted(details.join(LINE_BREAK))
}

/// "Red Line" -> "red"
pub fn route_color(train: &Train) -> String {
    train
        .route_name
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase()
}
