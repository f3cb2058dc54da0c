use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// User-selected filters sent along with every request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    /// Hours added to "now" before querying, may be negative.
    pub offset: i64,
    pub direction: Option<String>,
    pub line: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// Form body posted to both backend endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestArgs {
    pub lat: f64,
    pub lon: f64,
    /// Unix seconds, `now + offset` hours.
    pub dt: i64,
    pub offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}

impl RequestArgs {
    pub fn build(position: Position, filters: &FilterState, now: DateTime<Utc>) -> Self {
        let now_secs = (now.timestamp_millis() as f64 / 1000.0).round() as i64;
        RequestArgs {
            lat: position.lat,
            lon: position.lon,
            dt: now_secs + 60 * 60 * filters.offset,
            offset: filters.offset,
            direction: filters.direction.clone(),
            line: filters.line.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_station_name: Option<String>,
    /// Miles from the requested position.
    #[serde(deserialize_with = "lenient_f64")]
    pub distance: f64,
    /// Whatever else the backend sent, kept as is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `None` until a nearby stop has been fetched.
pub type StopResult = Option<Stop>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Train {
    /// Scheduled arrival, unix seconds.
    #[serde(deserialize_with = "lenient_i64")]
    pub sch_arr_dt: i64,
    /// Dash separated, e.g. "Red Line - Alewife".
    pub trip_name: String,
    /// First word is the line color.
    pub route_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type TrainList = Vec<Train>;

/// Everything the view shows, restored from and written through to storage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewState {
    pub filters: FilterState,
    pub stop: StopResult,
    pub trains: TrainList,
    /// `h:mm A` time of the last train fetch.
    pub updated: Option<String>,
}

/// The disjoint piece of [`ViewState`] a single fetch replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slice {
    Trains,
    Stop,
}

// The upstream feed quotes its numbers, so accept both forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    Float(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Loose::deserialize(deserializer)? {
        Loose::Int(v) => Ok(v as f64),
        Loose::Float(v) => Ok(v),
        Loose::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Loose::deserialize(deserializer)? {
        Loose::Int(v) => Ok(v),
        Loose::Float(v) => Ok(v.round() as i64),
        Loose::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|v| v.round() as i64))
                .map_err(de::Error::custom)
        }
    }
}
