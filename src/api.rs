use crate::{
    error::{Error, Result},
    structs::*,
};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde_json::{Map, Value};

const NEXT_TRAINS: &str = "/api/next_trains";
const NEARBY_STOP: &str = "/api/nearby_stop";

/// What the backend answers when nothing matched the query.
const NOTHING_SENTINEL: &str = "Nothing!";

/// The backend collaborator: station lookup and arrival prediction live there.
#[async_trait]
pub trait TransitApi: Send + Sync {
    async fn next_trains(&self, args: &RequestArgs) -> Result<TrainList>;
    async fn nearby_stop(&self, args: &RequestArgs) -> Result<StopResult>;
}

#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpApi {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post_form(&self, endpoint: &'static str, args: &RequestArgs) -> Result<String> {
        let url = format!("{}{}", self.base_url, endpoint);
        log::debug!("POST {} {:?}", url, args);

        let resp = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("next-trains-bot/", env!("CARGO_PKG_VERSION")))
            .form(args)
            .send()
            .await
            .map_err(|source| Error::Http { endpoint, source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status { endpoint, status });
        }

        resp.text()
            .await
            .map_err(|source| Error::Http { endpoint, source })
    }
}

//////////////////////////////////////////////////////////
// API calls
//////////////////////////////////////////////////////////
#[async_trait]
impl TransitApi for HttpApi {
    async fn next_trains(&self, args: &RequestArgs) -> Result<TrainList> {
        let body = self.post_form(NEXT_TRAINS, args).await?;
        parse_train_list(&body)
    }

    async fn nearby_stop(&self, args: &RequestArgs) -> Result<StopResult> {
        let body = self.post_form(NEARBY_STOP, args).await?;
        parse_stop(&body)
    }
}

fn decode_error(what: &'static str) -> impl FnOnce(serde_json::Error) -> Error {
    move |source| Error::Decode { what, source }
}

fn is_nothing(obj: &Map<String, Value>) -> bool {
    obj.get("route_name").and_then(Value::as_str) == Some(NOTHING_SENTINEL)
}

/// Accepts a bare array, the `{"all_trains": [...]}` envelope, the
/// "Nothing!" answer and `{}`; the last two mean no trains.
pub fn parse_train_list(body: &str) -> Result<TrainList> {
    let json: Value = serde_json::from_str(body).map_err(decode_error("train list"))?;
    train_list_from_json(json)
}

pub fn train_list_from_json(json: Value) -> Result<TrainList> {
    let trains = match json {
        Value::Object(mut obj) => {
            if let Some(all_trains) = obj.remove("all_trains") {
                all_trains
            } else if obj.is_empty() || is_nothing(&obj) {
                return Ok(TrainList::new());
            } else {
                Value::Object(obj)
            }
        }
        other => other,
    };

    serde_json::from_value(trains).map_err(decode_error("train list"))
}

/// `None` for the "Nothing!" answer and for `{}`.
pub fn parse_stop(body: &str) -> Result<StopResult> {
    let json: Value = serde_json::from_str(body).map_err(decode_error("stop"))?;
    stop_from_json(json)
}

pub fn stop_from_json(json: Value) -> Result<StopResult> {
    if let Value::Object(obj) = &json {
        if obj.is_empty() || (!obj.contains_key("stop_name") && is_nothing(obj)) {
            return Ok(None);
        }
    }

    serde_json::from_value(json)
        .map(Some)
        .map_err(decode_error("stop"))
}
