use crate::{
    api::{self, TransitApi},
    error::Result,
    io::{load_or, save_value, Storage},
    structs::*,
    view,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard,
};

pub const KEY_TRAINS: &str = "trains";
pub const KEY_UPDATED: &str = "updated";
pub const KEY_STOP: &str = "stop";
pub const KEY_OFFSET: &str = "args.offset";
pub const KEY_DIRECTION: &str = "args.direction";
pub const KEY_LINE: &str = "args.line";

/// One-shot position lookup. `None` covers denial, failure and silence alike.
#[async_trait]
pub trait Locator: Send + Sync {
    async fn locate(&self) -> Option<Position>;
}

/// A position the user already handed over.
pub struct SharedLocation(pub Position);

#[async_trait]
impl Locator for SharedLocation {
    async fn locate(&self) -> Option<Position> {
        Some(self.0)
    }
}

/// What happened to a response once it arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Applied,
    /// A newer activation was issued meanwhile; the response was dropped.
    Discarded,
}

#[derive(Debug)]
pub enum Activation {
    NoPosition,
    Fetched {
        args: RequestArgs,
        trains: Result<Delivery>,
        stop: Result<Delivery>,
    },
}

pub struct ViewController<A> {
    store: Box<dyn Storage>,
    api: A,
    state: Mutex<ViewState>,
    generation: AtomicU64,
}

impl<A: TransitApi> ViewController<A> {
    /// Binds to `store`, restoring whatever an earlier session left there.
    pub fn restore(store: Box<dyn Storage>, api: A) -> Self {
        let state = load_state(store.as_ref());
        ViewController {
            store,
            api,
            state: Mutex::new(state),
            generation: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    pub fn snapshot(&self) -> ViewState {
        self.lock().clone()
    }

    pub fn filters(&self) -> FilterState {
        self.lock().filters.clone()
    }

    // Every setter writes the store first; memory only follows a successful save.
    pub fn set_offset(&self, offset: i64) -> Result<()> {
        save_value(self.store.as_ref(), KEY_OFFSET, &offset)?;
        self.lock().filters.offset = offset;
        Ok(())
    }

    pub fn set_direction(&self, direction: Option<String>) -> Result<()> {
        let direction = normalize(direction);
        save_value(self.store.as_ref(), KEY_DIRECTION, &direction)?;
        self.lock().filters.direction = direction;
        Ok(())
    }

    pub fn set_line(&self, line: Option<String>) -> Result<()> {
        let line = normalize(line);
        save_value(self.store.as_ref(), KEY_LINE, &line)?;
        self.lock().filters.line = line;
        Ok(())
    }

    pub fn clear_filters(&self) -> Result<()> {
        self.set_offset(0)?;
        self.set_direction(None)?;
        self.set_line(None)
    }

    /// Locate, then fetch trains and the nearby stop concurrently.
    ///
    /// `on_change` runs once per slice, as soon as that slice was applied.
    pub async fn activate<L, F>(&self, locator: &L, on_change: F) -> Activation
    where
        L: Locator + ?Sized,
        F: Fn(Slice) + Send + Sync,
    {
        let position = match locator.locate().await {
            Some(position) => position,
            None => {
                log::debug!("No position available, keeping current view");
                return Activation::NoPosition;
            }
        };

        let args = RequestArgs::build(position, &self.filters(), Utc::now());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!(
            "Fetching around ({}, {}) at dt={} [generation {}]",
            args.lat,
            args.lon,
            args.dt,
            generation
        );

        let (trains, stop) = tokio::join!(
            async {
                let delivery = self.fetch_trains(&args, generation).await;
                if let Ok(Delivery::Applied) = delivery {
                    on_change(Slice::Trains);
                }
                delivery
            },
            async {
                let delivery = self.fetch_stop(&args, generation).await;
                if let Ok(Delivery::Applied) = delivery {
                    on_change(Slice::Stop);
                }
                delivery
            },
        );

        if let Err(e) = &trains {
            log::warn!("Fetching next trains failed: {}", e);
        }
        if let Err(e) = &stop {
            log::warn!("Fetching nearby stop failed: {}", e);
        }

        Activation::Fetched { args, trains, stop }
    }

    /// Replaces the train list and the update time if `generation` is current.
    pub async fn fetch_trains(&self, args: &RequestArgs, generation: u64) -> Result<Delivery> {
        let trains = self.api.next_trains(args).await?;
        if self.is_stale(generation, Slice::Trains) {
            return Ok(Delivery::Discarded);
        }

        let updated = view::clock_now();
        save_value(self.store.as_ref(), KEY_TRAINS, &trains)?;
        save_value(self.store.as_ref(), KEY_UPDATED, &updated)?;

        let mut state = self.lock();
        state.trains = trains;
        state.updated = Some(updated);
        Ok(Delivery::Applied)
    }

    /// Replaces the nearby stop if `generation` is current.
    pub async fn fetch_stop(&self, args: &RequestArgs, generation: u64) -> Result<Delivery> {
        let stop = self.api.nearby_stop(args).await?;
        if self.is_stale(generation, Slice::Stop) {
            return Ok(Delivery::Discarded);
        }

        save_value(self.store.as_ref(), KEY_STOP, &stop)?;
        self.lock().stop = stop;
        Ok(Delivery::Applied)
    }

    /// Number of the most recently issued activation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_stale(&self, generation: u64, slice: Slice) -> bool {
        let latest = self.generation();
        if generation != latest {
            log::debug!(
                "Dropping {:?} response of generation {} (latest is {})",
                slice,
                generation,
                latest
            );
            return true;
        }
        false
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_state(store: &dyn Storage) -> ViewState {
    // Older state files hold `{}` under "trains", which still reads as empty.
    let trains = match load_or::<Value>(store, KEY_TRAINS, Value::Null) {
        Value::Null => TrainList::new(),
        value => api::train_list_from_json(value).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable value under '{}': {}", KEY_TRAINS, e);
            TrainList::new()
        }),
    };

    let stop = match load_or::<Value>(store, KEY_STOP, Value::Null) {
        Value::Null => None,
        value => api::stop_from_json(value).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable value under '{}': {}", KEY_STOP, e);
            None
        }),
    };

    ViewState {
        filters: FilterState {
            offset: load_or(store, KEY_OFFSET, 0),
            direction: load_or(store, KEY_DIRECTION, None),
            line: load_or(store, KEY_LINE, None),
        },
        stop,
        trains,
        updated: load_or(store, KEY_UPDATED, None),
    }
}
