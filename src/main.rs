pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod io;
pub mod render;
pub mod structs;
pub mod view;

use api::HttpApi;
use config::Config;
use controller::{Activation, Delivery, SharedLocation, ViewController};
use io::JsonFileStore;
use render::*;
use structs::*;

use std::{
    collections::HashMap,
    error::Error,
    sync::{Arc, Mutex},
};
use teloxide::{
    filter_command,
    prelude::*,
    types::{ButtonRequest, KeyboardButton, KeyboardMarkup, Location, ParseMode::Html},
    utils::command::BotCommands,
};
use tokio::sync::mpsc;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type Controller = ViewController<HttpApi>;

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "Display help menu showing the commands list")]
    Help,
    #[command(description = "Show the last results and look up trains near you.")]
    Start,
    #[command(description = "Look up trains near your current location.")]
    Go,
    #[command(description = "Show the last results without refreshing.")]
    Status,
    #[command(description = "Shift the query time by N hours, e.g. /offset -2")]
    Offset(i64),
    #[command(description = "Only trains towards this direction, empty to clear.")]
    Direction(String),
    #[command(description = "Only trains on this line, empty to clear.")]
    Line(String),
    #[command(description = "Reset offset, direction and line.")]
    Clear,
}

/// One view controller per chat, all persisted into the same state file.
#[derive(Clone)]
struct Chats {
    api: HttpApi,
    file: Arc<JsonFileStore>,
    // Never evicted: one small controller per chat that has talked to the bot,
    // kept for the life of the process. Dropping an entry is safe since
    // `restore` rebuilds it from the state file.
    controllers: Arc<Mutex<HashMap<ChatId, Arc<Controller>>>>,
}

impl Chats {
    fn new(config: &Config) -> Result<Self, error::Error> {
        Ok(Chats {
            api: HttpApi::new(config.api_url.clone()),
            file: Arc::new(JsonFileStore::open(&config.state_path)?),
            controllers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn controller(&self, chat_id: ChatId) -> Arc<Controller> {
        let mut controllers = self.controllers.lock().unwrap_or_else(|p| p.into_inner());
        let controller = controllers.entry(chat_id).or_insert_with(|| {
            let store = JsonFileStore::scope(&self.file, chat_id.0);
            Arc::new(ViewController::restore(Box::new(store), self.api.clone()))
        });
        Arc::clone(controller)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();
    pretty_env_logger::init();
    log::info!("Starting 'Next trains' BOT against {} ...", config.api_url);

    let bot = Bot::from_env();
    let chats = Chats::new(&config)?;

    bot.set_my_commands(Command::bot_commands()).await?;

    let handler = Update::filter_message()
        .branch(filter_command::<Command, _>().endpoint(handle_command))
        .branch(
            dptree::filter_map(|msg: Message| msg.location().cloned())
                .endpoint(receive_location),
        )
        .branch(dptree::endpoint(invalid_state));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![chats])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "Unable to handle the message. Type /help to see the usage.",
    )
    .await?;
    Ok(())
}

//////////////////////////////////////////////////////////
// Command handlers
//////////////////////////////////////////////////////////
async fn handle_command(bot: Bot, msg: Message, cmd: Command, chats: Chats) -> HandlerResult {
    let chat_id = msg.chat.id;
    let controller = chats.controller(chat_id);

    match cmd {
        Command::Help => {
            bot.send_message(chat_id, Command::descriptions().to_string())
                .await?;
        }
        Command::Start => {
            bot.send_message(chat_id, render_view(&controller.snapshot()))
                .parse_mode(Html)
                .await?;
            ask_for_location(&bot, chat_id).await?;
        }
        Command::Go => ask_for_location(&bot, chat_id).await?,
        Command::Status => {
            bot.send_message(chat_id, render_view(&controller.snapshot()))
                .parse_mode(Html)
                .await?;
        }
        Command::Offset(hours) => {
            controller.set_offset(hours)?;
            send_filters(&bot, chat_id, &controller).await?;
        }
        Command::Direction(direction) => {
            controller.set_direction(Some(direction))?;
            send_filters(&bot, chat_id, &controller).await?;
        }
        Command::Line(line) => {
            controller.set_line(Some(line))?;
            send_filters(&bot, chat_id, &controller).await?;
        }
        Command::Clear => {
            controller.clear_filters()?;
            send_filters(&bot, chat_id, &controller).await?;
        }
    }
    Ok(())
}

async fn send_filters(bot: &Bot, chat_id: ChatId, controller: &Controller) -> HandlerResult {
    bot.send_message(chat_id, render_filters(&controller.filters()))
        .parse_mode(Html)
        .await?;
    Ok(())
}

async fn ask_for_location(bot: &Bot, chat_id: ChatId) -> HandlerResult {
    bot.send_message(chat_id, "📍 Share your location to find the nearest stop.")
        .reply_markup(make_location_keyboard())
        .await?;
    Ok(())
}

//////////////////////////////////////////////////////////
// Location handler
//////////////////////////////////////////////////////////
async fn receive_location(
    bot: Bot,
    msg: Message,
    location: Location,
    chats: Chats,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let controller = chats.controller(chat_id);
    let position = Position {
        lat: location.latitude,
        lon: location.longitude,
    };

    // The dispatcher serves a chat's updates in order; return at once so a
    // new location or command can start while this cycle is still in flight.
    tokio::spawn(async move {
        if let Err(e) = refresh(bot, chat_id, controller, position).await {
            log::warn!("Refreshing chat {} failed: {}", chat_id.0, e);
        }
    });
    Ok(())
}

async fn refresh(
    bot: Bot,
    chat_id: ChatId,
    controller: Arc<Controller>,
    position: Position,
) -> HandlerResult {
    // Each slice is sent as soon as it lands, independent of the other fetch.
    let (tx, mut rx) = mpsc::unbounded_channel::<Slice>();
    let renderer = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            while let Some(slice) = rx.recv().await {
                let state = controller.snapshot();
                let text = match slice {
                    Slice::Stop => render_stop(&state.stop),
                    Slice::Trains => render_trains(&state.trains, state.updated.as_deref()),
                };
                bot.send_message(chat_id, text).parse_mode(Html).await?;
            }
            Ok::<(), teloxide::RequestError>(())
        })
    };

    let activation = controller
        .activate(&SharedLocation(position), move |slice| {
            if tx.send(slice).is_err() {
                log::debug!("Renderer for chat {} is gone, dropping {:?}", chat_id.0, slice);
            }
        })
        .await;
    renderer.await??;

    // Failures stay quiet towards the user; the previous view remains valid.
    if let Activation::Fetched { trains, stop, .. } = activation {
        let discarded = [trains.ok(), stop.ok()]
            .iter()
            .filter(|d| **d == Some(Delivery::Discarded))
            .count();
        if discarded > 0 {
            log::debug!("{} response(s) superseded for chat {}", discarded, chat_id.0);
        }
    }
    Ok(())
}

//////////////////////////////////////////////////////////
// Keyboards
//////////////////////////////////////////////////////////
/// One-time keyboard with a single button that shares the device location.
fn make_location_keyboard() -> KeyboardMarkup {
    let keyboard = vec![vec![
        KeyboardButton::new("📍 Share location").request(ButtonRequest::Location)
    ]];

    KeyboardMarkup::new(keyboard)
        .resize_keyboard(true)
        .one_time_keyboard(true)
}
