use crate::{structs::*, view::*};

use teloxide::utils::html::escape;

//////////////////////////////////////////////////////////
// Telegram HTML for the current view
//////////////////////////////////////////////////////////

/// Emoji standing in for the route's color class.
pub fn color_badge(color: &str) -> &'static str {
    match color {
        "red" | "mattapan" => "🔴",
        "orange" => "🟠",
        "blue" => "🔵",
        "green" => "🟢",
        "silver" => "⚪",
        "purple" | "commuter" => "🟣",
        _ => "🚆",
    }
}

pub fn render_stop(stop: &StopResult) -> String {
    match stop {
        Some(stop) => {
            let distance = display_distance(stop);
            format!(
                "🚏 Nearest stop: <b>{}</b>\n{} {} away",
                escape(display_name(stop)),
                distance,
                distance.unit()
            )
        }
        None => "🚏 No stop nearby.".to_string(),
    }
}

pub fn render_train(train: &Train) -> String {
    format!(
        "{} <b>{}</b>\n{}",
        color_badge(&route_color(train)),
        format_arrival(train),
        trip_summary(train).as_trusted_html()
    )
}

pub fn render_trains(trains: &TrainList, updated: Option<&str>) -> String {
    let mut text = if trains.is_empty() {
        "No trains found.".to_string()
    } else {
        trains
            .iter()
            .map(render_train)
            .collect::<Vec<String>>()
            .join("\n--------------------\n")
    };
    if let Some(updated) = updated {
        text = format!("{}\n\n<i>Updated {}</i>", text, escape(updated));
    }
    text
}

pub fn render_filters(filters: &FilterState) -> String {
    let unset = "any".to_string();
    format!(
        "⚙️ Offset: <b>{:+}h</b>, direction: <b>{}</b>, line: <b>{}</b>",
        filters.offset,
        escape(filters.direction.as_ref().unwrap_or(&unset)),
        escape(filters.line.as_ref().unwrap_or(&unset))
    )
}

/// Stop, trains and filters in one message, for `/start` and `/status`.
pub fn render_view(state: &ViewState) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        render_stop(&state.stop),
        render_trains(&state.trains, state.updated.as_deref()),
        render_filters(&state.filters)
    )
}
