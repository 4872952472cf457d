//! Repeater Bot Example
//!
//! Echoes messages back and shows how pattern waits and fallback dispatch
//! share one event stream:
//!
//! - `/ping` replies `Pong!`
//! - `/echo <text>` replies `<text>`
//! - `/ask` asks a question and waits 30 seconds for the same user's answer;
//!   the answer is claimed by the wait and never reaches the fallback
//! - any group message sent twice in a row is repeated once
//!
//! # Usage
//!
//! ```bash
//! MIRAI_SESSION__AUTH_KEY=... MIRAI_SESSION__BOT_ID=12345 \
//!     cargo run --package repeater -- --config mirai.toml
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mirai::prelude::*;
use mirai::runtime::ConfigLoader;

const ANSWER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "repeater", about = "A mirai repeater bot")]
struct Args {
    /// Configuration file (defaults to mirai.toml in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `development` or `production`
    #[arg(short, long)]
    profile: Option<String>,
}

/// Last message text per group, for repeating.
#[derive(Default)]
struct History {
    last: Mutex<HashMap<GroupId, (String, bool)>>,
}

impl History {
    /// Returns true when `text` repeats the previous message and has not been
    /// repeated yet.
    fn should_repeat(&self, group: GroupId, text: &str) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        let (previous, repeated) = last.entry(group).or_default();
        if previous == text {
            !std::mem::replace(repeated, true)
        } else {
            *previous = text.to_owned();
            *repeated = false;
            false
        }
    }
}

async fn ask<E: MessageEvent>(bot: &Bot, event: &E) -> Result<()> {
    bot.reply(event, "What is your favourite colour?").await?;

    let asker = event.sender_id();
    let answer = match event.reply_target() {
        ReplyTarget::Group(group) => bot
            .next_event_within::<GroupMessageEvent, _>(ANSWER_TIMEOUT, (from_user(asker), from_group(group)))
            .await?
            .map(|e| e.message.plain_text()),
        _ => bot
            .next_event_within::<FriendMessageEvent, _>(ANSWER_TIMEOUT, from_user(asker))
            .await?
            .map(|e| e.message.plain_text()),
    };

    match answer {
        Some(colour) => bot.quote_reply(event, format!("{colour} is a fine colour.")).await?,
        None => bot.reply(event, "Too slow!").await?,
    };
    Ok(())
}

async fn on_message<E: MessageEvent>(bot: &Bot, history: &History, event: &E) -> Result<()> {
    let text = event.message().plain_text();
    let text = text.trim();

    if text == "/ping" {
        bot.reply(event, "Pong!").await?;
    } else if let Some(content) = text.strip_prefix("/echo ") {
        bot.reply(event, content).await?;
    } else if text == "/ask" {
        ask(bot, event).await?;
    } else if let ReplyTarget::Group(group) = event.reply_target()
        && !text.is_empty()
        && history.should_repeat(group, text)
    {
        bot.send_message(event.reply_target(), event.message().content.clone(), None)
            .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    let runtime = MiraiRuntime::from_loader(loader)?;
    let monitor = runtime.clone();

    runtime
        .run(|bot: Bot| async move {
            let history = Arc::new(History::default());
            let handler_bot = bot.clone();

            monitor
                .monitor_events(&bot, move |event: Event| {
                    let bot = handler_bot.clone();
                    let history = Arc::clone(&history);
                    async move {
                        let result = match &event {
                            Event::FriendMessage(e) => on_message(&bot, &history, e).await,
                            Event::GroupMessage(e) => on_message(&bot, &history, e).await,
                            Event::TempMessage(e) => on_message(&bot, &history, e).await,
                            other => {
                                debug!(event_type = %other.event_type(), "Ignoring event");
                                Ok(())
                            }
                        };
                        if let Err(e) = result {
                            error!(error = %e, "Failed to handle message");
                        }
                        Ok(Flow::Continue)
                    }
                })
                .await
        })
        .await?;

    info!("Repeater stopped");
    Ok(())
}
