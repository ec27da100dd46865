//! # Command Interpreter
//!
//! Turns the text of a chat mention into a [`Command`] and decides, without
//! touching any state, what the command means: which change to make to the
//! subscription set, what to do with the stream session and what to reply.
//! The [`crate::core::relay::Relay`] applies the resulting [`Outcome`].

use chrono::{DateTime, Local, TimeDelta};

use crate::core::subscriptions::SubscriptionSet;

/// Posted to the home channel whenever the chat connection comes up.
pub const ONLINE_BANNER: &str = "PBJTIME is ONLINE!!!! (with a baseball bat)";
/// Posted to the home channel after a supervised restart.
pub const RESTART_NOTICE: &str = "restarting PBJTIME";
/// Prefix of the reply posted when the stream cannot be opened. The cause
/// follows after a colon.
pub const STREAM_DOWN_NOTICE: &str = "stream could not be started";

/// The closed set of command verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// List every verb.
    Help,
    /// Mark the bot as started in chat (`time` or `init`).
    Time,
    /// Report uptime.
    Ping,
    /// Track keywords and (re)start the stream.
    Start,
    /// Track new keywords.
    Add,
    /// Stop tracking keywords.
    Remove,
    /// Stop tracking everything.
    RemoveAll,
    /// Stop the stream, keep the keywords.
    Stop,
    /// Show tracked keywords.
    List,
    /// Show match counters.
    Stats,
    /// List chat channels.
    Channels,
    /// Stop the stream and forget everything.
    Exit,
    /// Anything else, including an empty mention.
    Unknown(String),
}

impl Verb {
    /// Every recognised verb with its help text, in help order.
    pub const HELP: [(&'static str, &'static str); 12] = [
        ("help", "returns list of commands that can be used"),
        ("add", "adds subscription to search for on twitter"),
        ("ping", "shows uptime of bot"),
        ("exit", "stops twitter and slack bots."),
        ("start", "starts twitter bot subscription list(ex: start python piero)"),
        ("time", "starts slack bot."),
        ("remove", "removes subscription from list"),
        ("removeall", "removes all subscriptions"),
        ("list", "shows current subscriptions"),
        ("stop", "stops current twitter stream (subscriptions not deleted)"),
        ("channels", "to check all available channels"),
        ("stats", "shows number of tweets for current subscriptions"),
    ];

    /// Maps a lower-cased token to its verb.
    pub fn from_token(token: &str) -> Self {
        match token {
            "help" => Self::Help,
            "time" | "init" => Self::Time,
            "ping" => Self::Ping,
            "start" => Self::Start,
            "add" => Self::Add,
            "remove" => Self::Remove,
            "removeall" => Self::RemoveAll,
            "stop" => Self::Stop,
            "list" => Self::List,
            "stats" => Self::Stats,
            "channels" => Self::Channels,
            "exit" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A parsed command: a verb and its lower-cased, de-duplicated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// What to do.
    pub verb: Verb,
    /// Keyword arguments in the order given.
    pub args: Vec<String>,
}

impl Command {
    /// Parses the text that followed the bot mention.
    pub fn parse(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let mut tokens = lowered.split_whitespace();
        let verb = Verb::from_token(tokens.next().unwrap_or_default());
        let mut args: Vec<String> = Vec::new();
        for token in tokens {
            if !args.iter().any(|a| a == token) {
                args.push(token.to_string());
            }
        }
        Self { verb, args }
    }
}

/// Change to apply to the subscription set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Leave the set alone.
    None,
    /// Union these keywords in.
    Add(Vec<String>),
    /// Take these keywords out.
    Remove(Vec<String>),
    /// Drop every keyword and counter.
    Clear,
    /// Remember that the bot was started in chat.
    MarkStarted,
}

/// What to do with the stream session after the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// Leave the session as it is.
    Keep,
    /// Restart it on the post-mutation snapshot. An empty snapshot stops it.
    Restart,
    /// Stop it.
    Stop,
}

/// The reply to post back to the channel the command came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text.
    Text(String),
    /// The channel list, which only the chat transport can produce.
    Channels,
}

/// Everything a command means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Change to the subscription set.
    pub mutation: Mutation,
    /// Stream lifecycle action.
    pub action: StreamAction,
    /// What to answer.
    pub reply: Reply,
}

impl Outcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            mutation: Mutation::None,
            action: StreamAction::Keep,
            reply: Reply::Text(text.into()),
        }
    }
}

/// Read-only view of the relay used to interpret a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    /// The current subscriptions.
    pub subscriptions: &'a SubscriptionSet,
    /// Whether `time` was already issued.
    pub started: bool,
    /// How long the process has been up.
    pub uptime: TimeDelta,
    /// When the stream first connected, if ever.
    pub stream_since: Option<DateTime<Local>>,
    /// When the stream most recently connected.
    pub stream_last: Option<DateTime<Local>>,
    /// The current wall clock time.
    pub now: DateTime<Local>,
}

/// Decides what `command` means given `ctx`.
pub fn interpret(ctx: &CommandContext<'_>, command: &Command) -> Outcome {
    let subs = ctx.subscriptions;
    let args = &command.args;
    match &command.verb {
        Verb::Help => {
            let mut text = String::from("these commands are possible:");
            for (verb, description) in Verb::HELP {
                text.push_str(&format!("\n  {verb}: {description}"));
            }
            Outcome::reply(text)
        }
        Verb::Time => {
            if ctx.started {
                Outcome::reply("PBJTIME is already running. (help for more options)")
            } else {
                Outcome {
                    mutation: Mutation::MarkStarted,
                    action: StreamAction::Keep,
                    reply: Reply::Text("IT'S PEANUT BUTTER JELLY TIME!! \n(help for more options)".to_string()),
                }
            }
        }
        Verb::Ping => {
            let mut text = format!("Peanut Butter Jelly upTime: {}", format_uptime(ctx.uptime));
            if let Some(since) = ctx.stream_since {
                text.push_str(&format!(" (stream up {}", format_uptime(ctx.now - since)));
                match ctx.stream_last {
                    Some(last) if last > since => {
                        text.push_str(&format!(", last reconnect {} ago)", format_uptime(ctx.now - last)));
                    }
                    _ => text.push(')'),
                }
            }
            Outcome::reply(text)
        }
        Verb::Start => {
            if subs.is_empty() && args.is_empty() {
                return Outcome::reply("Please add subscriptions so I can find tweets.");
            }
            let reply = if args.is_empty() {
                format!("Started with subscriptions: {}", py_list(&subs.snapshot()))
            } else {
                format!("Added subscriptions: {}", py_list(args))
            };
            Outcome {
                mutation: Mutation::Add(args.clone()),
                action: StreamAction::Restart,
                reply: Reply::Text(reply),
            }
        }
        Verb::Add => {
            let fresh: Vec<String> = args.iter().filter(|a| !subs.contains(a)).cloned().collect();
            if fresh.is_empty() {
                return Outcome::reply("Please add new subscriptions so I can find tweets.");
            }
            let reply = format!("Added subscriptions: {}", py_list(&fresh));
            Outcome {
                mutation: Mutation::Add(fresh),
                action: StreamAction::Restart,
                reply: Reply::Text(reply),
            }
        }
        Verb::Remove => {
            let removed: Vec<String> = args.iter().filter(|a| subs.contains(a)).cloned().collect();
            if removed.is_empty() {
                return Outcome::reply("No subscriptions removed. use list to see current.");
            }
            let (action, reply) = if removed.len() == subs.len() {
                (
                    StreamAction::Stop,
                    format!("removed subscriptions: {}; nothing left to track, stream stopped.", py_list(&removed)),
                )
            } else {
                (
                    StreamAction::Restart,
                    format!("removed subscriptions: {} and restarted.", py_list(&removed)),
                )
            };
            Outcome {
                mutation: Mutation::Remove(removed),
                action,
                reply: Reply::Text(reply),
            }
        }
        Verb::RemoveAll => Outcome {
            mutation: Mutation::Clear,
            action: StreamAction::Stop,
            reply: Reply::Text("all subscriptions removed!".to_string()),
        },
        Verb::Stop => Outcome {
            mutation: Mutation::None,
            action: StreamAction::Stop,
            reply: Reply::Text("Twitter stream has been stopped.".to_string()),
        },
        Verb::List => Outcome::reply(format!("current subscriptions: \n {}", py_list(&subs.snapshot()))),
        Verb::Stats => {
            let body: Vec<String> = subs
                .counts()
                .iter()
                .map(|(keyword, count)| format!("'{keyword}': {count}"))
                .collect();
            Outcome::reply(format!("subscription stats: {{{}}}", body.join(", ")))
        }
        Verb::Channels => Outcome {
            mutation: Mutation::None,
            action: StreamAction::Keep,
            reply: Reply::Channels,
        },
        Verb::Exit => Outcome {
            mutation: Mutation::Clear,
            action: StreamAction::Stop,
            reply: Reply::Text("peanut butter jelly time :'( (goodbye)".to_string()),
        },
        Verb::Unknown(_) => Outcome::reply("Peanut Butter Jelly Time??? use help for more options."),
    }
}

/// Renders a channel listing reply.
pub fn channels_reply(names: &[String]) -> String {
    if names.is_empty() {
        "no channels visible to PBJTIME.".to_string()
    } else {
        format!("available channels: {}", py_list(names))
    }
}

/// `['a', 'b']`
fn py_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("'{i}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// `3 days, 4:05:06`, or `4:05:06` under a day.
pub fn format_uptime(uptime: TimeDelta) -> String {
    let total = uptime.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    match days {
        0 => format!("{hours}:{minutes:02}:{seconds:02}"),
        1 => format!("1 day, {hours}:{minutes:02}:{seconds:02}"),
        n => format!("{n} days, {hours}:{minutes:02}:{seconds:02}"),
    }
}
