use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_common::core::{ControlLoop, ControlSettings, Relay, RelaySettings};
use lib_common::ingestors::{SlackClient, SlackRtm, TwitterStream};
use lib_common::loggers::{self, LoggerLocalOptions};

mod relay_logic;
use relay_logic::{banner, config};

const APP_NAME: &str = "server_relay";

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let started = Local::now();
    // A missing .env is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();

    let config = config::load_config().context("loading configuration")?;

    let mut log_options = LoggerLocalOptions::new(APP_NAME);
    log_options.log_dir = config.log_dir.clone();
    log_options.keep = config.log_keep;
    log_options.level = loggers::parse_level(&config.log_level);
    let log_path = loggers::init(&log_options).context("installing logger")?;

    log::info!("\n{}", banner::start_banner(APP_NAME, started));
    log::info!("Logging to {}", log_path.display());
    log::debug!("{:?}", config);

    let slack = SlackClient::new(&config.slack_api_url, config.slack_api_token.clone())
        .context("building Slack client")?;
    let twitter = TwitterStream::new(&config.twitter_api_url, config.twitter_bearer_token.clone())
        .context("building Twitter client")?;

    let (relay, faults) = Relay::new(
        Arc::new(twitter),
        Arc::new(slack.clone()),
        RelaySettings {
            relay_channel: config.channel.clone(),
            join_timeout: config.worker_join_timeout,
        },
    );

    let shutdown = CancellationToken::new();
    let control = ControlLoop::new(
        SlackRtm::new(slack),
        relay,
        faults,
        ControlSettings {
            home_channel: config.home_channel.clone(),
            bot_id: config.bot_id.clone(),
            poll_interval: config.poll_interval,
            restart_delay: config.restart_delay,
        },
        shutdown.clone(),
    );
    let control_handle = tokio::spawn(control.run());

    wait_for_signal().await;
    shutdown.cancel();

    let restarts = control_handle.await.context("control loop task failed")?;

    let uptime = Local::now() - started;
    log::info!("\n{}", banner::exit_banner(APP_NAME, uptime, restarts));
    log::logger().flush();
    Ok(())
}
