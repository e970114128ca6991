use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::media::webrtc::WebRtcMediaFactory;
use crate::negotiation::{self, EngineHandle, Intent, NegotiationEngine};
use crate::presenter::{ConsolePresenter, NoticeSource, Presenter};
use crate::signaling::WebSocketSignaling;
use crate::terminal::cli::Cli;
use crate::terminal::error::CliError;
use crate::terminal::input::{self, Command};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.to_config();
    let endpoint = config.relay_endpoint()?;
    info!(
        target: "pier::terminal",
        relay = %endpoint,
        ice_servers = ?config.ice_servers,
        "starting pier"
    );

    let (handle, events) = negotiation::channel();
    let signaling = WebSocketSignaling::connect(&endpoint, handle.sender()).await?;
    let presenter: Arc<dyn Presenter> = Arc::new(ConsolePresenter::new());
    let engine = NegotiationEngine::new(
        Arc::new(signaling),
        Arc::new(WebRtcMediaFactory::new(&config)),
        Arc::clone(&presenter),
        handle.sender(),
    );

    presenter.notify("Type /help for commands.", &NoticeSource::Server);
    if let Some(name) = cli.name {
        handle.submit(Intent::Login(name));
    }

    let input_task = tokio::spawn(read_input(handle, Arc::clone(&presenter)));
    let state = engine.run(events).await;
    input_task.abort();
    debug!(
        target: "pier::terminal",
        phase = %state.phase(),
        local_name = ?state.local_name(),
        "session finished"
    );
    Ok(())
}

async fn read_input(handle: EngineHandle, presenter: Arc<dyn Presenter>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(target: "pier::terminal", error = %err, "stdin read failed");
                break;
            }
        };
        match input::parse_line(&line) {
            Ok(Some(Command::Intent(intent))) => {
                if !handle.submit(intent) {
                    return;
                }
            }
            Ok(Some(Command::Help)) => presenter.notify(input::HELP, &NoticeSource::Server),
            Ok(Some(Command::Quit)) => break,
            Ok(None) => {}
            Err(err) => presenter.notify(&err.to_string(), &NoticeSource::Server),
        }
    }
    handle.shutdown();
}
