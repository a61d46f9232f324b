//! Kiyomi Practice - a terminal client for one practice call.
//!
//! Picks a scenario from the Kiyomi API (or has one generated), joins the
//! practice room and renders the call until it ends.

mod catalog;
#[cfg(feature = "microphone")]
mod microphone;
mod pick;
mod render;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use catalog::HttpScenarioStore;
use clap::Parser;
use kiyomi_core::{ConnectionDetails, Gender, Scenario, ScenarioStore, UserProfile};
use kiyomi_realtime::{AudioInput, RealtimeRoom, WsRoom};
use kiyomi_session::{
    CallController, CallTimings, ConnectionManager, HttpTokenIssuer, RoomFactory, Screen,
    TokenIssuer,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, debug, warn};

#[derive(Parser, Debug)]
#[command(name = "kiyomi-practice", version, about = "Practice a conversation with an AI persona")]
struct Cli {
    /// Base URL of the Kiyomi API.
    #[arg(long, env = "KIYOMI_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Restrict the scenario search to one skill.
    #[arg(long)]
    skill: Option<String>,

    /// Scenario id, or an approximate scenario name.
    #[arg(long)]
    scenario: Option<String>,

    /// Describe a situation to have a scenario generated for it.
    #[arg(long, requires = "goal", conflicts_with = "scenario")]
    describe: Option<String>,

    /// What you want to achieve in the generated scenario.
    #[arg(long, requires = "describe")]
    goal: Option<String>,

    /// Your name, as the persona should address you.
    #[arg(long, env = "KIYOMI_USER_NAME", default_value = "")]
    name: String,

    /// male, female or neutral.
    #[arg(long, env = "KIYOMI_USER_GENDER", default_value = "neutral")]
    gender: String,

    /// Join this room relay instead of the server URL in the connection details.
    #[arg(long, env = "KIYOMI_ROOM_URL")]
    room_url: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Points the issued connection details at a different room server.
struct RelayIssuer {
    inner: HttpTokenIssuer,
    room_url: String,
}

#[async_trait]
impl TokenIssuer for RelayIssuer {
    async fn issue(&self, scenario: &Scenario, profile: &UserProfile) -> Result<ConnectionDetails> {
        let mut details = self.inner.issue(scenario, profile).await?;
        details.server_url = self.room_url.clone();
        Ok(details)
    }
}

#[cfg(feature = "microphone")]
fn audio_input() -> Arc<dyn AudioInput> {
    Arc::new(microphone::CpalMicrophone)
}

#[cfg(not(feature = "microphone"))]
fn audio_input() -> Arc<dyn AudioInput> {
    Arc::new(kiyomi_realtime::SilentInput)
}

async fn resolve_scenario(cli: &Cli, store: &HttpScenarioStore) -> Result<Option<Scenario>> {
    if let (Some(description), Some(goal)) = (&cli.describe, &cli.goal) {
        println!("Generating a scenario...");
        return store.generate(description, goal).await.map(Some);
    }

    let skills = store
        .list_skills()
        .await
        .context("Failed to load the scenario catalog")?;
    let Some(query) = &cli.scenario else {
        print!("{}", render::skills(&skills));
        println!("\nPick one with --scenario <id or name>.");
        return Ok(None);
    };
    match pick::find_scenario(&skills, cli.skill.as_deref(), query) {
        Some(scenario) => Ok(Some(scenario.clone())),
        None => bail!("No scenario matches '{}'", query),
    }
}

fn controller_for(cli: &Cli, client: reqwest::Client) -> CallController {
    let http = HttpTokenIssuer::with_client(client, cli.api_url.clone());
    let issuer: Arc<dyn TokenIssuer> = match &cli.room_url {
        Some(room_url) => Arc::new(RelayIssuer {
            inner: http,
            room_url: room_url.clone(),
        }),
        None => Arc::new(http),
    };
    let audio = audio_input();
    let factory: RoomFactory = Arc::new(move || {
        Arc::new(WsRoom::new().with_audio_input(Arc::clone(&audio))) as Arc<dyn RealtimeRoom>
    });
    CallController::new(ConnectionManager::new(issuer, factory), CallTimings::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let client = reqwest::Client::new();
    let store = HttpScenarioStore::new(client.clone(), &cli.api_url);
    let Some(scenario) = resolve_scenario(&cli, &store).await? else {
        return Ok(());
    };
    println!("Scenario: {} ({})\nGoal: {}", scenario.name, scenario.skill, scenario.goal);

    let gender = cli.gender.parse::<Gender>().unwrap_or_default();
    let controller = controller_for(&cli, client);
    controller.set_profile(UserProfile::new(cli.name.clone(), gender));
    controller.select_scenario(scenario)?;

    run_call(controller).await
}

/// Drives one call from start to the return to `Setup`.
async fn run_call(controller: CallController) -> Result<()> {
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render::event(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped call events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut screen = controller.screen();
    let mut starter = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start_call().await }
    });
    let mut start_done = false;
    let mut left_setup = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = screen.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = screen.borrow_and_update().clone();
                println!("{}", render::screen(&current));
                match current {
                    Screen::Setup if left_setup => break,
                    Screen::Setup => {}
                    _ => left_setup = true,
                }
            }
            started = &mut starter, if !start_done => {
                start_done = true;
                match started {
                    Ok(Ok(())) => debug!("Call is live"),
                    Ok(Err(e)) => {
                        println!("Could not start the call: {}", e);
                        break;
                    }
                    Err(e) => bail!("Call task failed: {}", e),
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    let _ = controller.leave().await;
                    break;
                };
                match line.trim() {
                    "h" => {
                        let controller = controller.clone();
                        tokio::spawn(async move {
                            if let Err(e) = controller.request_hint().await {
                                println!("No hint: {}", e);
                            }
                        });
                    }
                    "q" => {
                        let _ = controller.leave().await;
                        break;
                    }
                    "e" => {
                        if let Err(e) = controller.end_call().await {
                            println!("{}", e);
                        } else {
                            break;
                        }
                    }
                    "" => {}
                    other => println!("Unknown command '{}'. h: hint, q: leave, e: end call", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = controller.leave().await;
                break;
            }
        }
    }
    Ok(())
}
