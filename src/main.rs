mod backend;
mod breaker;
mod cache;
mod clock;
mod config;
mod connectivity;
mod dedup;
mod gateway;
mod logging;
mod queue;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backend::HttpBackend;
use breaker::BreakerState;
use clock::SystemClock;
use config::Config;
use connectivity::probe::HealthProbe;
use connectivity::ConnectivityMonitor;
use gateway::{Gateway, GatewaySettings, Outcome, Source};
use store::{LocalStore, MemoryStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "socgate")]
#[command(about = "Resilient client for the SOC assistant backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/socgate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend base URL, overrides the config file
  #[arg(short, long, env = "SOCGATE_URL")]
  url: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  /// Keep queue and fallback snapshots in memory only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a message to the assistant (queued if the backend is unreachable)
  Send {
    text: String,
    #[arg(short = 'C', long)]
    conversation: Option<String>,
  },
  /// List tools the assistant can use
  Tools,
  /// List conversations
  Conversations,
  /// Show one conversation
  Conversation { id: String },
  /// Rename a conversation
  Rename { id: String, title: String },
  /// Clear the assistant's session memory
  ClearMemory {
    #[arg(long)]
    session: Option<String>,
  },
  /// Show messages waiting in the offline queue
  Queue,
  /// Send queued messages now
  Drain,
  /// Show connectivity, queue and circuit breaker state
  Status,
  /// Monitor connectivity and deliver queued messages on reconnect
  Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.url {
    config.backend.url = url;
  }

  let log_dir = match &config.log.directory {
    Some(dir) => dir.clone(),
    None => store::data_dir()?,
  };
  let _log_guard = logging::init(&log_dir, config.log.filter.as_deref(), args.log_stderr)?;

  let local: Arc<dyn LocalStore> = if args.ephemeral {
    Arc::new(MemoryStore::new())
  } else {
    match &config.state_path {
      Some(path) => Arc::new(SqliteStore::open_at(path)?),
      None => Arc::new(SqliteStore::open()?),
    }
  };

  let backend = Arc::new(HttpBackend::new(
    &config.backend.url,
    Config::get_api_token(),
  )?);
  let monitor = Arc::new(ConnectivityMonitor::new(false));
  let probe = HealthProbe::new(
    backend.clone(),
    monitor.clone(),
    Duration::from_secs(config.connectivity.probe_interval_secs),
    Duration::from_secs(config.connectivity.probe_timeout_secs),
  );
  let gateway = Arc::new(Gateway::new(
    backend.clone(),
    monitor,
    local,
    Arc::new(SystemClock),
    GatewaySettings::from_config(&config),
  )?);

  match args.command {
    Command::Queue => {
      print_queue(&gateway);
      Ok(())
    }
    Command::Watch => watch(gateway, probe).await,
    command => {
      if !probe.check_once().await {
        eprintln!("{} is unreachable, working offline", backend.base_url());
      }
      run_online(&gateway, command).await
    }
  }
}

/// Commands that talk to the backend, run after one connectivity check.
async fn run_online(gateway: &Gateway, command: Command) -> Result<()> {
  match command {
    Command::Send { text, conversation } => {
      let outcome = gateway.send_message(&text, conversation.as_deref()).await;
      render(&outcome, |reply| println!("{}", reply.response))
    }
    Command::Tools => {
      let outcome = gateway.list_tools().await;
      render(&outcome, |tools| {
        for tool in tools {
          println!(
            "{:<32} {}",
            tool.name,
            tool.description.as_deref().unwrap_or("")
          );
        }
      })
    }
    Command::Conversations => {
      let outcome = gateway.list_conversations().await;
      render(&outcome, |conversations| {
        for c in conversations {
          println!(
            "{:<38} {:<20} {}",
            c.id,
            c.updated_at.as_deref().unwrap_or("-"),
            c.title.as_deref().unwrap_or("(untitled)")
          );
        }
      })
    }
    Command::Conversation { id } => {
      let outcome = gateway.get_conversation(&id).await;
      render(&outcome, |conversation| {
        println!(
          "# {}",
          conversation.title.as_deref().unwrap_or(&conversation.id)
        );
        for message in &conversation.messages {
          println!("\n[{}]\n{}", message.role, message.content);
        }
      })
    }
    Command::Rename { id, title } => {
      let outcome = gateway
        .update_conversation(&id, serde_json::json!({ "title": title }))
        .await;
      render(&outcome, |_| println!("Renamed {}", id))
    }
    Command::ClearMemory { session } => {
      let outcome = gateway.clear_memory(session.as_deref()).await;
      render(&outcome, |_| println!("Session memory cleared"))
    }
    Command::Drain => {
      if !gateway.monitor().is_online() {
        return Err(eyre!(
          "Backend unreachable; {} message(s) still queued",
          gateway.queued_messages().len()
        ));
      }
      let report = gateway.drain_queue().await;
      println!(
        "Sent {} queued message(s), {} remaining",
        report.processed, report.remaining
      );
      match report.stopped_on {
        Some(reason) => Err(eyre!("Drain stopped: {}", reason)),
        None => Ok(()),
      }
    }
    Command::Status => {
      print_status(gateway);
      Ok(())
    }
    Command::Queue => {
      print_queue(gateway);
      Ok(())
    }
    Command::Watch => Err(eyre!("watch runs its own connectivity loop")),
  }
}

/// Print an outcome's data, flagging degraded or queued results.
fn render<T>(outcome: &Outcome<T>, show: impl FnOnce(&T)) -> Result<()> {
  if outcome.is_queued() {
    if let Source::Queued { id } = &outcome.source {
      println!("{} (id {})", outcome.message, id);
    }
    return Ok(());
  }

  if !outcome.success {
    let kind = outcome.failure.map(|k| k.as_str()).unwrap_or("error");
    return Err(eyre!("{} ({})", outcome.message, kind));
  }
  if outcome.is_degraded() {
    let stale = matches!(outcome.source, Source::Fallback { stale: true, .. });
    eprintln!("[{}] {}", if stale { "stale" } else { "saved" }, outcome.message);
  }
  if let Some(data) = &outcome.data {
    show(data);
  }
  Ok(())
}

fn print_queue(gateway: &Gateway) {
  let items = gateway.queued_messages();
  if items.is_empty() {
    println!("Offline queue is empty");
    return;
  }
  for item in items {
    println!(
      "{}  {}  {}",
      item.created_at.format("%Y-%m-%d %H:%M:%S"),
      item.conversation_id.as_deref().unwrap_or("(new)"),
      item.content
    );
  }
}

fn print_status(gateway: &Gateway) {
  let status = gateway.status();
  println!(
    "connectivity: {}",
    if status.online { "online" } else { "offline" }
  );
  println!("queued:       {}", status.queued);
  println!("in flight:    {}", status.in_flight);
  for breaker in status.breakers {
    let state = match breaker.state {
      BreakerState::Closed => "closed",
      BreakerState::Open => "OPEN",
    };
    println!(
      "breaker {:<14} {} ({} failures)",
      breaker.family.as_str(),
      state,
      breaker.failures
    );
  }
}

async fn watch(gateway: Arc<Gateway>, probe: HealthProbe) -> Result<()> {
  let subscription = gateway.on_connectivity_change(|online| {
    println!("{}", if online { "online" } else { "offline" });
  });
  let worker = gateway.spawn_reconnect_worker();
  let prober = probe.spawn();

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;

  prober.abort();
  worker.abort();
  subscription.unsubscribe();
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;
  use gateway::testing::ScriptedBackend;

  fn gateway() -> Gateway {
    Gateway::new(
      Arc::new(ScriptedBackend::new()),
      Arc::new(ConnectivityMonitor::new(true)),
      Arc::new(MemoryStore::new()),
      Arc::new(SystemClock),
      GatewaySettings::default(),
    )
    .unwrap()
  }

  #[test]
  fn test_cli_definition_is_valid() {
    Args::command().debug_assert();
  }

  #[test]
  fn test_parse_send_with_conversation() {
    let args = Args::try_parse_from([
      "socgate",
      "--ephemeral",
      "send",
      "check 10.0.0.5",
      "-C",
      "c1",
    ])
    .unwrap();
    assert!(args.ephemeral);
    assert!(matches!(
      args.command,
      Command::Send { ref conversation, .. } if conversation.as_deref() == Some("c1")
    ));
  }

  #[tokio::test]
  async fn test_local_commands_never_panic_on_the_online_path() {
    let gateway = gateway();
    assert!(run_online(&gateway, Command::Queue).await.is_ok());
    assert!(run_online(&gateway, Command::Watch).await.is_err());
  }
}
