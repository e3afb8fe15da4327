mod cache;
mod clients;
mod config;
mod db;
mod drainer;
mod event;
mod http;
mod interceptor;
mod lifecycle;
mod push;
mod queue;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::db::Database;
use crate::event::{EventOutcome, WorkerEvent};
use crate::http::{Destination, Fetcher, HttpFetcher, Method, Request, Response};
use crate::push::{LogNotifier, Notification};
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "qbc-worker")]
#[command(about = "Offline request queue and cache proxy for QuestByCycle")]
#[command(version = cache::BUILD_VERSION)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/qbc-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the install manifest for this version
  Install,
  /// Delete caches left by older versions
  Activate,
  /// Post a JSON message to the worker, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Send a request through the worker
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Header as "Name: value"; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    body: Option<String>,
    /// Treat as a top-level page load
    #[arg(long)]
    navigate: bool,
    /// style, script, image, font or document (default: from the file extension)
    #[arg(long)]
    destination: Option<String>,
  },
  /// Fire a background sync; without a tag, every pending registration
  Sync { tag: Option<String> },
  /// Fire a periodic sync tag
  PeriodicSync { tag: String },
  /// Deliver a push payload
  Push { payload: String },
  /// Click a notification, optionally carrying a target URL
  Click {
    #[arg(long)]
    url: Option<String>,
  },
  /// List queued requests
  Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config)?;

  let db = Arc::new(Database::open(&config.database_path()?)?);
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.request_timeout())?);
  let worker = Worker::new(&config, db, Arc::clone(&fetcher), Arc::new(LogNotifier))?;

  run(args.command, &config, &worker, fetcher.as_ref()).await
}

/// Log to stderr, or to `log_file` when configured.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qbc_worker=info"));

  match &config.log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

async fn run(command: Command, config: &Config, worker: &Worker, fetcher: &dyn Fetcher) -> Result<()> {
  match command {
    Command::Install => {
      if let EventOutcome::Installed { cached } = worker.dispatch(WorkerEvent::Install).await? {
        println!("installed {} ({} assets cached)", worker.cache_name(), cached);
      }
    }
    Command::Activate => {
      let mut page = worker.clients().connect()?;
      if let EventOutcome::Activated { evicted } = worker.dispatch(WorkerEvent::Activate).await? {
        println!("activated {} (stale caches removed: {})", worker.cache_name(), evicted);
      }
      while let Ok(message) = page.try_recv() {
        println!("{}", serde_json::to_string(&message)?);
      }
    }
    Command::Message { json } => {
      worker.dispatch(WorkerEvent::Message(json)).await?;
      println!("lifecycle: {:?}", worker.lifecycle());
    }
    Command::Fetch {
      url,
      method,
      headers,
      body,
      navigate,
      destination,
    } => {
      let request = build_request(config, &url, &method, &headers, body, navigate, destination)?;
      match worker.dispatch(WorkerEvent::Fetch(request.clone())).await? {
        EventOutcome::Fetched(Some(response)) => print_response(&response),
        _ => {
          // Not intercepted: the request goes out as if no worker were installed
          println!("(not intercepted)");
          print_response(&fetcher.fetch(&request).await?);
        }
      }
    }
    Command::Sync { tag } => {
      let outcomes = match tag {
        Some(tag) => vec![(tag.clone(), worker.dispatch(WorkerEvent::Sync(tag)).await?)],
        None => worker.sync_pending().await?,
      };
      if outcomes.is_empty() {
        println!("no pending sync registrations");
      }
      for (tag, outcome) in outcomes {
        print_sync_outcome(&tag, &outcome);
      }
    }
    Command::PeriodicSync { tag } => {
      let outcome = worker.dispatch(WorkerEvent::PeriodicSync(tag.clone())).await?;
      print_sync_outcome(&tag, &outcome);
    }
    Command::Push { payload } => {
      if let EventOutcome::Shown(n) = worker.dispatch(WorkerEvent::Push(payload.into_bytes())).await? {
        println!("{}", serde_json::to_string_pretty(&n)?);
      }
    }
    Command::Click { url } => {
      let notification = Notification {
        title: config.notifications.default_title.clone(),
        body: String::new(),
        icon: None,
        data: match url {
          Some(url) => serde_json::json!({ "url": url }),
          None => serde_json::Value::Null,
        },
      };
      if let EventOutcome::Opened(urls) = worker
        .dispatch(WorkerEvent::NotificationClick(notification))
        .await?
      {
        for url in urls {
          println!("opened {}", url);
        }
      }
    }
    Command::Queue => {
      let queued = worker.queue().len()?;
      let entries = worker.queue().entries()?;
      if queued == 0 {
        println!("queue is empty");
      }
      for (key, entry) in &entries {
        println!("{:>6}  {:<6} {}", key, entry.method.as_str(), entry.url);
      }
      if entries.len() < queued {
        println!("{} unreadable entries", queued - entries.len());
      }

      let pending = worker.sync_manager().pending()?;
      if !pending.is_empty() {
        println!("pending sync: {}", pending.join(", "));
      }
    }
  }

  Ok(())
}

fn build_request(
  config: &Config,
  url: &str,
  method: &str,
  headers: &[String],
  body: Option<String>,
  navigate: bool,
  destination: Option<String>,
) -> Result<Request> {
  let url = config.resolve(url)?;
  let destination = match destination {
    Some(d) => d.parse()?,
    None => Destination::from_path(url.path()),
  };

  let mut request = Request::new(method.parse::<Method>()?, url).with_destination(destination);
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Header must look like 'Name: value', got '{}'", header))?;
    request = request.with_header(name.trim(), value.trim());
  }
  if let Some(body) = body {
    request = request.with_body(body);
  }
  if navigate {
    request = request.navigation();
  }

  Ok(request)
}

fn print_response(response: &Response) {
  println!("{}", response.status);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.text());
}

fn print_sync_outcome(tag: &str, outcome: &EventOutcome) {
  match outcome {
    EventOutcome::Drained(report) => println!(
      "{}: replayed {}, still queued {}",
      tag, report.replayed, report.failed
    ),
    EventOutcome::Ignored => println!("{}: unknown tag, ignored", tag),
    _ => println!("{}: done", tag),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cli_parses_fetch_flags() {
    let args = Args::try_parse_from([
      "qbc-worker",
      "fetch",
      "/quests/1/submit",
      "-X",
      "POST",
      "-H",
      "Content-Type: application/json",
      "--body",
      "{}",
    ])
    .unwrap();

    let Command::Fetch {
      url,
      method,
      headers,
      body,
      navigate,
      destination,
    } = args.command
    else {
      panic!("expected fetch");
    };

    let request = build_request(
      &Config::default(),
      &url,
      &method,
      &headers,
      body,
      navigate,
      destination,
    )
    .unwrap();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.url.as_str(), "http://localhost:5000/quests/1/submit");
    assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
    assert_eq!(request.body, "{}");
    assert!(!request.navigate);
  }

  #[test]
  fn destination_defaults_from_extension() {
    let request = build_request(
      &Config::default(),
      "/static/dist/style.css",
      "GET",
      &[],
      None,
      false,
      None,
    )
    .unwrap();
    assert_eq!(request.destination, Destination::Style);
  }

  #[test]
  fn malformed_header_is_rejected() {
    let err = build_request(
      &Config::default(),
      "/",
      "GET",
      &["nocolon".to_string()],
      None,
      false,
      None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Name: value"));
  }
}
