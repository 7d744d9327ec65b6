// Command-line front end: share a link with a peer by swapping signaling codes by hand.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use linkshare::{ConnectionId, ConnectionRegistry, Link, ShareConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

const CODE_POLL: Duration = Duration::from_millis(50);
const CODE_POLL_ATTEMPTS: usize = 600;

#[derive(Parser, Debug)]
#[command(name = "linkshare")]
#[command(about = "Share expiring short links peer-to-peer over WebRTC")]
struct Cli {
  #[arg(long = "stun", value_name = "URL", global = true, help = "STUN server (repeatable, overrides LINKSHARE_STUN_SERVERS)")]
  stun: Vec<String>,
  #[arg(long, value_name = "SECS", global = true, help = "Give up on negotiation after SECS seconds (0 waits forever)")]
  timeout: Option<u64>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create a connection, print the offer code, then share a link once connected
  Offer {
    #[command(flatten)]
    link: LinkArgs,
    #[arg(long, value_name = "CODE", help = "Answer code (read from stdin when omitted)")]
    answer: Option<String>,
  },
  /// Join from an offer code, print the answer code, then print received links
  Answer {
    #[arg(value_name = "OFFER_CODE", help = "Offer code (read from stdin when omitted)")]
    offer: Option<String>,
    #[arg(long, help = "Keep receiving after the first link")]
    stay_open: bool,
  },
  /// Connect two local peers and pass one link between them
  Demo {
    #[command(flatten)]
    link: LinkArgs,
  },
}

#[derive(Args, Debug)]
struct LinkArgs {
  #[arg(long, value_name = "URL", help = "Destination URL")]
  url: String,
  #[arg(long = "code", value_name = "SHORT_CODE", default_value = "shared", help = "Short code")]
  short_code: String,
  #[arg(long, default_value = "", help = "Title (defaults to the short code)")]
  title: String,
  #[arg(long)]
  description: Option<String>,
  #[arg(long, default_value_t = 24, value_name = "HOURS", help = "Hours until the link expires")]
  ttl_hours: i64,
  #[arg(long = "from", value_name = "NAME", help = "Tag the link with who shared it")]
  shared_by: Option<String>,
}

impl LinkArgs {
  fn build(&self) -> Result<Link> {
    let url = Url::parse(&self.url).with_context(|| format!("invalid URL: {}", self.url))?;
    let ttl = chrono::Duration::try_hours(self.ttl_hours)
      .with_context(|| format!("--ttl-hours {} is out of range", self.ttl_hours))?;
    let mut link = Link::new(&url, &self.short_code, &self.title, ttl)?;
    if let Some(description) = &self.description {
      link = link.with_description(description.clone());
    }
    if let Some(origin) = &self.shared_by {
      link = link.with_shared_by(origin.clone());
    }
    Ok(link)
  }
}

/// Registry plus the receiving ends of its two callbacks.
struct Session {
  registry: ConnectionRegistry,
  links: mpsc::UnboundedReceiver<Link>,
  status: mpsc::UnboundedReceiver<(ConnectionId, bool)>,
}

impl Session {
  fn start(config: ShareConfig) -> Self {
    let registry = ConnectionRegistry::with_webrtc(config);
    let (link_tx, links) = mpsc::unbounded_channel();
    registry.on_link_received(move |link| {
      let _ = link_tx.send(link);
    });
    let (status_tx, status) = mpsc::unbounded_channel();
    registry.on_connection_status_change(move |id, connected| {
      let _ = status_tx.send((id.clone(), connected));
    });
    Self { registry, links, status }
  }

  async fn wait_connected(&mut self, id: &ConnectionId) -> Result<()> {
    while let Some((changed, connected)) = self.status.recv().await {
      if &changed != id {
        continue;
      }
      if connected {
        return Ok(());
      }
      bail!("connection {id} closed before it connected");
    }
    Err(anyhow!("registry stopped"))
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = build_config(&cli);

  match cli.command {
    Command::Offer { link, answer } => run_offer(config, link.build()?, answer).await,
    Command::Answer { offer, stay_open } => run_answer(config, offer, stay_open).await,
    Command::Demo { link } => run_demo(config, link.build()?).await,
  }
}

fn build_config(cli: &Cli) -> ShareConfig {
  let mut config = ShareConfig::from_env();
  if !cli.stun.is_empty() {
    config.stun_servers = cli.stun.clone();
  }
  match cli.timeout {
    Some(0) => config.negotiation_timeout = None,
    Some(secs) => config.negotiation_timeout = Some(Duration::from_secs(secs)),
    None => {}
  }
  config
}

async fn run_offer(config: ShareConfig, link: Link, answer: Option<String>) -> Result<()> {
  let mut session = Session::start(config);
  let created = session.registry.create_connection().await?;
  info!(connection = %created.id, "gathering ICE candidates");
  let offer = wait_for_code(|| session.registry.connection_code(&created.id)).await?;
  info!("send this offer code to your peer, then paste their answer code");
  println!("{offer}");

  let answer = match answer {
    Some(code) => code,
    None => read_code_line().await?,
  };
  session
    .registry
    .accept_answer(&created.id, &answer)
    .await
    .context("apply answer code")?;

  session.wait_connected(&created.id).await?;
  if !session.registry.share_link(&created.id, &link).await {
    bail!("connection {} dropped before the link was sent", created.id);
  }
  session.registry.drain(&created.id).await;
  info!(link = %link.short_url, "link shared");
  session.registry.destroy().await;
  Ok(())
}

async fn run_answer(config: ShareConfig, offer: Option<String>, stay_open: bool) -> Result<()> {
  let offer = match offer {
    Some(code) => code,
    None => {
      info!("paste the offer code");
      read_code_line().await?
    }
  };
  let mut session = Session::start(config);
  let joined = session.registry.join_connection(&offer).await.context("join from offer code")?;
  info!(connection = %joined.id, "gathering ICE candidates");
  let answer = wait_for_code(|| session.registry.answer_code(&joined.id)).await?;
  info!("send this answer code back to your peer");
  println!("{answer}");

  loop {
    tokio::select! {
      link = session.links.recv() => {
        let Some(link) = link else { break };
        print_link(&link)?;
        if !stay_open {
          break;
        }
      }
      status = session.status.recv() => {
        match status {
          Some((id, true)) => info!(connection = %id, "connected, waiting for links"),
          Some((id, false)) => {
            info!(connection = %id, "peer closed the connection");
            break;
          }
          None => break,
        }
      }
    }
  }
  session.registry.destroy().await;
  Ok(())
}

async fn run_demo(config: ShareConfig, link: Link) -> Result<()> {
  let mut sender = Session::start(config.clone());
  let mut receiver = Session::start(config);

  let created = sender.registry.create_connection().await?;
  let offer = wait_for_code(|| sender.registry.connection_code(&created.id)).await?;
  let joined = receiver.registry.join_connection(&offer).await?;
  let answer = wait_for_code(|| receiver.registry.answer_code(&joined.id)).await?;
  sender.registry.accept_answer(&created.id, &answer).await?;

  sender.wait_connected(&created.id).await?;
  receiver.wait_connected(&joined.id).await?;
  if !sender.registry.share_link(&created.id, &link).await {
    bail!("demo connection dropped before the link was sent");
  }
  let received = tokio::time::timeout(Duration::from_secs(10), receiver.links.recv())
    .await
    .context("waiting for the shared link")?
    .ok_or_else(|| anyhow!("receiver stopped"))?;
  print_link(&received)?;

  sender.registry.destroy().await;
  receiver.registry.destroy().await;
  Ok(())
}

async fn wait_for_code(lookup: impl Fn() -> Option<String>) -> Result<String> {
  for _ in 0..CODE_POLL_ATTEMPTS {
    if let Some(code) = lookup() {
      return Ok(code);
    }
    sleep(CODE_POLL).await;
  }
  Err(anyhow!("timed out waiting for ICE gathering"))
}

async fn read_code_line() -> Result<String> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  while let Some(line) = lines.next_line().await.context("read stdin")? {
    let line = line.trim();
    if !line.is_empty() {
      return Ok(line.to_string());
    }
  }
  Err(anyhow!("stdin closed before a code was entered"))
}

fn print_link(link: &Link) -> Result<()> {
  let expired = if link.is_expired(chrono::Utc::now()) { " (expired)" } else { "" };
  info!(from = link.shared_by.as_deref().unwrap_or("peer"), "received {}{expired}", link.short_url);
  println!("{}", serde_json::to_string_pretty(link)?);
  Ok(())
}
