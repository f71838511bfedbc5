use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use webpush_dispatch::adapters::JsonFileSubscriptionStore;
use webpush_dispatch::config::{self, AppConfig};
use webpush_dispatch::ports::SubscriptionStore;
use webpush_dispatch::push::{self, keys};
use webpush_dispatch::types::push::Urgency;
use webpush_dispatch::{Notification, NotificationAction};

pub(crate) async fn run() -> u8 {
    let cli = Cli::parse();
    match &cli.command {
        Command::Init(args) => run_init(args),
        Command::PublicKey => match resolve_config(&cli) {
            Ok(config) => run_public_key(&config),
            Err(err) => {
                eprintln!("error: {err}");
                2
            }
        },
        Command::Send(args) => match resolve_config(&cli) {
            Ok(config) => run_send(config, args).await,
            Err(err) => {
                eprintln!("error: {err}");
                2
            }
        },
    }
}

#[derive(Parser, Debug)]
#[command(name = "webpush", version, about = "Send Web Push notifications")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// TOML config file; flags and environment variables override it.
    #[arg(long, global = true, env = "WEBPUSH_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, global = true, env = "WEBPUSH_VAPID_PRIVATE_KEY")]
    vapid_private_key: Option<String>,
    #[arg(long, global = true, env = "WEBPUSH_VAPID_PUBLIC_KEY")]
    vapid_public_key: Option<String>,
    #[arg(long, global = true, env = "WEBPUSH_VAPID_PRIVATE_KEY_PATH")]
    vapid_private_key_path: Option<PathBuf>,
    #[arg(long, global = true, env = "WEBPUSH_VAPID_PUBLIC_KEY_PATH")]
    vapid_public_key_path: Option<PathBuf>,
    #[arg(long, global = true, env = "WEBPUSH_VAPID_SUBJECT")]
    vapid_subject: Option<String>,
    /// JSON file holding the subscriptions.
    #[arg(long, global = true, env = "WEBPUSH_STORE")]
    store: Option<PathBuf>,
    #[arg(long, global = true, env = "WEBPUSH_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh VAPID key pair.
    Init(InitArgs),
    /// Print the public key matching the configured private key.
    PublicKey,
    /// Send one notification to stored subscriptions.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    #[arg(long)]
    subject: Option<String>,
}

#[derive(Args, Debug, Default)]
struct SendArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    /// Stored as `data.url` for the service worker's click handler.
    #[arg(long)]
    url: Option<String>,
    /// `action=Title` pairs.
    #[arg(long = "action")]
    actions: Vec<String>,
    /// Only deliver to this endpoint.
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    ttl: Option<u32>,
    #[arg(long)]
    urgency: Option<Urgency>,
    #[arg(long)]
    topic: Option<String>,
    /// Delete subscriptions the push service reports as gone.
    #[arg(long)]
    prune: bool,
}

fn run_init(args: &InitArgs) -> u8 {
    let credentials = push::generate_vapid_credentials();
    let (subject, show_subject_note) = match &args.subject {
        Some(subject) => (subject.clone(), false),
        None => ("mailto:you@example.com".to_string(), true),
    };

    println!("VAPID credentials generated.");
    println!();
    println!("WEBPUSH_VAPID_PRIVATE_KEY=\"{}\"", credentials.private_key);
    println!("WEBPUSH_VAPID_PUBLIC_KEY=\"{}\"", credentials.public_key);
    println!("WEBPUSH_VAPID_SUBJECT=\"{subject}\"");
    if show_subject_note {
        println!();
        println!("Note: replace WEBPUSH_VAPID_SUBJECT with a contact URI you control.");
    }
    println!();
    println!("[vapid]");
    println!("subject = \"{subject}\"");
    println!("private_key = \"{}\"", credentials.private_key);
    println!("public_key = \"{}\"", credentials.public_key);
    0
}

fn run_public_key(config: &AppConfig) -> u8 {
    let Some(private_key) = config.vapid_private_key.as_deref() else {
        eprintln!("error: no VAPID private key configured");
        return 2;
    };
    match keys::parse_private_key(private_key) {
        Ok(key) => {
            println!("{}", key.public_key().to_base64url());
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

async fn run_send(config: AppConfig, args: &SendArgs) -> u8 {
    if let Err(err) = config.require_vapid() {
        eprintln!("error: {err}");
        return 2;
    }
    let dispatcher = match push::build_dispatcher(&config) {
        Ok(Some(dispatcher)) => dispatcher,
        Ok(None) => {
            eprintln!("error: VAPID keys are not configured");
            return 2;
        }
        Err(err) => {
            eprintln!("error: {err}");
            return 2;
        }
    };
    let Some(store_path) = config.store_path.as_ref() else {
        eprintln!("error: --store is required to send");
        return 2;
    };
    let store = match JsonFileSubscriptionStore::open(store_path) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    let payload = match build_notification(args).and_then(|n| n.to_json_bytes()) {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("error: {err}");
            return 2;
        }
    };

    let mut subscriptions = match store.list() {
        Ok(subscriptions) => subscriptions,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    if let Some(endpoint) = &args.endpoint {
        subscriptions.retain(|subscription| &subscription.endpoint == endpoint);
    }
    if subscriptions.is_empty() {
        log::warn!("no matching push subscriptions in {}", store.path().display());
        return 0;
    }
    log::info!(
        "sending {} notifications as {} to subscriptions from {}",
        subscriptions.len(),
        dispatcher.public_key(),
        store.path().display()
    );

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted; abandoning pending deliveries");
                token.cancel();
            }
        });
    }

    let results = dispatcher
        .send_batch_with_cancel(&subscriptions, &payload, &token)
        .await;
    let mut failed = 0;
    for result in &results {
        match result.error_message() {
            None => println!("ok      {}", result.endpoint),
            Some(message) => {
                failed += 1;
                let label = if result.subscription_expired {
                    "expired"
                } else if result.should_retry {
                    "retry"
                } else {
                    "failed"
                };
                println!("{label:<7} {} ({message})", result.endpoint);
            }
        }
    }
    log::info!(
        "delivered {} of {} notifications",
        results.len() - failed,
        results.len()
    );

    if args.prune {
        push::prune_expired(&store, &results);
    }
    if failed == 0 { 0 } else { 1 }
}

fn build_notification(args: &SendArgs) -> Result<Notification, webpush_dispatch::PushError> {
    let mut notification = Notification::new(args.title.clone());
    if let Some(body) = &args.body {
        notification.set_body(body.clone());
    }
    if let Some(icon) = &args.icon {
        notification.set_icon(icon.clone());
    }
    if let Some(tag) = &args.tag {
        notification.set_tag(tag.clone());
    }
    if let Some(url) = &args.url {
        notification.set_data(&serde_json::json!({ "url": url }))?;
    }
    for raw in &args.actions {
        let (action, title) = raw.split_once('=').ok_or_else(|| {
            webpush_dispatch::PushError::InvalidArgument(format!(
                "invalid action '{raw}'; expected <action>=<title>"
            ))
        })?;
        notification.add_action(NotificationAction::new(title, action));
    }
    Ok(notification)
}

fn resolve_config(cli: &Cli) -> Result<AppConfig, String> {
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(path).map_err(|err| err.to_string())?,
        None => AppConfig::default(),
    };

    if cli.vapid_private_key.is_some() || cli.vapid_private_key_path.is_some() {
        config.vapid_private_key = config::resolve_key(
            "private key",
            cli.vapid_private_key.clone(),
            cli.vapid_private_key_path.clone(),
        )
        .map_err(|err| err.to_string())?;
    }
    if cli.vapid_public_key.is_some() || cli.vapid_public_key_path.is_some() {
        config.vapid_public_key = config::resolve_key(
            "public key",
            cli.vapid_public_key.clone(),
            cli.vapid_public_key_path.clone(),
        )
        .map_err(|err| err.to_string())?;
    }
    if let Some(subject) = cli.vapid_subject.as_deref() {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err("VAPID subject cannot be empty".to_string());
        }
        config.vapid_subject = Some(subject.to_string());
    }
    if let Some(store) = &cli.store {
        config.store_path = Some(store.clone());
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.timeout_secs = timeout_secs;
    }
    if let Command::Send(args) = &cli.command {
        if let Some(ttl) = args.ttl {
            config.ttl = ttl;
        }
        if args.urgency.is_some() {
            config.urgency = args.urgency;
        }
        if args.topic.is_some() {
            config.topic = args.topic.clone();
        }
    }

    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}
