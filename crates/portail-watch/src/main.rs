use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use portail_notify::api::unread_for;
use portail_notify::{ClientConfig, HttpNotificationApi, NotificationFeed, NotificationHub, Session};
use portail_types::{Notification, NotificationId};

/// Tail the HR portal notifications for the configured session
#[derive(Parser, Debug)]
#[command(name = "portail-watch")]
#[command(version)]
struct Args {
    /// Load and print the list, then exit without listening for pushes
    #[arg(long)]
    once: bool,

    /// Mark every notification as read after loading
    #[arg(long)]
    mark_all_read: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portail_watch=info,portail_notify=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env().context("invalid PORTAIL_* configuration")?;
    info!(
        "Watching notifications for {} at {} ({:?})",
        config.session.role, config.api_url, config.session.topic_scope
    );

    let api = Arc::new(HttpNotificationApi::from_config(&config)?);
    match unread_for(&*api, &config.session).await {
        Ok(count) => debug!("Backend reports {} unread", count),
        Err(e) => debug!("Unread count unavailable: {}", e),
    }

    let hub = NotificationHub::new(config.channel_config());
    let feed = if args.once {
        NotificationFeed::detached(config.session.clone(), api, config.read_retry)
    } else {
        NotificationFeed::open(config.session.clone(), api, &hub, config.read_retry)?
    };

    feed.load().await.context("loading notifications")?;
    print_list(&feed.display(), feed.unread(), feed.session());

    if args.mark_all_read {
        let updated = feed.mark_all_as_read().await?;
        println!("Marked {} notifications as read", updated);
    }

    if args.once {
        return Ok(());
    }

    let mut changes = feed.watch_changes();
    let _ = changes.borrow_and_update();
    let mut seen: HashSet<NotificationId> = feed.display().into_iter().map(|n| n.id).collect();
    let mut last_unread = feed.unread();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("Feed closed");
                    break;
                }
                let _ = changes.borrow_and_update();
                for n in feed.display() {
                    if seen.insert(n.id.clone()) {
                        println!("[new] {}", line(&n, feed.session()));
                    }
                }
                let unread = feed.unread();
                if unread != last_unread {
                    println!("{} unread", unread);
                    last_unread = unread;
                }
            }
        }
    }

    info!("Shutting down");
    feed.close().await;
    hub.shutdown();
    Ok(())
}

fn line(n: &Notification, session: &Session) -> String {
    format!(
        "{} {} {}{}",
        n.timestamp.format("%Y-%m-%d %H:%M"),
        n.id,
        n.message,
        if n.is_read(&session.reader()) { "" } else { " *" }
    )
}

fn print_list(list: &[Notification], unread: usize, session: &Session) {
    for n in list {
        println!("{}", line(n, session));
    }
    println!("{} notifications, {} unread", list.len(), unread);
}
