use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{BookmarkClient, ClientEvent, ClientView};
use platform::{
    config::load_settings, AuthProvider, BookmarkRepository, ChangeFeed, RestPlatform,
    WsChangeFeed,
};
use shared::domain::BookmarkId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured platform base URL.
    #[arg(long)]
    platform_url: Option<String>,
    /// Starts the session from an existing access token.
    #[arg(long)]
    access_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.platform_url {
        settings.platform_url = url;
    }
    if let Some(token) = args.access_token {
        settings.access_token = Some(token);
    }

    let platform = Arc::new(
        RestPlatform::new(
            settings.platform_url.clone(),
            settings.anon_key.clone(),
            settings.oauth_provider.clone(),
        )
        .with_access_token(settings.access_token.clone()),
    );
    let changes = Arc::new(WsChangeFeed::new(
        settings.platform_url.clone(),
        settings.anon_key.clone(),
    ));

    let client = BookmarkClient::new_with_dependencies(
        platform.clone() as Arc<dyn AuthProvider>,
        platform.clone() as Arc<dyn BookmarkRepository>,
        changes as Arc<dyn ChangeFeed>,
    );
    client.init().await?;

    // Server-driven refreshes land between prompts; announce them.
    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::BookmarksRefreshed) => println!("(bookmarks refreshed)"),
                Ok(ClientEvent::IdentityChanged(Some(identity))) => {
                    println!("(signed in as {})", identity.user_id)
                }
                Ok(ClientEvent::IdentityChanged(None)) => println!("(signed out)"),
                Ok(ClientEvent::OperationFailed(message)) => println!("(error: {message})"),
                Ok(ClientEvent::Error(message)) => println!("({message})"),
                Err(err) => {
                    warn!("event stream lost: {err}");
                    break;
                }
            }
        }
    });

    render(&client.view().await);
    println!("commands: list | add <title> <url> | edit <id> <title> <url> | rm <id> | login | token <access_token> | logout | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => break,
            ["list"] => render(&client.view().await),
            ["add", title, url] => {
                client.set_draft(title, url).await;
                client.add_bookmark().await?;
                render(&client.view().await);
            }
            ["edit", id, title, url] => {
                let view = client.view().await;
                let target = view
                    .bookmarks
                    .iter()
                    .find(|b| b.id == BookmarkId::from(*id));
                match target {
                    Some(bookmark) => {
                        client.start_edit(bookmark).await;
                        client.set_edit_fields(title, url).await;
                        client.update_bookmark(&BookmarkId::from(*id)).await?;
                        render(&client.view().await);
                    }
                    None => println!("no bookmark with id {id}"),
                }
            }
            ["rm", id] => {
                client.delete_bookmark(&BookmarkId::from(*id)).await?;
                render(&client.view().await);
            }
            ["login"] => {
                let url = client.sign_in().await?;
                println!("open this URL, complete the OAuth flow, then run: token <access_token>");
                println!("{url}");
            }
            ["token", access_token] => match platform.complete_sign_in(*access_token).await {
                Ok(identity) => println!("welcome, {}", identity.user_id),
                Err(err) => println!("sign-in failed: {err}"),
            },
            ["logout"] => {
                if let Err(err) = client.sign_out().await {
                    println!("sign-out failed: {err}");
                }
            }
            _ => println!("unrecognized command: {line}"),
        }
    }

    client.dispose().await;
    Ok(())
}

fn render(view: &ClientView) {
    if view.resolving_identity {
        println!("Loading...");
        return;
    }
    let Some(identity) = &view.identity else {
        println!("Not signed in. Run `login` to start the OAuth flow.");
        return;
    };

    println!(
        "{} ({} bookmarks)",
        identity.email.as_deref().unwrap_or(identity.user_id.as_str()),
        view.bookmarks.len()
    );
    for bookmark in &view.bookmarks {
        println!("  [{}] {} - {}", bookmark.id, bookmark.title, bookmark.url);
    }
    if let Some(status) = &view.status {
        println!("  {status}");
    }
    if let Some(error) = &view.op_error {
        println!("  error: {error}");
    }
}
