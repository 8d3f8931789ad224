use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use shared::{
    domain::{Author, Collection, ItemId, SortKey, UserId},
    protocol::Direction,
};
use sync_core::{
    config::{load_settings, load_settings_from},
    CreateTarget, DeleteTarget, DraftBuffer, FetchOutcome, ListHandle, ListOwner, Notice,
    StaticIdentity, SyncClient,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Settings file; defaults to `sync.toml` in the working directory when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long, default_value_t = 1)]
    user_id: i64,
    #[arg(long, default_value = "feedctl")]
    user_name: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Posts {
        #[arg(long)]
        sort: Option<SortKey>,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    Comments {
        post_id: i64,
        #[arg(long)]
        sort: Option<SortKey>,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    Replies {
        comment_id: i64,
        #[arg(long)]
        sort: Option<SortKey>,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    Comment {
        post_id: i64,
        body: String,
    },
    Reply {
        post_id: i64,
        comment_id: i64,
        body: String,
    },
    Like {
        post_id: i64,
        comment_id: i64,
        #[arg(long)]
        dislike: bool,
    },
    Delete {
        post_id: i64,
        comment_id: i64,
    },
    SendCode {
        phone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings()?,
    };
    if let Some(url) = cli.api_base_url {
        settings.api_base_url = url;
    }
    let identity = Arc::new(StaticIdentity(Some(Author {
        user_id: UserId(cli.user_id),
        name: cli.user_name,
        avatar_url: None,
    })));
    let (client, notifier) =
        SyncClient::over_http(settings, identity).context("failed to build sync client")?;
    let printer = tokio::spawn(print_notices(BroadcastStream::new(notifier.subscribe())));
    drop(notifier);

    let result = run(&client, cli.command).await;

    drop(client);
    if tokio::time::timeout(Duration::from_secs(1), printer)
        .await
        .is_err()
    {
        warn!("feedctl: notice printer did not finish");
    }
    result
}

async fn run(client: &SyncClient, command: Command) -> Result<()> {
    match command {
        Command::Posts { sort, pages } => {
            browse(client, &ListOwner::root(Collection::Posts), sort, pages).await?;
        }
        Command::Comments {
            post_id,
            sort,
            pages,
        } => {
            browse(client, &comments_of(post_id), sort, pages).await?;
        }
        Command::Replies {
            comment_id,
            sort,
            pages,
        } => {
            let owner = ListOwner::under(Collection::Replies, comment_id);
            browse(client, &owner, sort, pages).await?;
        }
        Command::Comment { post_id, body } => {
            let owner = comments_of(post_id);
            browse(client, &owner, None, 1).await?;
            publish(client, &owner, CreateTarget::comment_on(post_id), body).await?;
        }
        Command::Reply {
            post_id,
            comment_id,
            body,
        } => {
            let owner = ListOwner::under(Collection::Replies, comment_id);
            browse(client, &owner, None, 1).await?;
            publish(
                client,
                &owner,
                CreateTarget::reply_to(post_id, comment_id),
                body,
            )
            .await?;
        }
        Command::Like {
            post_id,
            comment_id,
            dislike,
        } => {
            let owner = comments_of(post_id);
            browse(client, &owner, None, 1).await?;
            let id = ItemId::Server(comment_id);
            if dislike {
                client.toggle_dislike(&id)?;
            } else {
                client.toggle_like(&id)?;
            }
            // Let the debounce window close so the call goes out.
            tokio::time::sleep(client.settings().toggle_debounce() + Duration::from_millis(500))
                .await;
            print_list(&client.list(&owner));
        }
        Command::Delete {
            post_id,
            comment_id,
        } => {
            let owner = comments_of(post_id);
            browse(client, &owner, None, 1).await?;
            client
                .delete(DeleteTarget::comment(post_id, comment_id))?
                .await?;
            print_list(&client.list(&owner));
        }
        Command::SendCode { phone } => {
            client.send_login_code(&phone).await?;
            println!("login code sent to {phone}");
        }
    }
    Ok(())
}

fn comments_of(post_id: i64) -> ListOwner {
    ListOwner::under(Collection::Comments, post_id)
}

async fn browse(
    client: &SyncClient,
    owner: &ListOwner,
    sort: Option<SortKey>,
    pages: usize,
) -> Result<()> {
    if let Some(sort) = sort {
        let (_, load) = client.change_sort_key(owner, sort)?;
        if let Some(load) = load {
            load.await?;
        }
    }
    for _ in 0..pages {
        match client.fetch_page(owner, Direction::Down).await? {
            Some(FetchOutcome::Loaded { .. }) | Some(FetchOutcome::Cached) => {}
            Some(_) | None => break,
        }
    }
    print_list(&client.list(owner));
    Ok(())
}

async fn publish(
    client: &SyncClient,
    owner: &ListOwner,
    target: CreateTarget,
    body: String,
) -> Result<()> {
    let draft = DraftBuffer::new(body);
    client.create(&draft, target)?.await?;
    if !draft.text().is_empty() {
        bail!("server rejected the submission; draft kept: {}", draft.text());
    }
    print_list(&client.list(owner));
    Ok(())
}

fn print_list(list: &ListHandle) {
    println!("{}", list.key());
    for item in list.items() {
        let author = item
            .author
            .as_ref()
            .map_or("?", |author| author.name.as_str());
        println!(
            "  {:>12}  +{} -{} {}{}  {}: {}",
            item.id.to_string(),
            item.counters.likes_count,
            item.counters.dislikes_count,
            if item.user_liked { "L" } else { "" },
            if item.user_disliked { "D" } else { "" },
            author,
            item.body
        );
    }
}

async fn print_notices(mut notices: BroadcastStream<Notice>) {
    while let Some(notice) = notices.next().await {
        match notice {
            Ok(notice) => println!("[{:?}] {}", notice.kind, notice.message),
            Err(err) => warn!("feedctl: notices lagged: {err}"),
        }
    }
}
