use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use baerumkart_core::{build_store, load_config, ChatService};
use baerumkart_knowledge::{subscribe, KnowledgeStore};
use baerumkart_schema::KnowledgeEntity;
use baerumkart_server::state::AppState;

#[derive(Parser)]
#[command(name = "baerumkart", version, about = "BærumKart outdoor assistant")]
struct Cli {
    #[arg(
        long,
        default_value = "config",
        help = "Config directory (contains main.yaml and rules.yaml)"
    )]
    config_root: PathBuf,

    #[arg(long, default_value = "logs", help = "Directory for daily log files")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Serve {
        #[arg(long, help = "Override server.port from main.yaml")]
        port: Option<u16>,
    },
    #[command(about = "Local REPL against the configured assistant")]
    Chat {
        #[arg(long, help = "Session id (random when omitted)")]
        session: Option<String>,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(about = "List spots from the configured knowledge store")]
    Spots {
        #[arg(long, help = "Keep running and print the list whenever it changes")]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&cli.log_dir, "baerumkart.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&cli.config_root)?;
            println!(
                "Config valid. provider={:?}, model={}, knowledge={:?}, {} intent rules.",
                config.main.provider.provider_type,
                config.main.generation.model,
                config.main.knowledge.kind,
                config.vocabulary.intent_rules.len()
            );
        }
        Commands::Serve { port } => {
            run_server(&cli.config_root, port).await?;
        }
        Commands::Chat { session } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_repl(&cli.config_root, &session).await?;
        }
        Commands::Spots { watch } => {
            run_spots(&cli.config_root, watch).await?;
        }
    }

    Ok(())
}

async fn run_server(root: &Path, port: Option<u16>) -> Result<()> {
    let config = load_config(root)?;
    let chat = ChatService::from_config(&config)?;

    let sessions = chat.sessions().clone();
    let prune_every = Duration::from_secs(config.main.sessions.prune_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;
            let pruned = sessions.prune_expired().await;
            if pruned > 0 {
                tracing::info!("pruned {} expired sessions", pruned);
            }
        }
    });

    let addr = format!(
        "{}:{}",
        config.main.server.host,
        port.unwrap_or(config.main.server.port)
    );
    let state = AppState::new(chat);

    tokio::select! {
        result = baerumkart_server::serve(state, &addr) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down..."),
    }
    Ok(())
}

async fn run_repl(root: &Path, session_id: &str) -> Result<()> {
    let config = load_config(root)?;
    let chat = ChatService::from_config(&config)?;

    println!("BærumKart REPL (session {session_id}). Type 'quit' to exit, 'reset' to start over.");
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }
        if input == "reset" {
            chat.reset(session_id).await;
            println!("(samtalen er nullstilt)");
            continue;
        }

        let mut reply = {
            let chat = chat.clone();
            let session_id = session_id.to_string();
            let text = input.to_string();
            tokio::spawn(async move { chat.submit_message(&session_id, &text).await })
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let reply = loop {
            tokio::select! {
                result = &mut reply => break result?,
                _ = ticker.tick() => {
                    let seconds = chat.pending_delay_seconds(session_id).await;
                    if seconds > 0 {
                        eprintln!("(venter {seconds}s ...)");
                    }
                }
            }
        };
        println!("{reply}");
    }

    Ok(())
}

async fn run_spots(root: &Path, watch: bool) -> Result<()> {
    let config = load_config(root)?;
    let store = build_store(&config.main.knowledge)?;

    if !watch {
        print_spots(&store.list_entities().await?);
        return Ok(());
    }

    let interval = Duration::from_secs(config.main.knowledge.watch_interval_secs.max(1));
    let mut subscription = subscribe(store, interval);
    loop {
        tokio::select! {
            next = subscription.next() => match next {
                Some(spots) => print_spots(&spots),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                subscription.cancel();
                break;
            }
        }
    }
    Ok(())
}

fn print_spots(spots: &[KnowledgeEntity]) {
    println!("{:<28} {:<16} {:<10} {:<20}", "NAME", "CATEGORY", "DIFFICULTY", "LOCATION");
    for spot in spots {
        println!(
            "{:<28} {:<16} {:<10} {:<20}",
            spot.name, spot.category, spot.difficulty, spot.location
        );
    }
    println!("{} spots.", spots.len());
}
