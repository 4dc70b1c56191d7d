use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use volwatch::config::Config;
use volwatch::pipewire;

#[derive(Parser, Debug)]
#[command(name = "volwatch")]
#[command(about = "Watch the system output volume through PipeWire", long_about = None)]
struct Cli {
    #[arg(short, long)]
    verbose: bool,
    #[arg(long, env = "VOLWATCH_CONFIG")]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current volume and exit
    Get,
    /// Print every volume change until interrupted
    Watch(WatchOpts),
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(clap::Args, Debug)]
struct WatchOpts {
    /// Emit the current volume before waiting for changes
    #[arg(long)]
    fetch_initial: bool,
    /// Exit after the first delivered volume
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let path = std::path::PathBuf::from(shellexpand::tilde(path).into_owned());
            Config::load_from_path(path).context("Failed to load config")?
        }
        None => Config::load().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config: {}", e);
            Config::default()
        }),
    };

    match cli.command {
        Commands::Get => run_get(&config)?,
        Commands::Watch(opts) => run_watch(&config, opts).await?,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "volwatch", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn run_get(config: &Config) -> Result<()> {
    let listener = pipewire::listener(&config.pipewire);
    let volume = listener.current_volume().context("Failed to read volume")?;
    println!("{}", volume);
    Ok(())
}

async fn run_watch(config: &Config, opts: WatchOpts) -> Result<()> {
    let mut options = config.listener.listen_options();
    options.fetch_initial_volume |= opts.fetch_initial;

    let mut listener = pipewire::listener(&config.pipewire);
    let mut stream = listener.subscribe(options).context("Failed to subscribe")?;

    tracing::info!("Watching {} for volume changes", config.pipewire.sink);

    loop {
        tokio::select! {
            received = stream.recv() => match received {
                Some(Ok(volume)) => {
                    println!("{} {}", jiff::Timestamp::now(), volume);
                    if opts.once {
                        break;
                    }
                }
                Some(Err(e)) => {
                    listener.cancel();
                    return Err(e).context("Volume stream failed");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    listener.cancel();
    Ok(())
}
