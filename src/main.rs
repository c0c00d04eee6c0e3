use clap::{Parser, Subcommand};
use dashboard::{DashboardConfig, DEFAULT_ROWS};
use engage_service::{EngageService, Reaction, ReactionEngine, ReactionMode, ReplyTemplates};
use iced::{Application, Command, Element, Settings, Subscription};
use lead_store::CsvLeadLog;
use mintwatch_core::{
    AppConfig, BotSettings, ConfigError, CoreError, ErrorExt, ErrorReporter, ItemKind,
    DEFAULT_CONFIG_PATH,
};
use reddit_client::{ListingStream, RedditClient, RedditOAuth2Config};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "mintwatch=info,engage_service=info,reddit_client=info,lead_store=info,dashboard=info";

#[derive(Parser)]
#[command(name = "mintwatch", version, about = "Find NFT creation and minting leads on Reddit")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log qualifying posts and comments to the lead log
    Intel,
    /// Reply to qualifying posts and comments with the promo link
    Engage,
    /// Show the lead log in a desktop window
    Dashboard {
        /// Lead log to display (defaults to the configured leads_path)
        #[arg(long)]
        leads: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_ROWS)]
        rows: usize,
        #[arg(long, default_value_t = 10)]
        refresh_secs: u64,
    },
    /// Authorize the bot account in a browser and print a refresh token
    Auth,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config);

    let log_dir = match (&cli.command, &config) {
        (Commands::Engage, Ok(config)) => Some(config.bot.log_dir.clone()),
        _ => None,
    };
    let _guard = init_logging(log_dir.as_deref());

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            match error.downcast_ref::<CoreError>() {
                Some(core_error) => {
                    ErrorReporter::new().report_error(core_error);
                    eprintln!("Error: {}", core_error.user_friendly_message());
                }
                None => eprintln!("Error: {:#}", error),
            }
            ExitCode::FAILURE
        }
    }
}

/// Console logging always; the engage command also keeps a daily log file.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "engage");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn run(cli: Cli, config: Result<AppConfig, ConfigError>) -> anyhow::Result<()> {
    match cli.command {
        Commands::Intel => block_on(stream(config.map_err(CoreError::from)?, ReactionMode::Log)),
        Commands::Engage => block_on(stream(config.map_err(CoreError::from)?, ReactionMode::Reply)),
        Commands::Auth => block_on(authorize(config.map_err(CoreError::from)?)),
        Commands::Dashboard {
            leads,
            rows,
            refresh_secs,
        } => {
            let leads_path = leads
                .or_else(|| config.ok().map(|config| config.bot.leads_path))
                .unwrap_or_else(|| BotSettings::default().leads_path);
            let dashboard_config = DashboardConfig {
                leads_path,
                rows,
                refresh: Duration::from_secs(refresh_secs.max(1)),
            };
            tracing::info!("Opening dashboard for {}", dashboard_config.leads_path.display());
            DashboardApp::run(Settings {
                window: iced::window::Settings {
                    size: iced::Size::new(1200.0, 800.0),
                    min_size: Some(iced::Size::new(800.0, 600.0)),
                    ..Default::default()
                },
                ..Settings::with_flags(dashboard_config)
            })?;
            Ok(())
        }
    }
}

fn block_on<F, E>(future: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = Result<(), E>>,
    E: Into<anyhow::Error>,
{
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(future).map_err(Into::into)
}

fn oauth_config(config: &AppConfig) -> RedditOAuth2Config {
    RedditOAuth2Config::new(
        config.reddit.client_id.clone(),
        config.reddit.client_secret.clone(),
        config.reddit.redirect_uri.clone(),
        config.reddit.user_agent.clone(),
    )
}

async fn stream(config: AppConfig, mode: ReactionMode) -> Result<(), CoreError> {
    let credentials = match mode {
        ReactionMode::Log => config.read_only_credentials(),
        ReactionMode::Reply => config.credentials()?,
    };
    let client = Arc::new(RedditClient::new(oauth_config(&config))?.with_credentials(credentials));
    let account = match client.authenticate().await? {
        Some(username) => format!("u/{}", username),
        None => "application-only".to_string(),
    };

    let reaction = match mode {
        ReactionMode::Log => {
            let log = CsvLeadLog::new(&config.bot.leads_path);
            log.initialize()?;
            tracing::info!("Logging leads to {}", log.path().display());
            Reaction::Log(Arc::new(log))
        }
        ReactionMode::Reply => Reaction::Reply {
            sink: client.clone(),
            templates: ReplyTemplates::from_settings(&config.bot),
        },
    };

    let engine = Arc::new(ReactionEngine::new(config.policy(), reaction));
    let posts = ListingStream::new(client.clone(), ItemKind::Post, config.bot.subreddits.clone());
    let comments = ListingStream::new(client, ItemKind::Comment, config.bot.subreddits.clone());

    tracing::info!(
        "Streaming r/{} as {} in {} mode",
        config.bot.subreddits,
        account,
        mode
    );

    let service = EngageService::new(engine).with_backoff(config.stream_backoff());
    tokio::select! {
        result = service.run(posts, comments) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

async fn authorize(config: AppConfig) -> anyhow::Result<()> {
    let client = RedditClient::new(oauth_config(&config))?;
    let scopes = RedditClient::get_required_scopes();
    let (auth_url, csrf_token) = client.generate_auth_url(&scopes)?;

    println!("Open this URL in a browser logged in as the bot account:\n\n{}\n", auth_url);
    println!("After approving, the browser is sent to {}.", config.reddit.redirect_uri);
    print!("Paste the full redirected URL here: ");
    io::stdout().flush()?;

    let mut callback_url = String::new();
    io::stdin().read_line(&mut callback_url)?;

    let token = client.handle_callback(callback_url.trim(), &csrf_token).await?;
    match token.refresh_token {
        Some(refresh_token) => {
            println!("\nAdd this to the [reddit] section of {}:", DEFAULT_CONFIG_PATH);
            println!("refresh_token = \"{}\"", refresh_token);
            Ok(())
        }
        None => anyhow::bail!("Reddit did not return a refresh token; was duration=permanent accepted?"),
    }
}

struct DashboardApp {
    app: dashboard::App,
}

impl Application for DashboardApp {
    type Message = dashboard::Message;
    type Theme = iced::Theme;
    type Executor = iced::executor::Default;
    type Flags = DashboardConfig;

    fn new(flags: Self::Flags) -> (Self, Command<Self::Message>) {
        let app = dashboard::App::new(flags);
        let load = app.load();
        (Self { app }, load)
    }

    fn title(&self) -> String {
        "Mintwatch - NFT Leads".to_string()
    }

    fn update(&mut self, message: Self::Message) -> Command<Self::Message> {
        self.app.update(message)
    }

    fn view(&self) -> Element<Self::Message> {
        self.app.view()
    }

    fn subscription(&self) -> Subscription<Self::Message> {
        self.app.subscription()
    }
}
