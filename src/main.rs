use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::error;
use reqwest::blocking::Client;
use reqwest::redirect;

use ytsheet::auth::{RefreshToken, StaticToken, TokenSource};
use ytsheet::bot::Poller;
use ytsheet::config::{
    ConfigError, DEFAULT_BIND_ADDR, DEFAULT_SHEET_NAME, DEFAULT_TRIGGER_TEXT,
    DEFAULT_WORKER_THREADS,
};
use ytsheet::dispatch::{self, Dispatcher};
use ytsheet::report;
use ytsheet::server::{self, AppState, Mode};
use ytsheet::sheet::GoogleSheets;
use ytsheet::source::drive::DriveClient;
use ytsheet::telegram::TelegramClient;
use ytsheet::upload::youtube::YoutubeUploader;
use ytsheet::worker::JobPool;
use ytsheet::{BotConfig, ChunkedUploader, JobRunner, SourceResolver};

/// ytsheet: publish the next spreadsheet row as a YouTube video on a chat trigger.
#[derive(Parser)]
#[command(name = "ytsheet", version, about)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true, global = true)]
    telegram_token: Option<String>,

    /// Spreadsheet id or full spreadsheet URL
    #[arg(long, env = "SPREADSHEET_ID", global = true)]
    spreadsheet_id: Option<String>,

    /// Sheet (tab) holding the queue
    #[arg(long, env = "SHEET_NAME", default_value = DEFAULT_SHEET_NAME, global = true)]
    sheet_name: Option<String>,

    /// Message text that starts a job
    #[arg(long, env = "TRIGGER_TEXT", default_value = DEFAULT_TRIGGER_TEXT, global = true)]
    trigger_text: String,

    /// Static bearer token for Sheets and Drive
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    google_access_token: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_ID", global = true)]
    google_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true, global = true)]
    google_client_secret: Option<String>,

    #[arg(long, env = "GOOGLE_REFRESH_TOKEN", hide_env_values = true, global = true)]
    google_refresh_token: Option<String>,

    /// Bearer token for YouTube uploads (defaults to the Google credentials)
    #[arg(long, env = "YOUTUBE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    youtube_access_token: Option<String>,

    #[arg(long, env = "YOUTUBE_REFRESH_TOKEN", hide_env_values = true, global = true)]
    youtube_refresh_token: Option<String>,

    /// Keep the first row after a successful upload
    #[arg(long, global = true)]
    keep_row: bool,

    /// Hide the upload progress bar
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Long-poll Telegram for triggers
    Poll,

    /// Receive triggers through a Telegram webhook
    Serve {
        /// Run jobs on a worker pool, or inside the request
        #[arg(long, value_enum, env = "WEBHOOK_MODE", default_value_t = Mode::Threaded)]
        mode: Mode,

        #[arg(long, env = "BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
        bind: String,

        /// Expected X-Telegram-Bot-Api-Secret-Token header
        #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
        secret: Option<String>,

        /// Jobs allowed to run at the same time (threaded mode)
        #[arg(long, env = "WORKER_THREADS", default_value_t = DEFAULT_WORKER_THREADS)]
        workers: usize,
    },

    /// Publish the next row once and print the report
    RunOnce,
}

fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        match e.downcast_ref::<ConfigError>() {
            Some(ConfigError::Missing(keys)) => {
                for key in keys {
                    error!("missing required setting {}", key);
                }
            }
            None => error!("{:#}", e),
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let s = &cli.settings;
    let mut cfg = BotConfig::new(
        s.telegram_token.clone(),
        s.spreadsheet_id.clone(),
        s.sheet_name.clone(),
        Some(s.trigger_text.clone()),
    )?;
    cfg.delete_row_after_upload = !s.keep_row;

    let runner = build_runner(&cfg, s)?;

    match cli.command {
        Commands::RunOnce => {
            let text = match dispatch::run_guarded(&runner) {
                Ok(outcome) => report::render(&outcome),
                Err(dispatch::JobPanic(status)) => report::unknown_status(&status),
            };
            println!("{text}");
        }

        Commands::Poll => {
            let telegram = Arc::new(telegram_client(&cfg)?);
            let dispatcher = Dispatcher::new(Arc::new(runner), telegram.clone(), cfg.trigger_text.clone());
            Poller::new(&telegram, &dispatcher).run();
        }

        Commands::Serve {
            mode,
            bind,
            secret,
            workers,
        } => {
            let telegram = Arc::new(telegram_client(&cfg)?);
            let dispatcher = Arc::new(Dispatcher::new(
                Arc::new(runner),
                telegram,
                cfg.trigger_text.clone(),
            ));
            let state = match mode {
                Mode::Threaded => {
                    let pool = Arc::new(JobPool::new(workers).context("failed to start worker pool")?);
                    AppState::threaded(Arc::clone(&dispatcher), &cfg.telegram_token, pool)
                }
                Mode::Sync => AppState::sync(Arc::clone(&dispatcher), &cfg.telegram_token),
            }
            .with_secret(secret);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(async {
                let listener = tokio::net::TcpListener::bind(&bind)
                    .await
                    .with_context(|| format!("failed to bind {bind}"))?;
                server::serve(listener, state).await?;
                anyhow::Ok(())
            })?;
            // The blocking HTTP clients inside `dispatcher` must be dropped off the runtime.
            drop(runtime);
        }
    }

    Ok(())
}

fn telegram_client(cfg: &BotConfig) -> Result<TelegramClient> {
    let http = Client::builder().build()?;
    Ok(TelegramClient::new(http, &cfg.endpoints.telegram, &cfg.telegram_token))
}

fn build_runner(cfg: &BotConfig, s: &Settings) -> Result<JobRunner> {
    let ep = &cfg.endpoints;
    let api = Client::builder().build()?;
    // Drive's confirmation flow relies on cookies set by the warning page.
    let downloads = Client::builder().cookie_store(true).build()?;
    // A resumable session answers 308 for "continue"; it must not be followed.
    let youtube = Client::builder().redirect(redirect::Policy::none()).build()?;

    let google = google_tokens(&api, &ep.oauth_token, s)?;
    let youtube_tokens: Arc<dyn TokenSource> = match (&s.youtube_access_token, &s.youtube_refresh_token) {
        (Some(token), _) => Arc::new(StaticToken::new(token.clone())),
        (None, Some(refresh)) => match (&s.google_client_id, &s.google_client_secret) {
            (Some(id), Some(secret)) => Arc::new(RefreshToken::new(
                api.clone(),
                ep.oauth_token.clone(),
                id.clone(),
                secret.clone(),
                refresh.clone(),
            )),
            _ => bail!("YOUTUBE_REFRESH_TOKEN needs GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET"),
        },
        (None, None) => Arc::clone(&google),
    };

    let rows = Arc::new(GoogleSheets::new(
        api,
        ep.sheets.clone(),
        cfg.spreadsheet_id.clone(),
        cfg.sheet_name.clone(),
        Arc::clone(&google),
    ));
    let drive = DriveClient::new(downloads.clone(), ep.drive_api.clone(), google);
    let resolver = SourceResolver::new(downloads, Some(drive), ep.drive_public.clone());
    let credentials = Arc::new(YoutubeUploader::new(youtube, ep.youtube_upload.clone(), youtube_tokens));
    let uploader = ChunkedUploader::default().with_progress(!s.quiet);

    let runner = JobRunner::new(rows, resolver, credentials, uploader, cfg.upload.clone());
    Ok(if cfg.delete_row_after_upload {
        runner
    } else {
        runner.keep_rows()
    })
}

fn google_tokens(http: &Client, token_url: &str, s: &Settings) -> Result<Arc<dyn TokenSource>> {
    if let Some(token) = &s.google_access_token {
        return Ok(Arc::new(StaticToken::new(token.clone())));
    }
    match (&s.google_client_id, &s.google_client_secret, &s.google_refresh_token) {
        (Some(id), Some(secret), Some(refresh)) => Ok(Arc::new(RefreshToken::new(
            http.clone(),
            token_url,
            id.clone(),
            secret.clone(),
            refresh.clone(),
        ))),
        _ => bail!(
            "no Google credentials: set GOOGLE_ACCESS_TOKEN or GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REFRESH_TOKEN"
        ),
    }
}
