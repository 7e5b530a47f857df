use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::Level;

use yarba_session::api::BackendApi;
use yarba_session::config::{AppConfig, ConfigError};
use yarba_session::exchange::TokenExchanger;
use yarba_session::firebase::{FirebaseIdentityClient, StaticGoogleCredential};
use yarba_session::guard::{self, GuardDecision};
use yarba_session::http::{HttpClient, SessionExpired};
use yarba_session::identity::{IdentityProvider, ProviderUser, Subscription, TransitionHub};
use yarba_session::token_store::{FileTokenStore, TokenStore};
use yarba_session::types::{RegistrationData, UserUpdate};
use yarba_session::{CredentialCode, CredentialError, SessionError, SessionManager, TransportError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("not signed in; run `yarba login`")]
    NotSignedIn,
    #[error("identity provider not configured: set FIREBASE_API_KEY (or use `yarba login-direct`)")]
    ProviderNotConfigured,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "yarba", about = "YARBA account and session CLI")]
struct Cli {
    /// Google ID token to use for `google` (stands in for the browser popup).
    #[arg(long, env = "YARBA_GOOGLE_ID_TOKEN", global = true)]
    google_id_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password through the identity provider.
    Login(Credentials),
    /// Sign in with the backend's own username/password endpoint.
    LoginDirect {
        username: String,
        #[arg(long, env = "YARBA_PASSWORD")]
        password: String,
    },
    Register(RegisterArgs),
    /// Sign in with a Google ID token.
    Google,
    /// Show the current user.
    Me,
    UpdateProfile(UpdateProfileArgs),
    Logout,
    /// Show the provider's claims for a fresh ID token (debugging).
    VerifyToken(Credentials),
    /// Resolve an app location the way the route guard would.
    Open { path: String },
}

impl Command {
    /// Commands that sign in through the identity provider.
    fn needs_provider(&self) -> bool {
        matches!(self, Self::Login(_) | Self::Register(_) | Self::Google | Self::VerifyToken(_))
    }
}

#[derive(Args, Debug)]
struct Credentials {
    email: String,
    #[arg(long, env = "YARBA_PASSWORD")]
    password: String,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    email: String,
    #[arg(long, env = "YARBA_PASSWORD")]
    password: String,
    #[arg(long)]
    username: String,
    #[arg(long, default_value = "")]
    full_name: String,
}

#[derive(Args, Debug)]
struct UpdateProfileArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    full_name: Option<String>,
}

struct App {
    session: SessionManager,
    provider: Arc<dyn IdentityProvider>,
    provider_configured: bool,
    api: BackendApi,
}

#[tokio::main]
async fn main() -> ExitCode {
    match dotenvy::dotenv() {
        Err(e) if !e.not_found() => eprintln!("ignoring unreadable .env: {e}"),
        _ => {}
    }
    let cli = Cli::parse();

    match try_main(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Credential errors display as the user-facing message table text.
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;

    let level = if config.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let app = build(&config, cli.google_id_token)?;
    let mut expired = app.api.http().session_expired();

    let result = run(&app, cli.command).await;

    if drain_expired(&mut expired) {
        eprintln!("session expired; run `yarba login`");
    }
    result
}

fn build(config: &AppConfig, google_id_token: Option<String>) -> Result<App, CliError> {
    let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(config.token_file.clone()));
    let http = HttpClient::new(config.api_base_url.clone(), tokens, config.timeouts)?;
    let api = BackendApi::new(http);

    let provider: Arc<dyn IdentityProvider> = match &config.firebase {
        Some(firebase) => {
            tracing::debug!(analytics = firebase.analytics_enabled(), "identity provider configured");
            let mut client = FirebaseIdentityClient::new(firebase.clone())?;
            if let Some(token) = google_id_token {
                client = client.with_google(Arc::new(StaticGoogleCredential(token)));
            }
            Arc::new(client)
        }
        None => Arc::new(UnconfiguredProvider::default()),
    };

    let exchanger = TokenExchanger::new(provider.clone(), api.clone());
    let session = SessionManager::new(provider.clone(), api.clone(), exchanger);
    Ok(App { session, provider, provider_configured: config.firebase.is_some(), api })
}

async fn run(app: &App, command: Command) -> Result<(), CliError> {
    if command.needs_provider() && !app.provider_configured {
        return Err(CliError::ProviderNotConfigured);
    }
    match command {
        Command::Login(creds) => print_json(&app.session.login(&creds.email, &creds.password).await?),
        Command::LoginDirect { username, password } => {
            print_json(&app.session.login_direct(&username, &password).await?)
        }
        Command::Register(args) => {
            let data = RegistrationData {
                email: args.email,
                password: args.password,
                username: args.username,
                full_name: args.full_name,
            };
            print_json(&app.session.register(&data).await?)
        }
        Command::Google => print_json(&app.session.sign_in_with_google().await?),
        Command::Me => {
            require_token(app)?;
            print_json(&app.session.refresh_user().await?)
        }
        Command::UpdateProfile(args) => {
            require_token(app)?;
            let update = UserUpdate { username: args.username, email: args.email, full_name: args.full_name };
            print_json(&app.session.update_profile(&update).await?)
        }
        Command::Logout => {
            app.session.sign_out().await?;
            println!("signed out");
            Ok(())
        }
        Command::VerifyToken(creds) => {
            app.provider.login_with_password(&creds.email, &creds.password).await?;
            let id_token = app
                .provider
                .get_id_token(true)
                .await?
                .ok_or_else(|| CredentialError::new(CredentialCode::UserNotFound))?;
            print_json(&app.api.verify_firebase_token(&id_token).await?)
        }
        Command::Open { path } => open(app, &path).await,
    }
}

async fn open(app: &App, path: &str) -> Result<(), CliError> {
    let handle = app.session.start().await;
    let state = app.session.state();
    let online = app.session.is_online();
    let (route, decision) = guard::navigate(path, &state, online);
    handle.stop().await;

    match decision {
        GuardDecision::Render => println!("render {route:?} ({path})"),
        GuardDecision::Placeholder => println!("loading {route:?}"),
        GuardDecision::Redirect(redirect) => {
            if redirect.offline {
                println!("you appear to be offline");
            }
            println!("redirect {}", redirect.to_path());
        }
    }
    Ok(())
}

fn require_token(app: &App) -> Result<(), CliError> {
    if app.api.http().token_store().get().is_none() {
        return Err(CliError::NotSignedIn);
    }
    Ok(())
}

fn drain_expired(rx: &mut broadcast::Receiver<SessionExpired>) -> bool {
    let mut expired = false;
    loop {
        match rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => expired = true,
            Err(_) => return expired,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Provider used when no Firebase credentials are configured. Every sign-in
/// fails; there is never a provider session.
#[derive(Default)]
struct UnconfiguredProvider {
    hub: TransitionHub,
}

impl UnconfiguredProvider {
    fn unavailable() -> CredentialError {
        CredentialError::with_detail(CredentialCode::Unknown, "FIREBASE_API_KEY is not set")
    }
}

#[async_trait::async_trait]
impl IdentityProvider for UnconfiguredProvider {
    async fn register_with_password(&self, _email: &str, _password: &str) -> Result<ProviderUser, CredentialError> {
        Err(Self::unavailable())
    }

    async fn login_with_password(&self, _email: &str, _password: &str) -> Result<ProviderUser, CredentialError> {
        Err(Self::unavailable())
    }

    async fn sign_in_with_google(&self) -> Result<ProviderUser, CredentialError> {
        Err(Self::unavailable())
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        Ok(())
    }

    async fn get_id_token(&self, _force_refresh: bool) -> Result<Option<String>, CredentialError> {
        Ok(None)
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
