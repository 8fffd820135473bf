use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use max_gateway::auth::{OAuthManager, ScopeProfile};
use max_gateway::http::{build_router, AppState};
use max_gateway::storage::TokenStore;
use max_gateway::{config, logging};
use std::io::{self, IsTerminal, Write};
use std::panic;
use std::sync::Arc;

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        default_hook(info);
        logging::crash(&info.to_string(), "main execution");
    }));
}

#[derive(Parser, Debug)]
#[command(name = "max-gateway")]
#[command(version)]
#[command(about = "Personal API gateway fronting a Claude Max OAuth subscription")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the gateway and listen for requests (default if no subcommand given)
    Serve,

    /// Open a browser to authorize this gateway against a Claude Max account
    Login,

    /// Exchange an authorization code (or `<code>#<state>`) for a token
    Exchange {
        /// The code printed at the end of the OAuth redirect
        code: String,
    },

    /// Force a token refresh against the stored refresh token
    Refresh,

    /// Show whether the gateway holds a valid credential, and of what kind
    Status,

    /// Clear the stored credential
    Logout,

    /// Authorize a long-lived (roughly one year) token instead of the
    /// ordinary refreshable one
    SetupLongLived,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_hook();
    logging::init();
    logging::cleanup_old_logs();
    logging::info("max-gateway starting");

    let args = Args::parse();

    if let Err(e) = run(args).await {
        logging::error(&format!("{:?}", e));
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Login => login(ScopeProfile::Broad).await,
        Command::SetupLongLived => login(ScopeProfile::LongLived).await,
        Command::Exchange { code } => exchange(&code).await,
        Command::Refresh => refresh().await,
        Command::Status => status().await,
        Command::Logout => logout().await,
    }
}

fn oauth_manager() -> OAuthManager {
    OAuthManager::new(TokenStore::load())
}

async fn serve() -> Result<()> {
    let oauth = Arc::new(oauth_manager());
    let state = AppState::new(oauth);
    let router = build_router(state);

    let cfg = &config::config().server;
    let addr = format!("{}:{}", cfg.bind_address, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    logging::info(&format!("listening on {}", addr));
    eprintln!("max-gateway listening on http://{}", addr);

    axum::serve(listener, router)
        .await
        .context("server loop exited")?;
    Ok(())
}

async fn login(profile: ScopeProfile) -> Result<()> {
    let oauth = oauth_manager();
    let url = oauth.build_authorize_url(profile)?;

    if io::stdout().is_terminal() {
        println!("Open this URL to authorize:\n\n  {}\n", url);
        let _ = open::that(&url);
        print!("Paste the code from the redirect: ");
        io::stdout().flush().ok();
    } else {
        println!("{}", url);
    }

    let mut code = String::new();
    io::stdin().read_line(&mut code)?;
    let code = code.trim();
    if code.is_empty() {
        println!("No code entered; the pending login is still on disk, run `exchange <code>` later.");
        return Ok(());
    }

    oauth.exchange_code(code, profile).await?;
    println!("Authenticated.");
    Ok(())
}

async fn exchange(code: &str) -> Result<()> {
    let oauth = oauth_manager();
    oauth.exchange_code(code, ScopeProfile::Broad).await?;
    println!("Authenticated.");
    Ok(())
}

async fn refresh() -> Result<()> {
    let oauth = oauth_manager();
    oauth.refresh().await?;
    println!("Token refreshed.");
    Ok(())
}

async fn status() -> Result<()> {
    let oauth = oauth_manager();
    let status = oauth.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn logout() -> Result<()> {
    let oauth = oauth_manager();
    oauth.logout().await?;
    println!("Logged out.");
    Ok(())
}
