//! talentgate - command line client for the talentgate HR backend.
//!
//! Signs in, keeps the session's tokens on disk (or in the OS keyring), and
//! issues authenticated requests through the same pipeline the web client
//! uses, so an expired token is refreshed transparently.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use talentgate_core::auth::{decode_claims, FilePlatform, KeyringPlatform, Platform};
use talentgate_core::config::Config;
use talentgate_core::{ApiClient, ApiError, ApiRequest, LoginOutcome};

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix inside the cache directory's `logs/` folder
const LOG_FILE_PREFIX: &str = "talentgate.log";

const USAGE: &str = "\
Usage: talentgate [--keyring] <command>

Commands:
  login [email]     Sign in and store the session
  logout [--all]    Sign out (--all signs out every device)
  status            Show the stored session and who the server thinks you are
  get <path>        GET an API path and print the JSON response

Options:
  --keyring         Keep tokens in the OS keyring instead of the cache directory";

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG controls the level (default `warn`). Logs go to stderr and to a
/// daily file under the cache directory; the returned guard flushes the file
/// writer on drop.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn print_sign_in_prompt(location: &Url) {
    eprintln!("Session ended. Sign in again at {}", location);
    eprintln!("or run `talentgate login`.");
}

fn platform(use_keyring: bool) -> Result<Arc<dyn Platform>> {
    if use_keyring {
        Ok(Arc::new(
            KeyringPlatform::new().with_navigation_hook(print_sign_in_prompt),
        ))
    } else {
        Ok(Arc::new(
            FilePlatform::default_location()?.with_navigation_hook(print_sign_in_prompt),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let use_keyring = match args.iter().position(|a| a == "--keyring") {
        Some(index) => {
            args.remove(index);
            true
        }
        None => false,
    };

    let Some(command) = args.first().cloned() else {
        println!("{}", USAGE);
        return Ok(());
    };
    if command == "-h" || command == "--help" || command == "help" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    info!(api = %config.api_base_url, keyring = use_keyring, "talentgate starting");
    let client = ApiClient::new(config, platform(use_keyring)?)?;

    match command.as_str() {
        "login" => login(&client, args.get(1).map(String::as_str)).await,
        "logout" => logout(&client, args.iter().any(|a| a == "--all")).await,
        "status" => status(&client).await,
        "get" => {
            let path = args.get(1).context("get requires an API path")?;
            get(&client, path).await
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(client: &ApiClient, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.to_string(),
        None => prompt_line("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    if email.is_empty() || password.is_empty() {
        bail!("Email and password required");
    }

    match client
        .login(&email, &password)
        .await
        .context("Login failed")?
    {
        LoginOutcome::Signed(_) => {}
        LoginOutcome::TwoFactorRequired { user_id, message } => {
            println!("{}", message.as_deref().unwrap_or("A verification code was sent to your email"));
            let code = prompt_line("Verification code: ")?;
            if code.is_empty() {
                bail!("Verification code required");
            }
            client
                .verify_two_factor(&user_id, &code)
                .await
                .context("Two-factor verification failed")?;
        }
        LoginOutcome::VerificationRequired { message, .. } => {
            bail!(
                "{}",
                message.as_deref().unwrap_or("Verify your email address before signing in")
            );
        }
    }
    println!("Signed in as {}", email);
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn logout(client: &ApiClient, everywhere: bool) -> Result<()> {
    match client.logout(everywhere).await {
        Ok(()) => println!("Signed out"),
        Err(e) => println!("Signed out locally (server said: {})", e),
    }
    Ok(())
}

async fn status(client: &ApiClient) -> Result<()> {
    let session = client.session();
    let Some(access) = session.access_token() else {
        let refresh = if session.refresh_token().is_some() {
            " (a refresh token is stored)"
        } else {
            ""
        };
        println!("Not signed in{}", refresh);
        return Ok(());
    };

    match decode_claims(&access) {
        Ok(claims) => {
            if let Some(email) = claims.email.as_deref().or(claims.sub.as_deref()) {
                println!("Token subject: {}", email);
            }
            if let Some(role) = claims.role.as_deref() {
                println!("Role:          {}", role);
            }
            if let Some(expires) = claims.expires_at() {
                let state = if session.is_token_expired(Some(&access)) {
                    "expired"
                } else {
                    "valid"
                };
                println!(
                    "Access token:  {} until {}",
                    state,
                    expires.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Err(e) => println!("Access token:  unreadable ({})", e),
    }

    match client.check_session().await {
        Ok(Some(user)) => println!("Server session: active for {}", user.display_name()),
        Ok(None) => println!("Server session: none (local tokens cleared)"),
        Err(e) => println!("Server session: unknown ({})", e),
    }
    Ok(())
}

async fn get(client: &ApiClient, path: &str) -> Result<()> {
    match client
        .fetch::<serde_json::Value>(ApiRequest::get(path))
        .await
    {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(e) if e.is_session_ended() => bail!("{}", e),
        Err(ApiError::NotFound(detail)) => bail!("{} not found: {}", path, detail),
        Err(e) => Err(e).with_context(|| format!("GET {} failed", path)),
    }
}
