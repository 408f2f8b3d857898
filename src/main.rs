use anyhow::{Context, Result};
use dialoguer::Password;
use std::sync::Arc;

use ticketing_session::auth::types::{
    RegisterAccountStep, RegisterContactStep, RegisterReferralStep,
};
use ticketing_session::auth::{LoginRequest, RegisterForm, SqliteStorage};
use ticketing_session::config::{Command, Config};
use ticketing_session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        backend = %config.session.backend_url,
        db = %config.session_db_file.display(),
        "Configuration loaded"
    );

    let storage = Arc::new(SqliteStorage::open(&config.session_db_file)?);
    let session = SessionManager::from_config(config.session.clone(), storage)?;

    match command {
        Command::Login {
            email,
            password,
            remember_me,
        } => {
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            let mut request = LoginRequest::new(email, password);
            request.remember_me = remember_me.then_some(true);

            let auth = session.login(request).await?;
            println!("Signed in as {} ({})", auth.user.email, auth.user.role);
        }

        Command::Register {
            full_name,
            email,
            phone,
            role,
            referral_code,
        } => {
            let password = Password::new()
                .with_prompt("Password")
                .with_confirmation("Confirm password", "Passwords don't match")
                .interact()
                .context("Failed to read password")?;

            let form = RegisterForm {
                step1: RegisterAccountStep {
                    full_name,
                    email,
                    confirm_password: password.clone(),
                    password,
                },
                step2: RegisterContactStep { phone, role },
                step3: RegisterReferralStep { referral_code },
            };

            let auth = session.register(form).await?;
            println!("Registered and signed in as {}", auth.user.email);
        }

        Command::Logout => {
            session.logout().await?;
            println!("Signed out");
        }

        Command::Status => {
            if session.is_authenticated() {
                match session.cached_user() {
                    Some(user) => println!("Signed in as {} ({})", user.email, user.role),
                    None => println!("Signed in"),
                }
            } else if session.store().get_refresh_token().is_some() {
                println!("Access token expired; the next request will refresh it");
            } else {
                println!("Not signed in");
            }
        }

        Command::Whoami => match session.current_user().await {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => anyhow::bail!("Not signed in or profile unavailable"),
        },

        Command::Get { path } => {
            let client = session.client();
            let response = match client.send(client.get(&path)).await {
                Ok(response) => response,
                Err(e) if e.is_session_terminal() => {
                    anyhow::bail!("Session expired, please log in again ({})", e)
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            let body = response.text().await.context("Failed to read response body")?;
            println!("{}", body);
            if !status.is_success() {
                anyhow::bail!("Request failed with status {}", status);
            }
        }
    }

    Ok(())
}
