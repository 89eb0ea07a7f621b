use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::broadcast;
use tracing::{info, warn};

use taxtrack_core::auth::{SessionEvent, TerminationReason};
use taxtrack_core::config::TokenStorage;
use taxtrack_core::utils::{format_currency, format_date, format_percent, truncate_string};
use taxtrack_core::{load_dashboard, ApiClient, Config};

/// Environment variable that supplies the password non-interactively
const PASSWORD_ENV: &str = "TAXTRACK_PASSWORD";

/// Width of the label column in the summary table
const LABEL_WIDTH: usize = 22;

fn prompt_email(default: Option<&str>) -> Result<String> {
    match default {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), default) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => Err(anyhow::anyhow!("Email is required")),
        (false, _) => Ok(input.to_string()),
    }
}

fn prompt_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        return Err(anyhow::anyhow!("Password is required"));
    }
    Ok(password)
}

fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

pub async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = prompt_password()?;

    println!("Signing in...");
    let user = client
        .login(&email, &password)
        .await
        .context("Sign in failed")?;

    remember_email(config, &email);
    info!(user_id = %user.id, "Login successful");
    println!("Signed in as {}.", truncate_string(user.display_name(), 40));
    Ok(())
}

pub async fn register(
    client: &ApiClient,
    config: &mut Config,
    email: &str,
    name: Option<&str>,
) -> Result<()> {
    let password = prompt_password()?;

    let user = client
        .register(email, &password, name)
        .await
        .context("Registration failed")?;

    remember_email(config, email);
    println!("Welcome, {}! Your account is ready.", user.display_name());
    Ok(())
}

pub async fn logout(client: &ApiClient) -> Result<()> {
    let signed_in = client
        .session()
        .has_credentials()
        .context("Failed to read stored credentials")?;
    if !signed_in {
        println!("Not signed in.");
        return Ok(());
    }
    client.logout().await.context("Sign out failed")?;
    Ok(())
}

pub async fn status(client: &ApiClient, config: &Config) -> Result<()> {
    let storage = match config.token_storage {
        TokenStorage::File => "session file",
        TokenStorage::Keyring => "OS keychain",
    };
    println!("{:<LABEL_WIDTH$}{}", "API", client.base_url());
    println!("{:<LABEL_WIDTH$}{}", "Credentials", storage);

    if !client.session().is_authenticated() {
        println!("{:<LABEL_WIDTH$}{}", "Signed in", "no");
        return Ok(());
    }

    let user = client.current_user().await?;
    println!("{:<LABEL_WIDTH$}{}", "Signed in", user.email);
    Ok(())
}

pub async fn summary(client: &ApiClient) -> Result<()> {
    if !client.session().is_authenticated() {
        return Err(anyhow::anyhow!("Not signed in. Run `taxtrack login` first."));
    }

    let dashboard = load_dashboard(client).await;
    let today = Local::now().date_naive();
    let summary = &dashboard.summary;

    if let Some(ref error) = dashboard.error {
        println!("Could not load your summary: {}", error);
        println!("Showing placeholder figures.\n");
    }

    let row = |label: &str, value: String| println!("{:<LABEL_WIDTH$}{:>14}", label, value);

    println!("Year to date (Q{})", summary.current_quarter);
    row("Income", format_currency(summary.ytd_income));
    row("Deductions", format_currency(summary.ytd_deductions));
    row("Profit", format_currency(summary.ytd_profit));
    row("Estimated tax", format_currency(dashboard.estimated_annual_tax()));
    row("Paid to date", format_currency(dashboard.paid_to_date()));
    row("Remaining", format_currency(dashboard.remaining_due()));
    if let Some(rate) = dashboard.effective_rate() {
        row("Effective rate", format_percent(rate));
    }

    if !summary.quarterly_estimates.is_empty() {
        println!("\nQuarterly estimates");
        let mut estimates = summary.quarterly_estimates.clone();
        estimates.sort_by_key(|q| q.quarter);
        for estimate in &estimates {
            println!(
                "  {:<4}{:<16}{:>14}  {}",
                estimate.label(),
                format_date(&estimate.due_date),
                format_currency(estimate.amount),
                if estimate.paid { "paid" } else { "due" }
            );
        }
    }

    println!();
    if let Some(label) = dashboard.deadline_label(today) {
        let date = summary
            .next_deadline
            .as_deref()
            .or_else(|| dashboard.next_unpaid_estimate().map(|q| q.due_date.as_str()))
            .map(format_date)
            .unwrap_or_default();
        row("Next deadline", format!("{} ({})", date, label));
    }
    row("Needs review", summary.items_needing_review.to_string());
    row("Connected accounts", summary.connected_accounts.to_string());

    Ok(())
}

/// React to session events raised while a command ran. An ended session
/// sends the user back to `taxtrack login`.
pub fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Terminated(TerminationReason::LoggedOut) => {
                println!("Signed out.");
            }
            SessionEvent::Terminated(reason) => {
                info!(?reason, "Session ended");
                eprintln!("Your session has ended. Run `taxtrack login` to sign in again.");
            }
            SessionEvent::Started | SessionEvent::Refreshed => {}
        }
    }
}
