//! Login and logout handlers

use std::io::{self, Write};

use anyhow::{bail, Result};

use crate::output::Output;

/// Sign in and store the credential
pub async fn login(email: String, output: &Output) -> Result<()> {
    let password = read_password()?;
    let network = super::open_network().await?;

    let credential = network.client.login(&email, &password).await?;

    output.success(&format!(
        "Signed in as {}",
        credential.user.display_name()
    ));
    if let Some(ref role) = credential.user.role {
        output.message(&format!("  Role: {}", role));
    }

    let pending = network.queue.len().await;
    if pending > 0 {
        output.message(&format!(
            "{} queued write(s) waiting. Deliver them with: tether queue replay",
            pending
        ));
    }

    Ok(())
}

/// Sign out; queued writes are kept
pub async fn logout(output: &Output) -> Result<()> {
    let network = super::open_network().await?;

    if !network.tokens.is_authenticated().await {
        output.message("Not signed in.");
        return Ok(());
    }

    network.client.logout().await?;
    output.success("Signed out");
    Ok(())
}

/// Password from TETHER_PASSWORD, or prompt when interactive
fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("TETHER_PASSWORD") {
        return Ok(password);
    }

    if !atty::is(atty::Stream::Stdin) {
        bail!("No password given. Set TETHER_PASSWORD or run interactively.");
    }

    print!("Password: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let password = input.trim_end_matches(['\r', '\n']).to_string();

    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}
