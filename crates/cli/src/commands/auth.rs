//! Session commands.

use std::io::BufRead;

use cartwheel_client::ClientState;
use secrecy::SecretString;

use super::CliError;

/// Sign in, prompting for the password if it was not given.
pub async fn login(
    client: &ClientState,
    email: &str,
    password: Option<String>,
) -> Result<(), CliError> {
    let password = password_or_stdin(password)?;
    client.session().sign_in(email, &password).await?;
    Ok(())
}

/// Register a new account and sign into it.
pub async fn register(
    client: &ClientState,
    first_name: &str,
    last_name: &str,
    email: &str,
    password: Option<String>,
) -> Result<(), CliError> {
    let password = password_or_stdin(password)?;
    client
        .session()
        .sign_up(first_name, last_name, email, &password)
        .await?;
    Ok(())
}

pub fn logout(client: &ClientState) {
    client.session().sign_out();
}

#[allow(clippy::print_stdout)]
pub fn whoami(client: &ClientState) {
    let snapshot = client.session().snapshot();
    match snapshot.profile() {
        Some(profile) if snapshot.is_authenticated() => {
            println!("{} <{}> (id {})", profile.name, profile.email, profile.id);
        }
        _ => println!("Not signed in"),
    }
}

fn password_or_stdin(password: Option<String>) -> Result<SecretString, CliError> {
    if let Some(password) = password {
        return Ok(SecretString::from(password));
    }

    tracing::info!("Reading password from stdin");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(SecretString::from(line.trim_end_matches(['\r', '\n']).to_string()))
}
