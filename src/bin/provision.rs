use std::env;
use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use opsportal::access::Role;
use opsportal::config::AppConfig;
use opsportal::lifecycle::accounts::{self, Registration};
use opsportal::store;

const USAGE: &str = "Usage: provision <email> <first_name> <last_name> <role>\n\
The password is read from PROVISION_PASSWORD, or from the first line of stdin.";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let [email, first_name, last_name, role] = args.as_slice() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let role: Role = role.parse()?;
    let password = read_password()?;

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "provision",
        database_url = %config.redacted_database_url(),
        "loaded portal configuration"
    );
    let store = store::connect(&config).await?;

    let user = accounts::provision(
        store.as_ref(),
        Registration {
            email: email.clone(),
            password,
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            role: Some(role),
        },
    )
    .await?;

    println!("Created {} user {} ({})", user.role, user.email, user.id);
    Ok(())
}

fn read_password() -> Result<String> {
    if let Ok(password) = env::var("PROVISION_PASSWORD") {
        return Ok(password);
    }

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given\n{USAGE}");
    }
    Ok(password)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
