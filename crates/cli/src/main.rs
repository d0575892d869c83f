//! Cartwheel CLI - drive the storefront session and cart from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (prompts for the password on stdin when --password is omitted)
//! cw-cli login -e jane@example.com
//!
//! # Edit the cart
//! cw-cli cart add --id 12 --name "Sencha" --price 9.50 --quantity 2
//! cw-cli cart set 12 3
//! cw-cli cart remove 12
//!
//! # Inspect
//! cw-cli whoami
//! cw-cli cart show
//! ```
//!
//! # Environment Variables
//!
//! - `CARTWHEEL_API_URL` - Backend API base URL (required)
//! - `CARTWHEEL_STATE_DIR` - Where session and cart are kept between runs
//! - `RUST_LOG` - Log filter (default: `cartwheel_client=info,cartwheel_cli=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use cartwheel_client::notify::{ChannelNotifier, Notification};
use cartwheel_client::{ClientConfig, ClientState};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::CliError;

const DEFAULT_LOG_FILTER: &str = "cartwheel_client=info,cartwheel_cli=info";

#[derive(Parser)]
#[command(name = "cw-cli")]
#[command(author, version, about = "Cartwheel storefront client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Account password (read from stdin when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Create an account and sign in
    Register {
        /// First name
        #[arg(long)]
        first_name: String,

        /// Last name
        #[arg(long, default_value = "")]
        last_name: String,

        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Account password (read from stdin when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Sign out and forget the local session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Inspect or edit the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// List cart lines and totals
    Show,
    /// Add a product
    Add {
        /// Product ID
        #[arg(long)]
        id: i64,

        /// Product name
        #[arg(long)]
        name: String,

        /// Unit price (e.g. 9.50)
        #[arg(long)]
        price: String,

        /// Number of units
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Remove a product
    Remove {
        /// Product ID
        id: i64,
    },
    /// Set a product's quantity (0 or less removes it)
    Set {
        /// Product ID
        id: i64,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove every product
    Clear,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ClientConfig::from_env().map_err(cartwheel_client::ClientError::from)?;
    let (notifier, mut notifications) = ChannelNotifier::new();
    let client = ClientState::new(config, Arc::new(notifier))?;

    client.session().restore().await;
    // Cart commands must edit the account cart, not the one it replaces.
    client.cart().ready().await;

    let result = match cli.command {
        Commands::Login { email, password } => {
            commands::auth::login(&client, &email, password).await
        }
        Commands::Register {
            first_name,
            last_name,
            email,
            password,
        } => commands::auth::register(&client, &first_name, &last_name, &email, password).await,
        Commands::Logout => {
            commands::auth::logout(&client);
            Ok(())
        }
        Commands::Whoami => {
            commands::auth::whoami(&client);
            Ok(())
        }
        Commands::Cart { action } => match action {
            CartAction::Show => Ok(()),
            CartAction::Add {
                id,
                name,
                price,
                quantity,
            } => commands::cart::add(&client, id, name, &price, quantity),
            CartAction::Remove { id } => {
                commands::cart::remove(&client, id);
                Ok(())
            }
            CartAction::Set { id, quantity } => {
                commands::cart::set(&client, id, quantity);
                Ok(())
            }
            CartAction::Clear => {
                commands::cart::clear(&client);
                Ok(())
            }
        },
    };

    // Let the cart settle with the backend before the process exits.
    client.cart().flush().await;
    print_notifications(&mut notifications);
    result?;

    commands::cart::show(&client);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_notifications(notifications: &mut UnboundedReceiver<Notification>) {
    while let Ok(notification) = notifications.try_recv() {
        println!("{notification}");
    }
}
