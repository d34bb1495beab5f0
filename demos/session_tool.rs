//! Manage the stored session and try the utility helpers.
//!
//! Run with: cargo run --example session_tool -- <command>
//!
//! Commands:
//!   login <token>       store a bearer token
//!   logout              remove the token
//!   check               show whether a token is stored
//!   validate-mac <mac>  check a Bluetooth MAC address
//!   date [rfc3339]      format a date in the current locale

use lecturer_beacon::{
    format_date, format_date_str, validate_mac_address, Config, FileTokenStore, LogNavigator,
    Result, SessionGuard,
};
use std::sync::Arc;

fn usage() {
    eprintln!("usage: session_tool <login <token> | logout | check | validate-mac <mac> | date [rfc3339]>");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lecturer_beacon=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let config = Config::load()?;
    let store = Arc::new(FileTokenStore::new(config.resolved_storage_path()?));
    let guard = SessionGuard::with_config(store, Arc::new(LogNavigator), &config);

    match args.as_slice() {
        ["login", token] => {
            guard.store_token(token)?;
            println!("Token stored.");
        }
        ["logout"] => {
            guard.logout()?;
            println!("Logged out.");
        }
        ["check"] => match guard.check_auth() {
            Some(_) => println!("Logged in."),
            None => println!("Not logged in (login page: {}).", guard.login_path()),
        },
        ["validate-mac", mac] => {
            let verdict = if validate_mac_address(mac) { "valid" } else { "invalid" };
            println!("{}: {}", mac, verdict);
        }
        ["date"] => println!("{}", format_date(&chrono::Local::now())),
        ["date", input] => match format_date_str(input) {
            Some(formatted) => println!("{}", formatted),
            None => println!("Not an RFC 3339 date: {}", input),
        },
        _ => usage(),
    }

    Ok(())
}
