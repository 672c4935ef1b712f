//! Mint an operator token signed with the server's JWT settings.
//!
//!   issue_token --subject ops@example.org --admin
//!   issue_token --subject clerk-7 --role accounting --ttl-hours 8

use anyhow::{Context, Result};
use clap::Parser;
use kamu_core::domains::auth::JwtService;
use kamu_core::Config;

#[derive(Parser, Debug)]
#[command(name = "issue_token", about = "Issue a signed API token")]
struct Args {
    /// Token subject (user id)
    #[arg(long)]
    subject: String,

    /// Role to grant; repeat for several
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Grant admin access
    #[arg(long)]
    admin: bool,

    /// Lifetime in hours
    #[arg(long, default_value_t = kamu_core::domains::auth::jwt::TOKEN_TTL_HOURS)]
    ttl_hours: i64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    if args.ttl_hours <= 0 {
        anyhow::bail!("--ttl-hours must be positive");
    }

    let jwt = JwtService::new(&config.jwt_secret, config.jwt_issuer.clone());
    let token = jwt.create_token_with_ttl(
        &args.subject,
        args.roles,
        args.admin,
        chrono::Duration::hours(args.ttl_hours),
    )?;

    println!("{}", token);
    Ok(())
}
