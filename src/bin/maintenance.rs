use std::env;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use letterflow::{
    auth::{password, session, throttle},
    config::AppConfig,
    db::{self, PgPool},
    models::{NewUser, Role},
    routes::users::{validate_password, validate_username},
    schema::users,
};

const USAGE: &str = "Usage: maintenance <command>\n\
    \n\
    Commands:\n  \
    prune-login-attempts            delete login attempts older than the retention window\n  \
    prune-sessions                  delete revoked and idle sessions\n  \
    create-user <username> <role> <full-name>\n                                  \
    create an account; the password is read from NEW_USER_PASSWORD";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("prune-login-attempts") => prune_login_attempts()?,
        Some("prune-sessions") => prune_sessions()?,
        Some("create-user") => create_user(&args[1..])?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<(AppConfig, PgPool)> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok((config, pool))
}

fn prune_login_attempts() -> Result<()> {
    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let removed = throttle::prune_attempts(&mut conn, Utc::now().naive_utc())
        .context("failed to prune login attempts")?;
    println!("Removed {removed} login attempts.");
    Ok(())
}

fn prune_sessions() -> Result<()> {
    let (config, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let cutoff = Utc::now().naive_utc() - Duration::minutes(config.session_timeout_minutes);
    let removed =
        session::prune_sessions(&mut conn, cutoff).context("failed to prune sessions")?;
    println!("Removed {removed} sessions.");
    Ok(())
}

fn create_user(args: &[String]) -> Result<()> {
    let [username, role, full_name @ ..] = args else {
        bail!("create-user needs <username> <role> <full-name>");
    };
    let full_name = full_name.join(" ").trim().to_string();
    if full_name.is_empty() {
        bail!("create-user needs <username> <role> <full-name>");
    }
    let username = validate_username(username).map_err(|err| anyhow!("{err}"))?;
    let role: Role = role.parse().map_err(|err: String| anyhow!(err))?;
    let secret = env::var("NEW_USER_PASSWORD").context("NEW_USER_PASSWORD must be set")?;
    validate_password(&secret).map_err(|err| anyhow!("{err}"))?;

    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username,
        password_hash: password::hash_password(&secret)?,
        role: role.as_str().to_string(),
        full_name,
    };
    let created = diesel::insert_into(users::table)
        .values(&new_user)
        .on_conflict_do_nothing()
        .execute(&mut conn)
        .context("failed to insert user")?;
    if created == 0 {
        bail!("username '{}' already exists", new_user.username);
    }

    println!("Created {} account '{}'.", role.title(), new_user.username);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
