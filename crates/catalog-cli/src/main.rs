//! Prism Catalog CLI
//!
//! Operator commands for a Prism catalog database: create the schema, add
//! accounts and OAuth2 clients, and load a small development data set.

use std::collections::BTreeSet;
use std::path::Path;

use clap::{Parser, Subcommand};
use prism_catalog_api::auth::credentials::{generate_client_credentials, hash_password_blocking};
use prism_catalog_api::config::{clamp_bcrypt_cost, ScopeRegistry};
use prism_catalog_api::db::open_connection;
use prism_catalog_api::store::{self, users::NewUser};
use prism_catalog_core::users::{StaticRole, StaticRoles};
use prism_catalog_core::validation::{validate_email, validate_password, validate_username};
use prism_catalog_core::{new_id, Dataset, Story};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const DEFAULT_BCRYPT_COST: u32 = 12;

#[derive(Parser)]
#[command(name = "prism")]
#[command(version, about = "Prism catalog CLI", long_about = None)]
struct Cli {
    /// Path to the catalog database
    #[arg(
        short,
        long,
        env = "PRISM_DATABASE_PATH",
        default_value = "prism_catalog.db",
        global = true
    )]
    catalog: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new catalog
    Init {
        /// Overwrite existing catalog if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Create an active user account
    CreateUser {
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "PRISM_USER_PASSWORD", hide_env_values = true)]
        password: String,

        /// Grant the administrator role
        #[arg(long)]
        admin: bool,
    },

    /// Register an OAuth2 client for a user and print its credentials
    CreateClient {
        /// Owner of the client
        username: String,

        /// Default scopes; every known scope when omitted
        #[arg(short, long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Load a demo user with a dataset and a linked story
    Seed {
        #[arg(long, env = "PRISM_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show catalog statistics
    Stats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { force } => init_catalog(&cli.catalog, force),
        Commands::CreateUser {
            username,
            email,
            password,
            admin,
        } => create_user(&cli.catalog, &username, &email, &password, admin),
        Commands::CreateClient { username, scopes } => {
            create_client(&cli.catalog, &username, scopes)
        }
        Commands::Seed { password } => seed(&cli.catalog, &password),
        Commands::Stats => show_stats(&cli.catalog),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Open an existing catalog.
fn connect(path: &str) -> CliResult<Connection> {
    if !Path::new(path).exists() {
        return Err(format!("No catalog at '{}'. Run 'prism init' first.", path).into());
    }
    Ok(open_connection(Path::new(path))?)
}

fn bcrypt_cost() -> u32 {
    std::env::var("PRISM_BCRYPT_COST")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(clamp_bcrypt_cost)
        .unwrap_or(DEFAULT_BCRYPT_COST)
}

fn init_catalog(path: &str, force: bool) -> CliResult<()> {
    if Path::new(path).exists() {
        if !force {
            return Err(format!(
                "Catalog already exists at '{}'. Use --force to overwrite.",
                path
            )
            .into());
        }
        println!("Removing existing catalog at '{}'", path);
        std::fs::remove_file(path)?;
    }

    let conn = open_connection(Path::new(path))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    prism_catalog_core::init_sqlite_schema(&conn)?;
    info!(path, "Catalog initialized");
    println!("Initialized catalog at '{}'", path);

    Ok(())
}

fn new_account(username: &str, email: &str, password: &str, admin: bool) -> CliResult<NewUser> {
    validate_username(username)?;
    validate_email(email)?;
    validate_password(password)?;

    let mut roles = StaticRoles::new_account();
    roles.assign(StaticRole::Admin, admin);

    Ok(NewUser {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: hash_password_blocking(password, bcrypt_cost())?,
        first_name: username.to_string(),
        static_roles: roles,
        ..Default::default()
    })
}

fn create_user(path: &str, username: &str, email: &str, password: &str, admin: bool) -> CliResult<()> {
    let account = new_account(username, email, password, admin)?;
    let conn = connect(path)?;
    let user = store::users::insert(&conn, &account)?;

    info!(user_id = user.id, username, admin, "User created");
    println!("Created user '{}' (id {})", user.username, user.id);
    if admin {
        println!("  Role: administrator");
    }
    Ok(())
}

fn resolve_scopes(requested: Vec<String>) -> CliResult<BTreeSet<String>> {
    let registry = ScopeRegistry::with_defaults()?;
    if requested.is_empty() {
        return Ok(registry.names().map(str::to_string).collect());
    }

    let requested: BTreeSet<String> = requested
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let unknown = registry.unknown(&requested);
    if !unknown.is_empty() {
        return Err(format!("Unknown scopes: {}", unknown.join(", ")).into());
    }
    Ok(requested)
}

fn create_client(path: &str, username: &str, scopes: Vec<String>) -> CliResult<()> {
    let scopes = resolve_scopes(scopes)?;
    let conn = connect(path)?;
    let user = store::users::find_by_username(&conn, username)?
        .ok_or_else(|| format!("No user named '{}'", username))?;

    let (client_id, client_secret) = generate_client_credentials();
    let secret_hash = hash_password_blocking(&client_secret, bcrypt_cost())?;
    store::auth::insert_client(&conn, &client_id, &secret_hash, user.id, &scopes, &[])?;

    info!(user_id = user.id, %client_id, "OAuth2 client registered");
    println!("Registered OAuth2 client for '{}'", user.username);
    println!("  client_id:     {}", client_id);
    println!("  client_secret: {}", client_secret);
    println!(
        "  scopes:        {}",
        scopes.iter().cloned().collect::<Vec<_>>().join(" ")
    );
    println!("The secret is not stored and cannot be shown again.");
    Ok(())
}

/// One transaction: a demo account, its provenance records, a dataset and a
/// story linked to it.
fn seed(path: &str, password: &str) -> CliResult<()> {
    let account = new_account("demo", "demo@example.com", password, false)?;
    let mut conn = connect(path)?;
    let tx = conn.transaction()?;

    let user = store::users::insert(&tx, &account)?;
    let license = store::provenance::license_by_title(&tx, "CC-BY-4.0", user.id)?;
    let organization = store::provenance::organization_by_name(&tx, "Prism Labs", user.id)?;
    let publisher = store::provenance::publisher_by_name(&tx, "Prism Open Data", user.id)?;

    let dataset: Dataset = serde_json::from_value(json!({
        "id": new_id(),
        "name": "city-air-quality",
        "title": "City Air Quality",
        "description": "Hourly PM2.5 and NO2 readings from municipal sensors",
        "keywords": "air,pollution,sensors",
        "data_quality": true,
        "stars": 0,
        "license_id": license.id,
        "organization_id": organization.id,
        "publisher_id": publisher.id,
        "contributor_id": user.id,
        "created": "",
        "updated": "",
        "deleted": false,
    }))?;
    let dataset = store::datasets::insert(&tx, &dataset)?;

    let story: Story = serde_json::from_value(json!({
        "id": new_id(),
        "title": "Breathing in the city",
        "description": "What a year of sensor data says about rush hour",
        "type": 0,
        "stars": 0,
        "contributor_id": user.id,
        "created": "",
        "updated": "",
    }))?;
    let story = store::stories::insert(&tx, &story)?;
    store::datasets::link_story(&tx, &dataset.id, &story.id, user.id)?;

    tx.commit()?;

    info!(user_id = user.id, dataset_id = %dataset.id, story_id = %story.id, "Seed data loaded");
    println!("Seeded catalog at '{}'", path);
    println!("  user:    {} (id {})", user.username, user.id);
    println!("  dataset: {} ({})", dataset.name, dataset.id);
    println!("  story:   {} ({})", story.title, story.id);
    Ok(())
}

fn count(conn: &Connection, sql: &str) -> CliResult<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

fn show_stats(path: &str) -> CliResult<()> {
    let conn = connect(path)?;

    let rows = [
        ("Users", "SELECT COUNT(*) FROM users"),
        ("OAuth2 clients", "SELECT COUNT(*) FROM oauth2_clients"),
        ("Access tokens", "SELECT COUNT(*) FROM oauth2_tokens"),
        ("Datasets", "SELECT COUNT(*) FROM datasets WHERE deleted = 0"),
        ("Deleted datasets", "SELECT COUNT(*) FROM datasets WHERE deleted = 1"),
        ("Licenses", "SELECT COUNT(*) FROM licenses"),
        ("Organizations", "SELECT COUNT(*) FROM organizations"),
        ("Publishers", "SELECT COUNT(*) FROM publishers"),
        ("Sources", "SELECT COUNT(*) FROM sources"),
        ("References", "SELECT COUNT(*) FROM dataset_references"),
        ("Stories", "SELECT COUNT(*) FROM stories"),
        ("Comments", "SELECT COUNT(*) FROM comments"),
    ];

    println!("Catalog Statistics");
    println!("{}", "=".repeat(50));
    for (label, sql) in rows {
        println!("{:<20} {}", format!("{}:", label), count(&conn, sql)?);
    }

    Ok(())
}
