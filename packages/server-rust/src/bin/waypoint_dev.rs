//! Local development server for Waypoint endpoints.
//!
//! `serve` mounts a small users API on the embedded axum router;
//! `sniff` prints the environment keys its services read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use waypoint_server::telemetry::{init_tracing, LogFormat};
use waypoint_server::{
    ConfigSniffer, Endpoint, Environment, EventDeclaration, HttpError, NetworkConfig, NetworkModule,
    Pipeline, RateLimitPolicy, ServiceDescriptor, ServiceRegistry, Shape, WebhookPublisher,
};

#[derive(Parser)]
#[command(name = "waypoint-dev")]
#[command(about = "Run Waypoint endpoints locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo endpoints over HTTP
    Serve {
        #[arg(long, env = "WAYPOINT_HOST", default_value = "127.0.0.1")]
        host: String,

        #[arg(long, env = "WAYPOINT_PORT", default_value_t = 3000)]
        port: u16,

        #[arg(long, env = "WAYPOINT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,

        /// Deliver events to this URL instead of discarding them
        #[arg(long, env = "WAYPOINT_WEBHOOK_URL")]
        webhook_url: Option<String>,
    },

    /// Print the environment keys read by the demo services
    Sniff,
}

// ---------------------------------------------------------------------------
// Demo services
// ---------------------------------------------------------------------------

struct Settings {
    table: String,
}

struct UserStore {
    table: String,
    users: DashMap<u64, Value>,
    next_id: AtomicU64,
}

fn settings() -> ServiceDescriptor {
    ServiceDescriptor::new("settings", |ctx| async move {
        let table = ctx.get("USERS_TABLE").unwrap_or_else(|| "users".to_string());
        Ok(Settings { table })
    })
}

fn user_store() -> ServiceDescriptor {
    ServiceDescriptor::new("user_store", |ctx| async move {
        let settings = ctx.service::<Settings>("settings")?;
        info!(table = %settings.table, "user store ready");
        Ok(UserStore {
            table: settings.table.clone(),
            users: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    })
    .depends_on([settings()])
}

// ---------------------------------------------------------------------------
// Demo endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

fn user_shape() -> Shape {
    Shape::object([
        ("id", Shape::integer()),
        ("name", Shape::string()),
        ("email", Shape::Email),
    ])
}

fn endpoints() -> Vec<Arc<Endpoint>> {
    let create = Endpoint::post("/users")
        .describe("Create a user")
        .body(Shape::object([("name", Shape::string_min(1)), ("email", Shape::Email)]))
        .output(user_shape())
        .services([user_store()])
        .rate_limit(RateLimitPolicy::per_ip(60, Duration::from_secs(60)))
        .event(EventDeclaration::new("user.created", |ctx| {
            json!({"userId": ctx.response["id"], "email": ctx.response["email"]})
        }))
        .status(http::StatusCode::CREATED)
        .handle(|ctx| async move {
            let input: NewUser = ctx.body_as()?;
            let store = ctx.service::<UserStore>("user_store")?;
            let id = store.next_id.fetch_add(1, Ordering::Relaxed);
            let user = json!({"id": id, "name": input.name, "email": input.email});
            store.users.insert(id, user.clone());
            Ok(user)
        });

    let me = Endpoint::get("/users/me")
        .describe("Echo the caller's bearer token")
        .session(|ctx| async move {
            Ok(ctx.headers.bearer_token().map(|token| json!({"token": token})))
        })
        .authorize(|ctx| async move { Ok(ctx.session.is_some()) })
        .handle(|ctx| async move { Ok(ctx.session.unwrap_or(Value::Null)) });

    let fetch = Endpoint::get("/users/:id")
        .describe("Fetch a user by id")
        .params(Shape::object([("id", Shape::integer())]))
        .output(user_shape())
        .services([user_store()])
        .handle(|ctx| async move {
            #[derive(Deserialize)]
            struct Params {
                id: u64,
            }
            let Params { id } = ctx.params_as()?;
            let store = ctx.service::<UserStore>("user_store")?;
            let user = store
                .users
                .get(&id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| HttpError::not_found(format!("No user {id} in {}", store.table)))?;
            Ok(user)
        });

    vec![fetch, create, me]
}

fn all_services() -> Vec<ServiceDescriptor> {
    endpoints()
        .iter()
        .flat_map(|endpoint| endpoint.services().to_vec())
        .collect()
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

async fn serve(host: String, port: u16, webhook_url: Option<String>) -> anyhow::Result<()> {
    let registry = ServiceRegistry::new(Arc::new(Environment::from_process()));
    let mut pipeline = Pipeline::new(registry);
    if let Some(url) = webhook_url {
        info!(%url, "publishing events to webhook");
        pipeline = pipeline.with_publisher(WebhookPublisher::new(url, Duration::from_secs(5))?);
    }

    let config = NetworkConfig {
        host,
        port,
        ..NetworkConfig::default()
    };
    let mut module = NetworkModule::new(config, pipeline).with_endpoints(endpoints());
    let port = module.start().await?;
    info!(port, "waypoint-dev listening");

    module
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received");
        })
        .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            log_format,
            webhook_url,
        } => {
            init_tracing(log_format)?;
            serve(host, port, webhook_url).await
        }
        Commands::Sniff => {
            let report = ConfigSniffer::new().sniff(&all_services()).await;
            for key in &report.keys {
                println!("{key}");
            }
            for (service, error) in &report.failures {
                eprintln!("{service}: {error}");
            }
            Ok(())
        }
    }
}
