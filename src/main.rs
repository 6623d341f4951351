use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rocket::{routes, serde::json::Json, Build, Rocket, State};
use serde::Serialize;
use tracing::info;

mod config;
use config::RelayConfig;

mod mailerlite;
use mailerlite::{MailerliteClient, SubscriberSync};

mod webhooks;
use webhooks::{memberpress_webhook, ErrorDetail, WebhookSecret};

#[derive(Parser)]
#[command(version, about = "MemberPress to MailerLite webhook relay")]
struct Opts {
    /// Environment file to load before reading the configuration
    #[arg(short, long)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    version: &'static str,
}

#[rocket::get("/")]
fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "memberlite",
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    mailerlite_configured: bool,
}

#[rocket::get("/health")]
fn health(config: &State<RelayConfig>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        mailerlite_configured: config.mailerlite_configured(),
    })
}

#[rocket::catch(400)]
fn bad_request() -> Json<ErrorDetail> {
    Json(ErrorDetail::new("Malformed webhook payload"))
}

#[rocket::catch(422)]
fn unprocessable_entity() -> Json<ErrorDetail> {
    Json(ErrorDetail::new("Webhook payload failed validation"))
}

fn rocket(config: RelayConfig, sync: Box<dyn SubscriberSync>) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.host.clone()))
        .merge(("port", config.port));

    rocket::custom(figment)
        .mount("/", routes![root, health, memberpress_webhook])
        .register("/", rocket::catchers![bad_request, unprocessable_entity])
        .manage(WebhookSecret(config.webhook_secret.clone()))
        .manage(config)
        .manage(sync)
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    match &opts.env_file {
        Some(path) => dotenvy::from_path(path)
            .with_context(|| format!("couldn't load {}", path.display()))?,
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let config = RelayConfig::from_env().context("invalid configuration")?;

    info!("starting memberlite relay");
    info!(
        "MailerLite API configured: {}",
        if config.mailerlite_configured() {
            "yes"
        } else {
            "no"
        }
    );
    info!(
        "active group id: {}",
        config.active_group_id.as_deref().unwrap_or("not set")
    );
    info!(
        "cancelled group id: {}",
        config.cancelled_group_id.as_deref().unwrap_or("not set")
    );

    let client = MailerliteClient::new(&config).context("failed to create MailerLite client")?;

    rocket(config, Box::new(client))
        .launch()
        .await
        .map_err(|err| anyhow::anyhow!(err))?;

    Ok(())
}
