use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::Pool;
use eyre::WrapErr;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod briefing;
pub mod clustering;
pub mod config;
pub mod error;
pub mod json;
pub mod llm;
pub mod models;
pub mod schema;

use clustering::semantic::SemanticSearchClient;
use config::ServerConfig;
use llm::LlmRegistry;

/// How often the cross-user briefing sweep ticks. The sweep lock makes
/// overlapping processes safe, so this only bounds scheduling latency.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct App {
    pub config: Arc<ServerConfig>,
    pub diesel: Pool<AsyncPgConnection>,
    pub redis: ConnectionManager,
    pub redis_client: redis::Client,
    pub http: reqwest::Client,
    pub llm: Arc<LlmRegistry>,
    pub semantic: Option<Arc<SemanticSearchClient>>,
    /// Briefing lifecycle events bridged in from Redis pub/sub.
    pub events: tokio::sync::broadcast::Sender<String>,
}

/// Render one Prometheus-style text line: `name{label="value",…} N`.
pub fn metrics_line(name: &str, labels: &[(&str, &str)], value: impl Display) -> String {
    let labels: Vec<String> = labels
        .iter()
        .map(|(key, val)| format!(r#"{key}="{val}""#))
        .collect();
    format!("{name}{{{}}} {value}", labels.join(","))
}

pub async fn run() -> Result<(), eyre::Error> {
    let config = Arc::new(ServerConfig::new_from_env());

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
    let diesel = Pool::builder(manager)
        .max_size(10)
        .build()
        .wrap_err("couldn't build database pool")?;

    let redis_client =
        redis::Client::open(config.redis_url.as_str()).wrap_err("invalid redis url")?;
    let redis = ConnectionManager::new(redis_client.clone())
        .await
        .wrap_err("couldn't connect to redis")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .wrap_err("couldn't build http client")?;

    let llm = Arc::new(LlmRegistry::from_config(&config, http.clone()));
    let semantic = config
        .semantic_search
        .as_ref()
        .map(|cfg| Arc::new(SemanticSearchClient::new(http.clone(), cfg)));

    let (events, _) = tokio::sync::broadcast::channel(256);

    let app = App {
        config: config.clone(),
        diesel,
        redis,
        redis_client,
        http,
        llm,
        semantic,
        events,
    };

    start_event_bridge(app.clone());
    start_briefing_sweep(app.clone());

    let router = Router::new()
        .merge(briefing::route())
        .merge(clustering::route())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err("couldn't bind listener")?;
    axum::serve(listener, router)
        .await
        .wrap_err("server exited")?;
    Ok(())
}

/// Periodically sweep for users whose briefing is due.
fn start_briefing_sweep(ctx: App) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(err) = briefing::tasks::generate_briefings(&ctx).await {
                tracing::warn!(?err, "briefing sweep failed");
            }
        }
    });
}

/// Forward briefing pub/sub events into the in-process broadcast channel
/// backing the SSE route. Reconnects with a delay on any subscription error.
fn start_event_bridge(ctx: App) {
    tokio::spawn(async move {
        loop {
            match ctx.redis_client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(err) = pubsub.subscribe(briefing::tasks::EVENTS_CHANNEL).await {
                        tracing::warn!(?err, "failed to subscribe to briefing events");
                    } else {
                        let mut messages = pubsub.on_message();
                        while let Some(message) = messages.next().await {
                            let Ok(payload) = message.get_payload::<String>() else {
                                continue;
                            };
                            let payload = payload
                                .strip_prefix("briefing:")
                                .unwrap_or(&payload)
                                .to_string();
                            let _ = ctx.events.send(payload);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, "briefing event bridge disconnected");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_lines_render_labels() {
        let line = metrics_line(
            "clustering",
            &[("metric", "clusters_found"), ("period", "daily")],
            42,
        );
        assert_eq!(
            line,
            r#"clustering{metric="clusters_found",period="daily"} 42"#
        );
    }
}
