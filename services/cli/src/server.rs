use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_sandbox_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use roomhub::config::AppConfig;
use roomhub::error::AppError;
use roomhub::sandbox::SandboxBackend;
use roomhub::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Upload destinations must be absolute, so the origin comes from the
    // bound address rather than the requested one (port 0 is allowed).
    let origin = format!("http://{}", listener.local_addr()?);
    let backend = if args.empty {
        SandboxBackend::new(origin)
    } else {
        SandboxBackend::seeded(origin)
    };

    let app = with_sandbox_routes(Arc::new(backend))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    readiness_flag.store(true, Ordering::Release);
    info!(?config.environment, %addr, "rental sandbox ready");

    axum::serve(listener, app).await?;
    Ok(())
}
