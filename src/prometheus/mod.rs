use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics::METRICS_COUNTER;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;

pub mod metrics;

pub struct Exporter {
    listen: String,
}

impl Exporter {
    pub fn new(listen: &str) -> Self {
        Self {
            listen: listen.to_string(),
        }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let app = Router::new().route("/metrics", get(Exporter::metrics));
        let listener = TcpListener::bind(&self.listen).await?;
        axum::serve(listener, app).await
    }

    async fn metrics() -> Response {
        METRICS_COUNTER.inc();

        let mut buffer = Vec::new();
        let metric_families = prometheus::gather();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }

        (
            StatusCode::OK,
            [(CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response()
    }
}
