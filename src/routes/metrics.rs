use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — render the recorder's snapshot in Prometheus text
/// exposition format, with the content type Prometheus scrapers expect.
pub async fn prometheus_metrics(
    State(handle): State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn scrape_response_carries_text_exposition_content_type() {
        let handle = Arc::new(PrometheusBuilder::new().build_recorder().handle());
        let response = prometheus_metrics(State(handle)).await.into_response();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("content type header");
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }
}
