//! Liveness and metrics endpoints.
//!
//! `health_check` is cheap: it never calls a provider. Credential presence is
//! reported from configuration only, and the fallback clip is reported as
//! cached or not without trying to generate it.

use crate::config::AppConfig;
use crate::services::configured_key;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let uptime_seconds = state.get_uptime_seconds();
    let session_count = state.sessions().session_count().await;
    let fallback_cached = state.fallback.is_cached().await;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_pipelines": metrics.active_pipelines,
            "pipeline_runs": metrics.pipeline_runs,
            "pipeline_failures": metrics.pipeline_failures
        },
        "sessions": {
            "count": session_count
        },
        "credentials": credential_status(config),
        "fallback_audio": {
            "cached": fallback_cached,
            "path": state.fallback.path().display().to_string()
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "pipelines": {
            "active": metrics.active_pipelines,
            "runs": metrics.pipeline_runs,
            "failures": metrics.pipeline_failures
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn credential_status(config: &AppConfig) -> serde_json::Value {
    json!({
        "transcription": configured_key(&config.transcription.api_key).is_some(),
        "generation": configured_key(&config.generation.api_key).is_some(),
        "synthesis": configured_key(&config.synthesis.api_key).is_some()
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let kb = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kb();
                } else if line.starts_with("VmSize:") {
                    vm_size = kb();
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::orchestrator::tests::{FakeLlm, FakeStt, FakeTts};
    use crate::conversation::history::Turn;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_sessions_and_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(FakeTts::default());
        let state = test_state(
            Arc::new(FakeStt::saying("")),
            Arc::new(FakeLlm::default()),
            tts.clone(),
            dir.path(),
        );
        state.sessions().append("a", vec![Turn::user("hi")]).await;

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"]["name"], "voice-relay-backend");
        assert_eq!(json["sessions"]["count"], 1);
        assert_eq!(json["credentials"]["synthesis"], false);
        assert_eq!(json["fallback_audio"]["cached"], false);
        // Health never triggers generation of the fallback clip.
        assert!(tts.requests.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_metrics_lists_recorded_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            Arc::new(FakeStt::saying("")),
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTts::default()),
            dir.path(),
        );
        state.increment_request_count();
        state.record_endpoint_request("GET /health", 4, false);
        state.increment_request_count();
        state.increment_error_count();
        state.record_endpoint_request("POST /agent/chat/{session_id}", 10, true);

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/metrics").to_request()).await;
        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["overall"]["total_requests"], 2);
        assert_eq!(json["overall"]["error_rate"], 0.5);
        assert_eq!(json["endpoints"][0]["endpoint"], "GET /health");
        assert_eq!(json["endpoints"][1]["error_rate"], 1.0);
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let mut config = AppConfig::default();
        config.generation.api_key = Some("  ".into());
        config.transcription.api_key = Some("abc".into());

        let status = credential_status(&config);
        assert_eq!(status["generation"], false);
        assert_eq!(status["transcription"], true);
    }
}
