//! `GET /fallback-audio`: the cached apology clip, generated on first use.

use crate::state::AppState;
use actix_web::{http::header::ContentType, web, HttpResponse};
use tracing::{error, warn};

pub async fn fallback_audio(state: web::Data<AppState>) -> HttpResponse {
    let Some(path) = state.fallback.ensure().await else {
        warn!("Fallback audio requested but unavailable");
        return unavailable();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => HttpResponse::Ok()
            .insert_header(("content-type", "audio/mpeg"))
            .body(bytes),
        Err(e) => {
            error!(error = %e, path = %path.display(), "Could not read fallback audio");
            unavailable()
        }
    }
}

fn unavailable() -> HttpResponse {
    HttpResponse::InternalServerError()
        .content_type(ContentType::plaintext())
        .body("Fallback audio not available")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::orchestrator::tests::{FakeLlm, FakeStt, FakeTts};
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test as actix_test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_serves_generated_clip_and_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(FakeTts::default());
        let state = test_state(
            Arc::new(FakeStt::saying("")),
            Arc::new(FakeLlm::default()),
            tts.clone(),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/fallback-audio", web::get().to(fallback_audio)),
        )
        .await;

        for _ in 0..2 {
            let resp = actix_test::call_service(
                &app,
                actix_test::TestRequest::get().uri("/fallback-audio").to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.headers().get("content-type").unwrap(), "audio/mpeg");
            assert_eq!(actix_test::read_body(resp).await.as_ref(), b"ID3");
        }

        assert_eq!(tts.requests.lock().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_unavailable_clip_returns_plain_500() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            Arc::new(FakeStt::saying("")),
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTts {
                fail: true,
                ..Default::default()
            }),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/fallback-audio", web::get().to(fallback_audio)),
        )
        .await;

        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/fallback-audio").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(actix_test::read_body(resp).await.as_ref(), b"Fallback audio not available");
    }
}
