use actix_web::{web, HttpRequest, HttpResponse};

use crate::{models::VoterId, AppData};

macro_rules! unwrap_or_log_and_internal_server_error_response {
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                log::error!("{}", e);
                // Message is public to the whole crate, so prepending it with "crate::models::"
                // should not be required
                return Ok(HttpResponse::InternalServerError().json(Message($message)));
            }
        }
    };
}

pub mod choice;
pub mod draft;
pub mod poll;
pub mod vote;

/// Header the auth layer in front of us uses to pass the voter identity.
pub const VOTER_HEADER: &str = "X-Voter-Id";

/// The voter behind a request: the auth header if present, otherwise the peer address.
pub(crate) fn voter_id(request: &HttpRequest) -> Option<VoterId> {
    let from_header = request
        .headers()
        .get(VOTER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match from_header {
        Some(voter) => Some(VoterId::new(voter)),
        None => request
            .peer_addr()
            .map(|addr| VoterId::new(addr.ip().to_string())),
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiIndexResponseData {
    polls: String,
    poll_drafts: String,
}

async fn get_api_index(app_data: web::Data<AppData>) -> HttpResponse {
    HttpResponse::Ok().json(ApiIndexResponseData {
        polls: format!("{}/polls", app_data.public_url),
        poll_drafts: format!("{}/poll-drafts", app_data.public_url),
    })
}

/// Mounts every route under `api_prefix`, which must end with a slash.
pub fn configure_app(config: &mut web::ServiceConfig, api_prefix: &str) {
    config
        .route(api_prefix, web::get().to(get_api_index))
        .service(
            web::scope(&format!("{}polls", api_prefix))
                .configure(poll::configure_routes)
                .configure(choice::configure_routes)
                .configure(vote::configure_routes),
        )
        .service(
            web::scope(&format!("{}poll-drafts", api_prefix)).configure(draft::configure_routes),
        );
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use actix_web::web;

    use crate::engine::{EnginePolicy, VotingEngine};
    use crate::form::IncrementalFormBuilder;
    use crate::store::MemoryPollStore;
    use crate::AppData;

    pub(crate) fn app_data() -> web::Data<AppData> {
        web::Data::new(AppData {
            engine: VotingEngine::new(Arc::new(MemoryPollStore::new()), EnginePolicy::default()),
            forms: IncrementalFormBuilder::default(),
            public_url: "http://polls.test".to_string(),
        })
    }

    /// Builds the full application around `app_data`.
    macro_rules! test_app {
        ($app_data:expr) => {
            actix_web::test::init_service(
                actix_web::App::new()
                    .app_data($app_data.clone())
                    .wrap(actix_web::middleware::NormalizePath::new(
                        actix_web::middleware::TrailingSlash::Trim,
                    ))
                    .configure(|config| crate::routes::configure_app(config, "/")),
            )
            .await
        };
    }

    pub(crate) use test_app;
}
