use crate::config::AppConfig;
use crate::drive::FileListingService;
use crate::error::AppError;
use crate::listing_clients::relay::RELAY_ROUTE;
use actix_web::error::JsonPayloadError;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchDriveFiles {
    folder_id: Option<String>,
    next_page_token: Option<String>,
}

/// Listing backend the relay forwards to; `None` when no key is configured.
pub struct RelayState {
    pub listing: Option<Arc<dyn FileListingService>>,
}

async fn fetch_drive_files(
    state: web::Data<RelayState>,
    body: web::Json<FetchDriveFiles>,
) -> Result<HttpResponse, AppError> {
    let listing = state
        .listing
        .as_ref()
        .ok_or_else(|| AppError::Listing("Google API Key is not defined".into()))?;

    let request = body.into_inner();
    let folder_id = request
        .folder_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("folderId is required".into()))?;
    log::debug!(
        "Relaying listing for folder {} (token {:?})",
        folder_id,
        request.next_page_token
    );

    let page = listing
        .list(&folder_id, request.next_page_token.as_deref())
        .await
        .map_err(|e| {
            log::error!("Error fetching drive files: {}", e);
            e.into_listing()
        })?;

    Ok(HttpResponse::Ok().json(page))
}

/// Answers unreadable bodies with the same `{"error"}` shape as every other failure.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::debug!("Rejected relay request body: {}", err);
    AppError::InvalidInput(format!("malformed request body: {}", err)).into()
}

async fn preflight() -> HttpResponse {
    HttpResponse::Ok().finish()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(format!("/{}", RELAY_ROUTE))
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .route(web::post().to(fetch_drive_files))
            .route(web::method(actix_web::http::Method::OPTIONS).to(preflight)),
    );
}

pub async fn start_relay_server(
    config: Arc<AppConfig>,
    listing: Option<Arc<dyn FileListingService>>,
) -> std::io::Result<()> {
    let port = config.web_port;
    if listing.is_none() {
        log::warn!("No Drive API key configured; every relay request will fail.");
    }
    let state = web::Data::new(RelayState { listing });

    log::info!("Starting relay server on port: {}", port);

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(format!("0.0.0.0:{}", port))?
        .run()
        .await
}
