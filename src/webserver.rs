//! HTTP surface.
//!
//! An axum router over the three services. Handlers translate between the
//! JSON wire types in [`crate::protocol`] and the services, and map
//! [`VaultError`] onto status codes: malformed input and unknown
//! subscriptions are the caller's fault (400), everything else is ours
//! (500).

use crate::configs::{AppConfig, Mode};
use crate::error::VaultError;
use crate::import::X509ImportService;
use crate::pem_util::{parse_pem_blocks, parse_single_pem};
use crate::protocol::{
    BulkImportRequest, CertificatesAndKeysResponse, CreateSubscriptionRequest, ErrorBody,
    ImportBundleRequest, X509SubscriptionDto,
};
use crate::store::Store;
use crate::subscriptions::X509SubscriptionService;
use crate::updates::X509CertificateService;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

pub struct AppContext {
    pub import: X509ImportService,
    pub certificates: X509CertificateService,
    pub subscriptions: X509SubscriptionService,
}

impl AppContext {
    pub fn new(store: Arc<Store>) -> Self {
        AppContext {
            import: X509ImportService::new(Arc::clone(&store)),
            certificates: X509CertificateService::new(Arc::clone(&store)),
            subscriptions: X509SubscriptionService::new(store),
        }
    }
}

/// Run the HTTP listeners until the first one fails.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "pki-vault.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = match config.mode {
        Mode::Release => "pki_vault=info,axum=info",
        Mode::Debug => "pki_vault=debug,axum=info",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .init();

    info!("starting pki-vault server");

    let store = Arc::new(Store::connect(&config.dsn).await?);
    let app = build_router(Arc::new(AppContext::new(store)));

    let mut listeners = JoinSet::new();
    for address in &config.listen_addresses {
        let listener = TcpListener::bind(address).await?;
        info!("listening on {address}");
        let app = app.clone();
        listeners.spawn(async move { axum::serve(listener, app).await });
    }

    while let Some(finished) = listeners.join_next().await {
        finished??;
    }
    Ok(())
}

pub fn build_router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/x509/subscriptions", post(create_subscription))
        .route(
            "/x509/subscriptions/:id",
            axum::routing::delete(delete_subscription),
        )
        .route("/x509/certificate-updates", get(get_certificate_updates))
        .route("/x509/import", post(bulk_import))
        .route("/x509/import-bundle", post(import_bundle))
        .with_state(context)
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_subscription(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Json<X509SubscriptionDto>, ApiError> {
    let subscription = context
        .subscriptions
        .create(request.subject_alt_names, request.include_private_key)
        .await?;
    Ok(Json(X509SubscriptionDto::from(&subscription)))
}

async fn delete_subscription(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let rows_deleted = context.subscriptions.delete(id).await?;
    if rows_deleted == 0 {
        return Err(ApiError::not_found("subscription does not exist"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct UpdatesParams {
    subscriptions: String,
    after: DateTime<Utc>,
}

async fn get_certificate_updates(
    State(context): State<Arc<AppContext>>,
    Query(params): Query<UpdatesParams>,
) -> Result<Json<CertificatesAndKeysResponse>, ApiError> {
    let sub_ids = parse_subscription_ids(&params.subscriptions)?;
    let (certs, keys) = context
        .certificates
        .get_updates(&sub_ids, params.after, true)
        .await?;
    Ok(Json(CertificatesAndKeysResponse::new(&certs, &keys)))
}

async fn bulk_import(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<BulkImportRequest>,
) -> Result<(StatusCode, Json<CertificatesAndKeysResponse>), ApiError> {
    let mut cert_blocks = Vec::with_capacity(request.certificates.len());
    for cert in &request.certificates {
        cert_blocks.push(parse_single_pem(cert)?);
    }
    let mut key_blocks = Vec::with_capacity(request.private_keys.len());
    for key in &request.private_keys {
        key_blocks.push(parse_single_pem(key)?);
    }

    let (certs, keys) = context.import.import(&cert_blocks, &key_blocks).await?;
    Ok((
        StatusCode::CREATED,
        Json(CertificatesAndKeysResponse::new(&certs, &keys)),
    ))
}

async fn import_bundle(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<ImportBundleRequest>,
) -> Result<(StatusCode, Json<CertificatesAndKeysResponse>), ApiError> {
    let mut cert_blocks = vec![parse_single_pem(&request.certificate)?];
    cert_blocks.extend(parse_pem_blocks(&request.chain)?);

    let mut key_blocks = Vec::new();
    if let Some(private_key) = &request.private_key {
        key_blocks.push(parse_single_pem(private_key)?);
    }

    let (certs, keys) = context.import.import(&cert_blocks, &key_blocks).await?;
    Ok((
        StatusCode::CREATED,
        Json(CertificatesAndKeysResponse::new(&certs, &keys)),
    ))
}

fn parse_subscription_ids(input: &str) -> Result<Vec<Uuid>, ApiError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            Uuid::parse_str(part).map_err(|_| {
                ApiError::bad_request(format!("invalid subscription id: {part}"))
            })
        })
        .collect()
}

// ============================================================================
// Error mapping
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail_message: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            detail_message: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            detail_message: None,
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidPem(_)
            | VaultError::InvalidKey(_)
            | VaultError::InvalidCertificate(_)
            | VaultError::InvalidSubscription(_) => {
                debug!("rejected request: {err}");
                ApiError::bad_request(err.to_string())
            }
            VaultError::UnknownSubscriptions(ids) => {
                debug!("rejected request: unknown subscriptions");
                ApiError {
                    status: StatusCode::BAD_REQUEST,
                    message: "one or more certificate subscriptions don't exist".to_string(),
                    detail_message: Some(format!(
                        "missing certificate subscriptions: {}",
                        ids.iter()
                            .map(Uuid::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                }
            }
            other => {
                error!("request failed: {other}");
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                    detail_message: None,
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.status.as_u16(),
            message: self.message,
            detail_message: self.detail_message,
        };
        (self.status, Json(body)).into_response()
    }
}
