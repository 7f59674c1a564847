use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{Partitioning, TermId, WordsBatch};
use crate::error::IndexError;
use crate::index::MaintenanceTicket;
use crate::query::SearchResults;
use crate::service::{DomainSearchRequest, IndexService, SearchRequest, ServiceStatus};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct StagedResponse {
    pub batch_id: u64,
    pub documents: usize,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub term: String,
    pub term_id: TermId,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct BlockedResponse {
    pub blocked: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct AbortResponse {
    pub aborted: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// `IndexError` → HTTP 状态码
pub struct ApiError(IndexError);

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IndexError::Busy(_) => StatusCode::CONFLICT,
            IndexError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::InvalidPartitioning(_) => StatusCode::BAD_REQUEST,
            e if e.is_invariant_violation() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub struct IndexServer {
    pub service: Arc<IndexService>,
}

impl IndexServer {
    pub fn new(service: Arc<IndexService>) -> Self {
        Self { service }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/words", put(put_words_handler))
            .route("/search", post(search_handler))
            .route("/search-domain", post(search_domain_handler))
            .route("/dictionary/:term", get(dictionary_handler))
            .route("/ops/reindex", post(reindex_handler))
            .route("/ops/repartition", post(repartition_handler))
            .route("/ops/abort", post(abort_handler))
            .route("/is-blocked", get(is_blocked_handler))
            .route("/status", get(status_handler))
            .with_state(self.service.clone())
    }

    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let app = self.router();
        tracing::info!("HTTP Index Server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }

    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        self.serve(listener).await
    }
}

async fn put_words_handler(
    State(service): State<Arc<IndexService>>,
    Json(batch): Json<WordsBatch>,
) -> Result<Json<StagedResponse>, ApiError> {
    let resp = StagedResponse {
        batch_id: batch.batch_id,
        documents: batch.len(),
    };
    service.put_words(batch)?;
    Ok(Json(resp))
}

async fn search_handler(
    State(service): State<Arc<IndexService>>,
    Json(req): Json<SearchRequest>,
) -> Json<SearchResults> {
    Json(service.search(&req.terms, req.options.as_ref()))
}

async fn search_domain_handler(
    State(service): State<Arc<IndexService>>,
    Json(req): Json<DomainSearchRequest>,
) -> Json<SearchResults> {
    Json(service.search_domain(&req.terms, req.domain, req.options.as_ref()))
}

async fn dictionary_handler(
    State(service): State<Arc<IndexService>>,
    Path(term): Path<String>,
) -> Result<Json<DictionaryEntry>, StatusCode> {
    match service.term_id(&term) {
        Some(term_id) => Ok(Json(DictionaryEntry { term, term_id })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn reindex_handler(
    State(service): State<Arc<IndexService>>,
) -> Result<(StatusCode, Json<MaintenanceTicket>), ApiError> {
    let ticket = service.reindex()?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

async fn repartition_handler(
    State(service): State<Arc<IndexService>>,
    Json(partitioning): Json<Partitioning>,
) -> Result<(StatusCode, Json<MaintenanceTicket>), ApiError> {
    let ticket = service.repartition(partitioning)?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

async fn abort_handler(State(service): State<Arc<IndexService>>) -> Json<AbortResponse> {
    Json(AbortResponse {
        aborted: service.control().request_abort(),
    })
}

async fn is_blocked_handler(State(service): State<Arc<IndexService>>) -> Json<BlockedResponse> {
    Json(BlockedResponse {
        blocked: service.is_blocked(),
    })
}

async fn status_handler(State(service): State<Arc<IndexService>>) -> Json<ServiceStatus> {
    Json(service.status())
}
