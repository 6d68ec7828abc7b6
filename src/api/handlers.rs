// HTTP request handlers for API endpoints

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use crate::api::auth::{AuthState, SESSION_TTL_SECS};
use crate::api::error::ApiResult;
use crate::api::models::*;
use crate::catalog::models::SyncStatus;
use crate::catalog::{self, search::SearchParams, Db};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::queue::{JobPayload, Priority, SyncJob, SyncQueues};
use crate::sync::progress;
use crate::sync::state::{library_locked, SyncState};

pub struct AppState {
    pub db: Db,
    pub queues: SyncQueues,
    pub config: AppConfig,
}

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let db_status = match sqlx::query_scalar::<_, bool>("SELECT true")
        .fetch_one(&state.db.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "database": db_status,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

// ---------------- auth ----------------

pub async fn login(
    auth: web::Data<Arc<AuthState>>,
    payload: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    if !auth.enabled() {
        return Err(AppError::conflict("AUTH_DISABLED", "authentication is disabled").into());
    }
    match auth.login(&payload.email, &payload.password) {
        Some(token) => Ok(HttpResponse::Ok().json(LoginResponse {
            token,
            expires_in_secs: SESSION_TTL_SECS,
        })),
        None => Err(AppError::Auth {
            message: "invalid credentials".into(),
        }
        .into()),
    }
}

// ---------------- platforms ----------------

pub async fn list_platforms(
    state: web::Data<AppState>,
    query: web::Query<PlatformsQuery>,
) -> ApiResult<HttpResponse> {
    let platforms = catalog::platforms::list_platforms(&state.db, query.enabled).await?;
    Ok(HttpResponse::Ok().json(platforms))
}

// ---------------- libraries ----------------

pub async fn list_libraries(
    state: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let (items, total) = catalog::libraries::list_libraries(&state.db, query.page, query.limit).await?;
    Ok(HttpResponse::Ok().json(Paginated::new(items, query.page.max(1), query.limit.clamp(1, 200), total)))
}

pub async fn create_library(
    state: web::Data<AppState>,
    payload: web::Json<CreateLibraryRequest>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    if payload.user_identifier.trim().is_empty() {
        return Err(
            AppError::validation("user_identifier must not be empty", vec!["user_identifier".into()])
                .into(),
        );
    }
    if payload.display_name.trim().is_empty() {
        return Err(
            AppError::validation("display_name must not be empty", vec!["display_name".into()])
                .into(),
        );
    }
    let platform = catalog::platforms::get_platform(&state.db, payload.platform_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("platform {}", payload.platform_id)))?;

    let library = catalog::libraries::create_library(
        &state.db,
        catalog::libraries::NewLibrary {
            platform_id: platform.platform_id,
            user_identifier: payload.user_identifier.trim().to_string(),
            display_name: payload.display_name.trim().to_string(),
            credentials: payload.credentials,
        },
    )
    .await?;
    Ok(HttpResponse::Created().json(library))
}

pub async fn get_library(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let library = catalog::libraries::get_library(&state.db, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(library))
}

pub async fn update_library(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    payload: web::Json<UpdateLibraryRequest>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let library = catalog::libraries::update_library(
        &state.db,
        path.into_inner(),
        catalog::libraries::LibraryPatch {
            display_name: payload.display_name,
            credentials: payload.credentials,
            sync_enabled: payload.sync_enabled,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(library))
}

pub async fn delete_library(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    catalog::libraries::delete_library(&state.db, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- sync ----------------

pub async fn trigger_sync(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    payload: web::Json<SyncRequest>,
) -> ApiResult<HttpResponse> {
    let library_id = path.into_inner();
    let library = catalog::libraries::get_library(&state.db, library_id).await?;
    let platform = catalog::platforms::get_platform(&state.db, library.platform_id)
        .await?
        .ok_or_else(|| AppError::not_found("platform"))?;

    if !library.sync_enabled {
        return Err(
            AppError::validation("library sync is disabled", vec!["sync_enabled".into()]).into(),
        );
    }
    if !platform.api_available {
        return Err(AppError::conflict(
            "PLATFORM_NOT_AVAILABLE",
            format!("platform '{}' has no live adapter", platform.platform_code),
        )
        .into());
    }
    let sync_type = payload
        .operation_type()
        .map_err(|bad| AppError::validation(format!("unknown sync_type '{bad}'"), vec!["sync_type".into()]))?;

    if library_locked(&state.db, library_id).await? {
        if !payload.force {
            let details = match catalog::sync_ops::running_operation(&state.db, library_id).await? {
                Some(op) => json!({"operation_id": op.operation_id}),
                None => json!({}),
            };
            return Err(AppError::conflict_with(
                "SYNC_ALREADY_IN_PROGRESS",
                "a sync is already running for this library",
                details,
            )
            .into());
        }
        // force releases the running sync's lock; the worker cancels at its
        // next pause check and the new job takes over.
        SyncState::force_release_lock(&state.db, library_id).await?;
    }

    let priority = match sync_type {
        crate::catalog::models::OperationType::ManualSync => Priority::High,
        _ => Priority::Default,
    };
    let job = SyncJob::new(library_id, payload.force, sync_type);
    let job_id = job.job_id;
    state
        .queues
        .enqueue(priority, &JobPayload::Sync(job), 0)
        .await?;
    catalog::libraries::set_sync_status(&state.db, library_id, SyncStatus::Queued, None).await?;

    Ok(HttpResponse::Accepted().json(SyncAccepted {
        library_id,
        job_id,
        status: SyncStatus::Queued,
        queue: priority.queue_name(),
        message: format!("sync queued for {}", library.display_name),
        enqueued_at: chrono::Utc::now(),
    }))
}

pub async fn sync_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let library_id = path.into_inner();
    let library = catalog::libraries::get_library(&state.db, library_id).await?;

    if let Some(snapshot) = progress::latest_snapshot(&state.db, library_id).await? {
        return Ok(HttpResponse::Ok().json(snapshot));
    }
    // No live snapshot; fall back to the mirrored library fields.
    Ok(HttpResponse::Ok().json(SyncStatusFallback {
        library_id,
        status: library.sync_status,
        error: library.sync_error,
        last_sync_at: library.last_sync_at,
    }))
}

pub async fn cancel_sync(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let library_id = path.into_inner();
    catalog::libraries::get_library(&state.db, library_id).await?;

    if !SyncState::force_release_lock(&state.db, library_id).await? {
        return Err(AppError::conflict(
            "NO_SYNC_IN_PROGRESS",
            "no sync is currently running for this library",
        )
        .into());
    }
    Ok(HttpResponse::Accepted().json(CancelAccepted {
        library_id,
        message: "cancellation requested; the worker stops at the next batch boundary".into(),
    }))
}

// ---------------- games ----------------

pub async fn list_games(
    state: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let (items, total) = catalog::games::list_games(&state.db, query.page, query.limit).await?;
    Ok(HttpResponse::Ok().json(Paginated::new(items, query.page.max(1), query.limit.clamp(1, 200), total)))
}

pub async fn search_games(
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let statuses = query
        .parse_statuses()
        .map_err(|bad| AppError::validation(format!("unknown status '{bad}'"), vec!["statuses".into()]))?;
    if let (Some(min), Some(max)) = (query.min_metacritic, query.max_metacritic) {
        if min > max {
            return Err(AppError::validation(
                "min_metacritic must not exceed max_metacritic",
                vec!["min_metacritic".into(), "max_metacritic".into()],
            )
            .into());
        }
    }
    let params = SearchParams {
        query: query.q.clone(),
        platforms: SearchQuery::split_csv(&query.platforms),
        statuses,
        genres: SearchQuery::split_csv(&query.genres),
        min_metacritic: query.min_metacritic,
        max_metacritic: query.max_metacritic,
        owned_only: query.owned_only,
        library_id: query.library_id,
        page: query.page,
        limit: query.limit,
    };
    let results = catalog::search::search_games(&state.db, &params).await?;
    Ok(HttpResponse::Ok().json(results))
}

pub async fn get_game(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<GameDetailQuery>,
) -> ApiResult<HttpResponse> {
    let details = catalog::games::get_game(&state.db, path.into_inner(), query.library_id).await?;
    Ok(HttpResponse::Ok().json(details))
}
