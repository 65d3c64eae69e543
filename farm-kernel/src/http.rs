/**
 * API HTTP FARM - Surface web du coordinateur
 *
 * RÔLE :
 * Expose l'état de la ferme au dashboard et aux scripts opérateur.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, réponses JSON
 * - Routes : /status (agrégat), /miner?id= (snapshot), /command?id=&cmd= (start/stop),
 *   /pending (jobs en vol)
 * - `/` redirige vers le dashboard; toute page `*.html` est servie depuis le
 *   répertoire HTML configuré
 * - Erreurs : 400 (worker ou commande inconnus), 500 (commande échouée), 404 sinon
 */

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::registry::{DispatchError, FleetCommand, FleetRegistry};

pub const DASHBOARD_LOCATION: &str = "/dashboard.html?refresh=10000";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FleetRegistry>,
    pub html_dir: Arc<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct MinerParams {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandParams {
    id: Option<String>,
    cmd: Option<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_redirect))
        .route("/status", get(get_status))
        .route("/miner", get(get_miner))
        .route("/command", get(run_command))
        .route("/pending", get(get_pending))
        .fallback(serve_html)
        .with_state(app_state)
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// GET / → dashboard
async fn dashboard_redirect() -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, DASHBOARD_LOCATION)]).into_response()
}

// GET /status (agrégat de la ferme)
async fn get_status(State(app): State<AppState>) -> Response {
    Json(app.registry.get_aggregate_statistics()).into_response()
}

// GET /miner?id= (snapshot d'un worker)
async fn get_miner(State(app): State<AppState>, Query(params): Query<MinerParams>) -> Response {
    let Some(id) = params.id.filter(|id| app.registry.get_worker(id).is_some()) else {
        return bad_request("Miner not found");
    };
    Json(app.registry.get_statistics(&id)).into_response()
}

// GET /command?id=&cmd=start|stop
async fn run_command(State(app): State<AppState>, Query(params): Query<CommandParams>) -> Response {
    let Some(id) = params.id.filter(|id| app.registry.get_worker(id).is_some()) else {
        return bad_request("Miner not found");
    };
    let Some(command) = params.cmd.and_then(|cmd| cmd.parse::<FleetCommand>().ok()) else {
        return bad_request("Command not found");
    };

    match app.registry.dispatch_command(&id, command).await {
        Ok(true) => Json(json!({ "id": id, "command": command.to_string(), "success": true })).into_response(),
        Ok(false) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "id": id, "command": command.to_string(), "success": false })),
        )
            .into_response(),
        Err(DispatchError::UnknownWorker(_)) => bad_request("Miner not found"),
        Err(DispatchError::UnknownCommand(_)) => bad_request("Command not found"),
        Err(e) => {
            error!("[{}] Command {} failed: {}", id, command, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

// GET /pending (ids en cours de rafraîchissement)
async fn get_pending(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.registry.get_pending_ids())
}

/// Chemin relatif sûr dans le répertoire HTML (pas de `..`, pas de racine)
fn html_path(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let relative = Path::new(uri_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

// Fallback : pages *.html du dashboard, 404 sinon
async fn serve_html(State(app): State<AppState>, request: Request) -> Response {
    let uri_path = request.uri().path();
    if !uri_path.to_ascii_lowercase().ends_with(".html") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(path) = html_path(&app.html_dir, uri_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            info!("Serving HTML page {}", path.display());
            (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                Body::from(bytes),
            )
                .into_response()
        }
        Err(_) => {
            info!("HTML file {} not found", uri_path);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
