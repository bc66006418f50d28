//! syshook server: hosts the command service on a socket and over HTTP
//!
//! ## Endpoints
//!
//! GET /health - Liveness
//! POST /api/v1/commands - Raw protocol request, protocol response
//! GET /api/v1/hooks - hooks-info
//! GET /api/v1/callbacks - current-callbacks
//! POST /api/v1/state - change-state with {"source": "..."}
//! DELETE /api/v1/callbacks - unregister-callbacks, all of them

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use clap::Parser;
use log::{error, info};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use syshook::command::protocol::{ChangeStatePayload, UnregisterPayload};
use syshook::{CommandRegistry, Endpoint, Listener, Request, Response, Result, StartupConfig};

const DEFAULT_SOCKET: &str = "unix:/tmp/syshook.sock";

#[derive(Parser, Debug)]
#[command(name = "syshook-server")]
#[command(version, about = "Host the syshook command service", long_about = None)]
struct Args {
    /// Startup configuration file
    #[arg(short, long, value_name = "FILE", env = "SYSHOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Command socket (unix:<path>, <path> or <host>:<port>)
    #[arg(short, long, value_name = "ADDR", env = "SYSHOOK_SOCKET")]
    socket: Option<String>,

    /// HTTP gateway bind address
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
    http: String,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let (state, endpoint) = setup(&args).map_err(|e| {
        error!("Startup failed: {}", e);
        std::io::Error::other(e)
    })?;

    let listener = Listener::bind(&endpoint).map_err(std::io::Error::other)?;
    let _socket_thread = listener.spawn(Arc::clone(&state.commands));

    info!("HTTP gateway starting on http://{}", args.http);

    let state = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api/v1")
                    .route("/commands", web::post().to(post_command))
                    .route("/hooks", web::get().to(list_hooks))
                    .route("/callbacks", web::get().to(list_callbacks))
                    .route("/callbacks", web::delete().to(delete_callbacks))
                    .route("/state", web::post().to(change_state)),
            )
    })
    .bind(args.http.as_str())?
    .run()
    .await
}

fn setup(args: &Args) -> Result<(AppState, Endpoint)> {
    let config = match &args.config {
        Some(path) => StartupConfig::load(path)?,
        None => StartupConfig::default(),
    };
    let endpoint = match &args.socket {
        Some(socket) => socket.parse::<Endpoint>()?,
        None => match config.endpoint()? {
            Some(endpoint) => endpoint,
            None => DEFAULT_SOCKET.parse::<Endpoint>()?,
        },
    };
    let engine = Arc::new(config.build_engine()?);
    let commands = CommandRegistry::with_builtins(engine)?;
    Ok((AppState::new(commands), endpoint))
}

// ============ Application State ============

pub struct AppState {
    commands: Arc<CommandRegistry>,
}

impl AppState {
    fn new(commands: CommandRegistry) -> Self {
        Self {
            commands: Arc::new(commands),
        }
    }
}

// ============ Handlers ============

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "syshook",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Run a request on a blocking thread; engine calls may wait on the VM lock
async fn run(state: web::Data<AppState>, request: std::result::Result<Request, Response>) -> HttpResponse {
    let request = match request {
        Ok(request) => request,
        Err(response) => return HttpResponse::BadRequest().json(response),
    };
    let commands = Arc::clone(&state.commands);
    match web::block(move || commands.dispatch(&request)).await {
        Ok(response) if response.is_ok() => HttpResponse::Ok().json(response),
        Ok(response) => HttpResponse::BadRequest().json(response),
        Err(e) => HttpResponse::InternalServerError().json(Response::error(e.to_string())),
    }
}

/// Raw protocol request
async fn post_command(body: web::Json<Value>, state: web::Data<AppState>) -> impl Responder {
    let request = serde_json::from_value::<Request>(body.into_inner())
        .map_err(|e| Response::error(format!("Protocol error: malformed request: {}", e)));
    run(state, request).await
}

async fn list_hooks(state: web::Data<AppState>) -> impl Responder {
    run(state, Ok(Request::hooks_info())).await
}

async fn list_callbacks(state: web::Data<AppState>) -> impl Responder {
    run(state, Ok(Request::current_callbacks())).await
}

async fn change_state(body: web::Json<ChangeStatePayload>, state: web::Data<AppState>) -> impl Responder {
    run(state, Request::change_state(&body.source).map_err(Response::from)).await
}

async fn delete_callbacks(state: web::Data<AppState>) -> impl Responder {
    run(state, Request::unregister(&UnregisterPayload::all()).map_err(Response::from)).await
}
