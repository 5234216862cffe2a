use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use serde::Deserialize;

use crate::device::DeviceRegistry;
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::plugin::GpioPlugin;

pub struct AppState<B: GpioBackend, R: DeviceRegistry> {
    pub plugin: Arc<GpioPlugin<B, R>>,
}

impl<B: GpioBackend, R: DeviceRegistry> Clone for AppState<B, R> {
    fn clone(&self) -> Self {
        Self {
            plugin: Arc::clone(&self.plugin),
        }
    }
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
    #[serde(default)]
    level: i32,
}

impl<B: GpioBackend + 'static, R: DeviceRegistry + 'static> AppState<B, R> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/devices")
                    .route(web::get().to(list_devices::<B, R>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/device/{unit}")
                    .route(web::get().to(get_device::<B, R>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/device/{unit}/command")
                    .route(web::post().to(send_command::<B, R>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_devices<B: GpioBackend + 'static, R: DeviceRegistry + 'static>(
    state: web::Data<AppState<B, R>>,
) -> Result<impl Responder, AppError> {
    let devices = state.plugin.registry().devices();

    Ok(web::Json(devices))
}

async fn get_device<B: GpioBackend + 'static, R: DeviceRegistry + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B, R>>,
) -> Result<impl Responder, AppError> {
    let unit = parse_unit(&req)?;
    let device = state.plugin.device(unit)?;

    Ok(web::Json(device))
}

async fn send_command<B: GpioBackend + 'static, R: DeviceRegistry + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B, R>>,
) -> Result<HttpResponse, AppError> {
    let unit = parse_unit(&req)?;
    let payload = parse_command_payload(&body)?;

    let device = state
        .plugin
        .on_command(unit, &payload.command, payload.level)?;

    match device {
        Some(device) => Ok(HttpResponse::Ok().json(device)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

fn parse_unit(req: &HttpRequest) -> Result<u8, AppError> {
    let unit = req
        .match_info()
        .get("unit")
        .ok_or_else(|| AppError::InvalidValue("Missing unit".into()))?;
    let unit = unit
        .parse::<u8>()
        .map_err(|_| AppError::InvalidValue("Invalid unit".into()))?;

    Ok(unit)
}

fn parse_command_payload(body: &[u8]) -> Result<CommandPayload, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty command payload".into()));
    }

    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid command payload: {e}")))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
