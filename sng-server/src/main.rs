use std::path::Path;
use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use env_logger::Env;
use log::{info, warn};
use serde::Deserialize;

use sng_core::io::list_sessions;
use sng_core::{Session, SngError};

/// Directory holding the saved sessions.
const DATA_DIR: &str = "./data";

/// Upper bound of names generated by a single request.
const MAX_NAMES_PER_REQUEST: usize = 1000;

/// Query parameters of the `/v1/generate` endpoint, missing values
/// fall back to the loaded session configuration.
#[derive(Deserialize)]
struct GenerateParams {
	n: Option<usize>,
	temperature: Option<f64>,
	min_word_len: Option<usize>,
	max_word_len: Option<usize>,
}

#[derive(Deserialize)]
struct ModelQuery {
	name: Option<String>,
}

struct SharedData {
	session: Option<Session>,
	name: Option<String>,
}

/// Maps a library error to the matching HTTP response.
fn error_response(e: SngError) -> HttpResponse {
	match e {
		SngError::Config(_) | SngError::Shape(_) => HttpResponse::BadRequest().body(e.to_string()),
		SngError::NotFound(_) => HttpResponse::NotFound().body(e.to_string()),
		SngError::NotFitted => HttpResponse::Conflict().body(e.to_string()),
		_ => {
			warn!("{e}");
			HttpResponse::InternalServerError().body(e.to_string())
		}
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates `n` names (1 by default) with the loaded session.
/// Returns one name per line.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<Mutex<SharedData>>, query: web::Query<GenerateParams>) -> impl Responder {
	let n = query.n.unwrap_or(1);
	if n == 0 || n > MAX_NAMES_PER_REQUEST {
		return HttpResponse::BadRequest().body(format!("n must be between 1 and {MAX_NAMES_PER_REQUEST}"));
	}

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Session lock failed"),
	};
	let session = match shared_data.session.as_mut() {
		Some(session) => session,
		None => return HttpResponse::Conflict().body("No session loaded, use /v1/load_model first"),
	};

	let mut params = session.config().sampling_params();
	params.temperature = query.temperature.unwrap_or(params.temperature);
	params.min_word_len = query.min_word_len.unwrap_or(params.min_word_len);
	params.max_word_len = query.max_word_len.unwrap_or(params.max_word_len);

	match session.simulate_with(n, &params) {
		Ok(names) => HttpResponse::Ok().body(names.join("\n")),
		Err(e) => error_response(e),
	}
}

/// HTTP GET endpoint `/v1/models`
///
/// Lists the saved sessions available under the data directory.
#[get("/v1/models")]
async fn get_models() -> impl Responder {
	if !Path::new(DATA_DIR).is_dir() {
		return HttpResponse::Ok().body("");
	}
	match list_sessions(DATA_DIR) {
		Ok(names) => HttpResponse::Ok().body(names.join("\n")),
		Err(_) => HttpResponse::InternalServerError().body("Failed to list models"),
	}
}

#[get("/v1/loaded_model")]
async fn get_loaded_model(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Session lock failed"),
	};
	HttpResponse::Ok().body(shared_data.name.clone().unwrap_or_default())
}

/// HTTP PUT endpoint `/v1/load_model?name=`
///
/// Replaces the loaded session with `./data/<name>`. The previous
/// session stays loaded if the new one cannot be read.
#[put("/v1/load_model")]
async fn put_model(data: web::Data<Mutex<SharedData>>, query: web::Query<ModelQuery>) -> impl Responder {
	let name = match &query.name {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty model name"),
	};
	if name.contains(['/', '\\']) || name == "." || name == ".." {
		return HttpResponse::BadRequest().body("Model name must be a plain directory name");
	}

	let session = match Session::load(Path::new(DATA_DIR).join(name)) {
		Ok(session) => session,
		Err(e) => return error_response(e),
	};

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Session lock failed"),
	};
	shared_data.session = Some(session);
	shared_data.name = Some(name.to_owned());
	info!("session '{name}' loaded");

	HttpResponse::Ok().body("Model loaded successfully")
}

/// Main entry point for the server.
///
/// Starts with no session loaded and serves the name generator on
/// 127.0.0.1:5000, sessions are read from `./data`.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

	let shared_data = SharedData { session: None, name: None };
	let shared_session = web::Data::new(Mutex::new(shared_data));

	HttpServer::new(move || {
		App::new()
			.wrap(Logger::default())
			.wrap(Cors::permissive())
			.app_data(shared_session.clone())
			.service(get_generated)
			.service(get_models)
			.service(get_loaded_model)
			.service(put_model)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use actix_web::http::StatusCode;
	use actix_web::test;

	fn empty_state() -> web::Data<Mutex<SharedData>> {
		web::Data::new(Mutex::new(SharedData { session: None, name: None }))
	}

	#[actix_web::test]
	async fn generate_without_session_is_a_conflict() {
		let app = test::init_service(App::new().app_data(empty_state()).service(get_generated)).await;
		let req = test::TestRequest::get().uri("/v1/generate?n=3").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::CONFLICT);
	}

	#[actix_web::test]
	async fn generate_rejects_bad_counts() {
		let app = test::init_service(App::new().app_data(empty_state()).service(get_generated)).await;
		let req = test::TestRequest::get().uri("/v1/generate?n=0").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
	}

	#[actix_web::test]
	async fn load_rejects_paths() {
		let app = test::init_service(App::new().app_data(empty_state()).service(put_model)).await;
		for uri in ["/v1/load_model", "/v1/load_model?name=..", "/v1/load_model?name=a/b"] {
			let req = test::TestRequest::put().uri(uri).to_request();
			let resp = test::call_service(&app, req).await;
			assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
		}
	}

	#[actix_web::test]
	async fn no_model_loaded_at_start() {
		let app = test::init_service(App::new().app_data(empty_state()).service(get_loaded_model)).await;
		let req = test::TestRequest::get().uri("/v1/loaded_model").to_request();
		let body = test::call_and_read_body(&app, req).await;
		assert!(body.is_empty());
	}
}
