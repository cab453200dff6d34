use std::convert::Infallible;
use std::sync::Arc;

use log::debug;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, AverageResponse, LogsResponse, RateResponse};
use crate::controller::Server;

fn with_server(
    server: Arc<Server>,
) -> impl Filter<Extract = (Arc<Server>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}

/// GET /rates
pub fn rates_route(
    server: Arc<Server>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("rates")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .map(|server: Arc<Server>| reply::json(&server.all_rates()))
}

/// GET /rates/:ip/:port
pub fn rate_route(
    server: Arc<Server>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("rates" / String / u16)
        .and(warp::get())
        .and(with_server(server))
        .map(|ip: String, port: u16, server: Arc<Server>| {
            let response = RateResponse::query(&server, &ip, port);
            let status = if response.found {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            reply::with_status(reply::json(&response), status)
        })
}

/// GET /devices
pub fn devices_route(
    server: Arc<Server>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("devices")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .map(|server: Arc<Server>| reply::json(&server.devices()))
}

/// GET /logs/:ip
pub fn logs_route(
    server: Arc<Server>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("logs" / String)
        .and(warp::get())
        .and(with_server(server))
        .map(|ip: String, server: Arc<Server>| reply::json(&LogsResponse::query(&server, &ip)))
}

/// GET /averages/:ip/:port
pub fn averages_route(
    server: Arc<Server>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("averages" / String / u16)
        .and(warp::get())
        .and(with_server(server))
        .map(|ip: String, port: u16, server: Arc<Server>| {
            let response = AverageResponse::query(&server, &ip, port);
            let status = if response.found {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            reply::with_status(reply::json(&response), status)
        })
}

/// Turns a rejected request (unknown path, malformed port, wrong method)
/// into a JSON [`ApiError`].
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "no such endpoint")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        (StatusCode::BAD_REQUEST, "bad request")
    };
    debug!("Rejected API request: {:?}", err);
    let body = ApiError {
        message: message.to_string(),
    };
    Ok(reply::with_status(reply::json(&body), status))
}

/// Every JSON endpoint.
pub fn api_routes(
    server: Arc<Server>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    rates_route(server.clone())
        .or(rate_route(server.clone()))
        .or(devices_route(server.clone()))
        .or(logs_route(server.clone()))
        .or(averages_route(server))
        .recover(handle_rejection)
}
