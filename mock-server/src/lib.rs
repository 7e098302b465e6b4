//! Stand-in for the upstream marketplace API, used by integration tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Domain used on every cookie the mock API sets.
pub const COOKIE_DOMAIN: &str = "api.example.com";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub mint: String,
    pub name: String,
    pub collection: String,
    pub price: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub mint: String,
    pub price: f64,
    pub buyer: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateOffer {
    pub price: Option<f64>,
    pub buyer: Option<String>,
}

#[derive(Deserialize)]
pub struct ListingFilter {
    pub collection: Option<String>,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

#[derive(Default)]
pub struct Market {
    pub listings: HashMap<String, Listing>,
    pub offers: Vec<Offer>,
}

pub type Db = Arc<RwLock<Market>>;

fn seed() -> Market {
    let listings = [
        ("mint-ape-1", "Degen Ape #1", "degen-apes", 42.0),
        ("mint-ape-2", "Degen Ape #2", "degen-apes", 55.5),
        ("mint-frog-7", "Frog #7", "frogs", 3.25),
    ]
    .into_iter()
    .map(|(mint, name, collection, price)| {
        let listing = Listing {
            mint: mint.to_string(),
            name: name.to_string(),
            collection: collection.to_string(),
            price,
        };
        (listing.mint.clone(), listing)
    })
    .collect();
    Market {
        listings,
        offers: Vec::new(),
    }
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(seed()));
    Router::new()
        .route("/ping", get(ping))
        .route("/listings", get(list_listings))
        .route("/listings/{mint}", get(get_listing))
        .route("/listings/{mint}/offers", post(create_offer))
        .route("/session", post(create_session))
        .route("/whoami", get(whoami))
        .route("/slow", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn ping() -> Json<Value> {
    Json(json!({ "pong": true }))
}

async fn list_listings(
    State(db): State<Db>,
    Query(filter): Query<ListingFilter>,
) -> Json<Vec<Listing>> {
    let market = db.read().await;
    let mut listings: Vec<Listing> = market
        .listings
        .values()
        .filter(|l| filter.collection.as_deref().map_or(true, |c| l.collection == c))
        .cloned()
        .collect();
    listings.sort_by(|a, b| a.mint.cmp(&b.mint));
    Json(listings)
}

async fn get_listing(State(db): State<Db>, Path(mint): Path<String>) -> Response {
    let market = db.read().await;
    match market.listings.get(&mint) {
        Some(listing) => Json(listing.clone()).into_response(),
        None => not_found(),
    }
}

async fn create_offer(
    State(db): State<Db>,
    Path(mint): Path<String>,
    Json(input): Json<CreateOffer>,
) -> Response {
    let price = match input.price {
        Some(price) if price > 0.0 => price,
        Some(_) => return validation_error("price", "price must be positive"),
        None => return validation_error("price", "price is required"),
    };

    let mut market = db.write().await;
    if !market.listings.contains_key(&mint) {
        return not_found();
    }
    let offer = Offer {
        id: Uuid::new_v4(),
        mint,
        price,
        buyer: input.buyer,
    };
    market.offers.push(offer.clone());
    (StatusCode::CREATED, Json(offer)).into_response()
}

async fn create_session() -> Response {
    let sid = Uuid::new_v4();
    (
        AppendHeaders([
            (
                header::SET_COOKIE,
                format!("sid={sid}; Domain={COOKIE_DOMAIN}; Path=/; HttpOnly"),
            ),
            (
                header::SET_COOKIE,
                format!("theme=dark; Domain={COOKIE_DOMAIN}; Path=/"),
            ),
        ]),
        Json(json!({ "session": sid })),
    )
        .into_response()
}

/// Echoes the identity headers the caller forwarded.
async fn whoami(headers: HeaderMap) -> Json<Value> {
    let pick = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "authorization": pick("authorization"),
        "cookie": pick("cookie"),
        "host": pick("host"),
        "x-forwarded-host": pick("x-forwarded-host"),
        "x-forwarded-proto": pick("x-forwarded-proto"),
    }))
}

async fn slow(Query(params): Query<SlowParams>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    Json(json!({ "slept": params.ms }))
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "listing not found" })),
    )
        .into_response()
}

fn validation_error(field: &str, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "errors": [{ field: message }] })),
    )
        .into_response()
}
