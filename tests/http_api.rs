use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::{Days, NaiveDate};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use slotbook::api::{self, AppState};
use slotbook::engine::Engine;
use slotbook::notify::NotifyHub;
use slotbook::seed;

// ── Test infrastructure ──────────────────────────────────────

async fn seeded_app() -> (Router, Arc<Engine>) {
    let dir = std::env::temp_dir().join(format!("slotbook_http_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("bookings.wal"), Arc::new(NotifyHub::new())).unwrap());
    seed::seed_catalog(&engine).await.unwrap();
    (api::router(AppState::new(engine.clone(), "innovia")), engine)
}

fn future_day(days: u64) -> NaiveDate {
    chrono::Local::now().date_naive() + Days::new(days)
}

struct Call {
    method: Method,
    uri: String,
    body: Option<Value>,
    admin: bool,
    user: Option<&'static str>,
}

fn call(method: Method, uri: impl Into<String>) -> Call {
    Call {
        method,
        uri: uri.into(),
        body: None,
        admin: false,
        user: None,
    }
}

impl Call {
    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    fn user(mut self, id: &'static str) -> Self {
        self.user = Some(id);
        self
    }

    async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut req = Request::builder().method(self.method).uri(self.uri);
        if self.admin {
            req = req.header("x-user-role", "Admin");
        }
        if let Some(user) = self.user {
            req = req.header("x-user-id", user);
        }
        let req = match self.body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

async fn book(app: &Router, type_id: u32, date: NaiveDate, slot: &str, user: &str) -> (StatusCode, Value) {
    call(Method::POST, "/api/bookings")
        .json(json!({
            "resourceTypeId": type_id,
            "date": date.to_string(),
            "timeSlot": slot,
            "userId": user,
        }))
        .send(app)
        .await
}

// ── Catalog ──────────────────────────────────────────────────

#[tokio::test]
async fn resource_types_and_resources() {
    let (app, _) = seeded_app().await;

    let (status, types) = call(Method::GET, "/api/resource-types").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types.as_array().unwrap().len(), 4);
    assert_eq!(types[1], json!({"id": 2, "name": "Mötesrum", "instanceCount": 4}));

    let (status, resources) = call(Method::GET, "/api/resources").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resources.as_array().unwrap().len(), 24);

    let (status, room) = call(Method::GET, "/api/resources/16").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        room,
        json!({"id": 16, "name": "Mötesrum 1", "resourceTypeId": 2, "isBookable": true})
    );

    let (status, body) = call(Method::GET, "/api/resources/999").send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("not found"));
}

// ── Availability and booking ─────────────────────────────────

#[tokio::test]
async fn free_slots_shrink_as_rooms_fill() {
    let (app, _) = seeded_app().await;
    let date = future_day(3);
    let free_slots = || {
        call(Method::POST, "/api/resource-types/2/free-slots").json(json!({"date": date.to_string()}))
    };

    let (status, slots) = free_slots().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots, json!(["08-10", "10-12", "12-14", "14-16", "16-18", "18-20"]));

    for user in ["u1", "u2", "u3", "u4"] {
        let (status, _) = book(&app, 2, date, "12-14", user).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, slots) = free_slots().send(&app).await;
    assert_eq!(slots, json!(["08-10", "10-12", "14-16", "16-18", "18-20"]));

    let (status, body) = book(&app, 2, date, "12-14", "u5").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("no longer available"));
}

#[tokio::test]
async fn unknown_type_is_never_available() {
    let (app, _) = seeded_app().await;
    let (status, slots) = call(Method::POST, "/api/resource-types/42/free-slots")
        .json(json!({"date": future_day(1).to_string()}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots, json!([]));

    let (status, body) = book(&app, 42, future_day(1), "08-10", "u1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("no longer available"));
}

#[tokio::test]
async fn booking_receipt() {
    let (app, _) = seeded_app().await;
    let date = future_day(2);
    let (status, receipt) = book(&app, 4, date, "18-20", "u1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["date"], date.to_string());
    assert_eq!(receipt["timeSlot"], "18-20");
    assert_eq!(receipt["resourceName"], "AI Server");
    assert!(receipt["bookingId"].as_str().unwrap().parse::<Ulid>().is_ok());
}

#[tokio::test]
async fn timestamp_dates_are_reduced_to_the_day() {
    let (app, _) = seeded_app().await;
    let date = future_day(4);
    let (status, receipt) = call(Method::POST, "/api/bookings")
        .json(json!({
            "resourceTypeId": 3,
            "date": format!("{date}T09:30:00+02:00"),
            "timeSlot": "08-10",
            "userId": "u1",
        }))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["date"], date.to_string());
}

#[tokio::test]
async fn user_id_falls_back_to_the_identity_header() {
    let (app, engine) = seeded_app().await;
    let (status, _) = call(Method::POST, "/api/bookings")
        .user("header-user")
        .json(json!({"resourceTypeId": 1, "date": future_day(1).to_string(), "timeSlot": "08-10"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(engine.bookings_for_user("header-user").await.len(), 1);

    let (status, body) = call(Method::POST, "/api/bookings")
        .json(json!({"resourceTypeId": 1, "date": future_day(1).to_string(), "timeSlot": "08-10"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "userId is required");
}

#[tokio::test]
async fn bad_input_is_400() {
    let (app, _) = seeded_app().await;

    let (status, body) = book(&app, 2, future_day(1), "07-09", "u1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("07-09"));

    let (status, _) = call(Method::POST, "/api/resource-types/2/free-slots")
        .json(json!({"date": "next tuesday"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(Method::GET, "/api/calendar/2024-13-45").send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(Method::DELETE, "/api/bookings/not-a-ulid").send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_numeric_ids_in_path_get_a_json_400() {
    let (app, _) = seeded_app().await;

    let (status, body) = call(Method::GET, "/api/resources/abc").send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, body) = call(Method::POST, "/api/resource-types/desks/free-slots")
        .json(json!({"date": future_day(1).to_string()}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, body) = call(Method::PATCH, "/api/resources/-1/bookable").admin().send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

// ── Cancellation ─────────────────────────────────────────────

#[tokio::test]
async fn cancel_then_cancel_again() {
    let (app, _) = seeded_app().await;
    let date = future_day(5);
    let (_, receipt) = book(&app, 4, date, "10-12", "u1").await;
    let id = receipt["bookingId"].as_str().unwrap().to_string();

    let (status, _) = book(&app, 4, date, "10-12", "u2").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(Method::DELETE, format!("/api/bookings/{id}")).send(&app).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = call(Method::DELETE, format!("/api/bookings/{id}")).send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = book(&app, 4, date, "10-12", "u2").await;
    assert_eq!(status, StatusCode::OK);
}

// ── Reads ────────────────────────────────────────────────────

#[tokio::test]
async fn calendar_and_user_bookings() {
    let (app, _) = seeded_app().await;
    let date = future_day(6);
    book(&app, 2, date, "14-16", "alice").await;
    book(&app, 1, date, "08-10", "bob").await;
    book(&app, 3, future_day(7), "08-10", "alice").await;

    let (status, day) = call(Method::GET, format!("/api/calendar/{date}")).send(&app).await;
    assert_eq!(status, StatusCode::OK);
    let day = day.as_array().unwrap();
    assert_eq!(day.len(), 2);
    assert_eq!(day[0]["userId"], "bob");
    assert_eq!(day[0]["resourceType"], "Drop-in skrivbord");
    assert_eq!(day[1]["resourceName"], "Mötesrum 1");

    let (status, mine) = call(Method::GET, "/api/users/alice/bookings").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0]["timeSlot"], "14-16");
    assert_eq!(mine[1]["resourceName"], "VR Headset 1");
    assert!(mine.iter().all(|b| b["upcoming"] == json!(true)));
}

#[tokio::test]
async fn past_bookings_are_not_upcoming() {
    let (app, engine) = seeded_app().await;
    let yesterday = chrono::Local::now().date_naive() - Days::new(1);
    engine
        .create_booking(1, yesterday, slotbook::slot::Slot::H18, "carol".into())
        .await
        .unwrap();
    let (_, mine) = call(Method::GET, "/api/users/carol/bookings").send(&app).await;
    assert_eq!(mine[0]["upcoming"], json!(false));
}

// ── Admin routes ─────────────────────────────────────────────

#[tokio::test]
async fn admin_routes_require_the_admin_role() {
    let (app, _) = seeded_app().await;
    let date = future_day(1);
    book(&app, 2, date, "08-10", "u1").await;

    let (status, body) = call(Method::GET, "/api/bookings").user("u1").send(&app).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "admin role required");

    let (status, all) = call(Method::GET, "/api/bookings").admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (status, _) = call(Method::PATCH, "/api/resources/16/bookable").send(&app).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(Method::POST, "/api/resource-types/2/bookings")
        .json(json!({"date": date.to_string()}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bookings_for_type_on_a_day() {
    let (app, _) = seeded_app().await;
    let date = future_day(2);
    book(&app, 2, date, "08-10", "u1").await;
    book(&app, 3, date, "08-10", "u2").await;

    let (status, rooms) = call(Method::POST, "/api/resource-types/2/bookings")
        .admin()
        .json(json!({"date": date.to_string()}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rooms.as_array().unwrap().len(), 1);
    assert_eq!(rooms[0]["userId"], "u1");

    let (status, body) = call(Method::POST, "/api/resource-types/2/bookings")
        .admin()
        .json(json!({"date": future_day(9).to_string()}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No bookings under this day");
}

#[tokio::test]
async fn toggling_a_resource_off_hides_its_slots() {
    let (app, _) = seeded_app().await;
    let date = future_day(3);

    let (status, body) = call(Method::PATCH, "/api/resources/24/bookable").admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"resourceInstanceId": 24, "isBookable": false}));

    let (_, slots) = call(Method::POST, "/api/resource-types/4/free-slots")
        .json(json!({"date": date.to_string()}))
        .send(&app)
        .await;
    assert_eq!(slots, json!([]));
    let (status, _) = book(&app, 4, date, "08-10", "u1").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(Method::PATCH, "/api/resources/24/bookable").admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isBookable"], true);

    let (status, _) = call(Method::PATCH, "/api/resources/999/bookable").admin().send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
