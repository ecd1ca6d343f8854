use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use efit_api::{
    auth::HashCost,
    config::Config,
    mail::{Mail, Mailer},
    query::Filter,
    rest,
    store::SqliteStore,
    AppState,
};

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: Mail) -> Result<(), String> {
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    mailer: Arc<RecordingMailer>,
    token: String,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::with_secret("test-secret");
        config.hash_cost = HashCost {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        };
        configure(&mut config);

        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(config, Arc::new(store), mailer.clone()).unwrap();
        let token = state.tokens.issue("5d9f1c2a3b4c5d6e7f800000").unwrap();

        Self {
            router: rest::router(state.clone()),
            state,
            mailer,
            token,
        }
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> Reply {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    /// Creates a record and returns its id, taken from the `Location` header.
    async fn create(&self, collection: &str, body: Value) -> String {
        let reply = self
            .call(Method::POST, &format!("/{}", collection), Some(body))
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        let location = reply.headers[header::LOCATION].to_str().unwrap();
        location.rsplit('/').next().unwrap().to_string()
    }
}

fn basic(email: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", email, password)))
}

#[tokio::test]
async fn protected_route_requires_a_token() {
    let app = TestApp::new().await;
    let reply = app
        .send(Request::get("/customers").body(Body::empty()).unwrap())
        .await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"]["name"], "Unauthorized");
    assert_eq!(reply.body["error"]["description"], "Token must be provided.");
}

#[tokio::test]
async fn malformed_token_is_rejected() {
    let app = TestApp::new().await;
    let reply = app
        .send(
            Request::get("/customers")
                .header(header::AUTHORIZATION, "Bearer not.a.jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn legacy_pass_through_lets_unauthenticated_requests_in() {
    let app = TestApp::with_config(|c| c.auth.enforce = false).await;
    let reply = app
        .send(Request::get("/customers").body(Body::empty()).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!([]));
}

#[tokio::test]
async fn signup_stores_a_digest_and_login_returns_a_token() {
    let app = TestApp::new().await;

    let signup = app
        .send(
            Request::post("/customers")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"email": "jane@efit.fr", "password": "1234", "first_name": "Jane"})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(signup.status, StatusCode::CREATED);
    assert_eq!(
        signup.body["response"]["message"],
        "Customer successfully created."
    );
    let location = signup.headers[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("http://localhost:3000/customers/"));
    let id = location.rsplit('/').next().unwrap();

    let stored = app
        .state
        .store
        .find_one("customers", &Filter::by_id(id))
        .await
        .unwrap()
        .unwrap();
    let digest = stored["password"].as_str().unwrap();
    assert_ne!(digest, "1234");
    assert!(app.state.hasher.verify("1234", digest).await.unwrap());

    let login = app
        .send(
            Request::get("/login")
                .header(header::AUTHORIZATION, basic("jane@efit.fr", "1234"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.body["user"]["_id"], id);
    assert!(login.body["user"].get("password").is_none());

    let token = login.body["token"].as_str().unwrap();
    assert_eq!(app.state.tokens.verify(token).unwrap(), id);

    let listed = app
        .send(
            Request::get("/customers")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
    assert!(listed.body[0].get("password").is_none());
}

#[tokio::test]
async fn json_login_rejects_a_wrong_password() {
    let app = TestApp::new().await;
    app.create(
        "coaches",
        json!({"email": "coach@efit.fr", "password": "right"}),
    )
    .await;

    let reply = app
        .send(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"email": "coach@efit.fr", "password": "wrong"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        reply.body["error"]["description"],
        "Wrong username or password."
    );
}

#[tokio::test]
async fn login_can_require_an_active_account() {
    let app = TestApp::with_config(|c| c.auth.login_required_status = Some("ACTIVE".into())).await;
    app.create("users", json!({"email": "u@efit.fr", "password": "pw", "age": 30}))
        .await;

    let reply = app
        .send(
            Request::get("/login")
                .header(header::AUTHORIZATION, basic("u@efit.fr", "pw"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"]["description"], "Account not yet activated.");
}

#[tokio::test]
async fn crud_round_trip() {
    let app = TestApp::new().await;
    let id = app
        .create("exercises", json!({"name": "Squat", "extra": "dropped"}))
        .await;

    let one = app.call(Method::GET, &format!("/exercises/{}", id), None).await;
    assert_eq!(one.status, StatusCode::OK);
    assert_eq!(one.body["name"], "Squat");
    assert!(one.body["img"].as_str().unwrap().starts_with("https://"));
    assert!(one.body.get("extra").is_none());

    let patched = app
        .call(
            Method::PATCH,
            &format!("/exercises/{}", id),
            Some(json!({"description": "Legs"})),
        )
        .await;
    assert_eq!(patched.status, StatusCode::OK);
    assert_eq!(
        patched.body,
        json!({"response": {"status_code": 200, "message": "OK."}})
    );

    let one = app
        .call(Method::GET, &format!("/exercises/{}?fields=description", id), None)
        .await;
    assert_eq!(one.body, json!({"_id": id, "description": "Legs"}));

    let deleted = app
        .call(Method::DELETE, &format!("/exercises/{}", id), None)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);

    let gone = app.call(Method::GET, &format!("/exercises/{}", id), None).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(
        gone.body["error"]["description"],
        format!("Exercise #{} could not be found.", id)
    );
}

#[tokio::test]
async fn list_honours_the_query_string() {
    let app = TestApp::new().await;
    for name in ["Plank", "Squat", "Lunge", "Burpee"] {
        app.create("exercises", json!({"name": name})).await;
    }

    let reply = app
        .call(Method::GET, "/exercises?sort=-name&skip=1&limit=2&fields=name,-_id", None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!([{"name": "Plank"}, {"name": "Lunge"}]));

    let reply = app.call(Method::GET, "/exercises?name=/%5Eb/i", None).await;
    assert_eq!(reply.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bad_ids_and_bodies_are_rejected() {
    let app = TestApp::new().await;

    let reply = app.call(Method::GET, "/programs/abc", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"]["description"], "abc is not a valid ID.");

    let reply = app
        .call(Method::POST, "/users", Some(json!({"email": "x@efit.fr"})))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["error"]["description"]["password"],
        "Path `password` is required."
    );

    let reply = app
        .send(
            Request::post("/programs")
                .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("name=x"))
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn duplicate_emails_conflict() {
    let app = TestApp::new().await;
    app.create("coaches", json!({"email": "c@efit.fr", "password": "pw"}))
        .await;
    let reply = app
        .call(
            Method::POST,
            "/coaches",
            Some(json!({"email": "c@efit.fr", "password": "pw"})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert!(reply.body["error"]["description"]["email"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_signups_with_one_email_store_one_account() {
    let app = TestApp::new().await;
    let body = json!({"email": "race@efit.fr", "password": "pw"});
    let (a, b) = tokio::join!(
        app.call(Method::POST, "/coaches", Some(body.clone())),
        app.call(Method::POST, "/coaches", Some(body.clone())),
    );

    let mut statuses = vec![a.status, b.status];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);
    let loser = if a.status == StatusCode::CONFLICT { a } else { b };
    assert_eq!(
        loser.body["error"]["description"]["email"],
        "`race@efit.fr` is already taken."
    );

    let listed = app
        .call(Method::GET, "/coaches?email=race@efit.fr", None)
        .await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn email_freed_by_a_patch_can_be_reused() {
    let app = TestApp::new().await;
    let id = app
        .create("coaches", json!({"email": "old@efit.fr", "password": "pw"}))
        .await;
    let reply = app
        .call(
            Method::PATCH,
            &format!("/coaches/{}", id),
            Some(json!({"email": "new@efit.fr"})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    app.create("coaches", json!({"email": "old@efit.fr", "password": "pw"}))
        .await;
    let reply = app
        .call(
            Method::POST,
            "/coaches",
            Some(json!({"email": "new@efit.fr", "password": "pw"})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn cors_preflight_skips_the_auth_gate() {
    let app = TestApp::new().await;
    let reply = app
        .send(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/customers")
                .header(header::ORIGIN, "http://localhost:8080")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let methods = reply.headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    assert!(methods.contains("PATCH"));
}

#[tokio::test]
async fn cors_can_be_limited_to_one_origin() {
    let app = TestApp::with_config(|c| c.server.cors_origin = "https://app.efit.fr".into()).await;
    let reply = app
        .send(
            Request::get("/login")
                .header(header::ORIGIN, "https://app.efit.fr")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        reply.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.efit.fr"
    );

    let reply = app
        .send(
            Request::get("/login")
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(!reply
        .headers
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn login_with_an_unknown_email_is_rejected_like_a_wrong_password() {
    let app = TestApp::new().await;
    let reply = app
        .send(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"email": "nobody@efit.fr", "password": "pw"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        reply.body["error"]["description"],
        "Wrong username or password."
    );
}

#[tokio::test]
async fn unknown_routes_and_methods() {
    let app = TestApp::new().await;

    let reply = app.call(Method::GET, "/nope", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"]["description"], "url: '/nope' not found.");
    assert_eq!(
        reply.headers[header::ACCEPT],
        "application/json; charset=utf-8"
    );

    let reply = app.call(Method::PUT, "/customers", Some(json!({}))).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.body["error"]["name"], "MethodNotAllowed");
}

#[tokio::test]
async fn change_password_rehashes() {
    let app = TestApp::new().await;
    let id = app
        .create("customers", json!({"email": "p@efit.fr", "password": "old"}))
        .await;

    let reply = app
        .call(
            Method::PATCH,
            &format!("/customers/changePassword/{}", id),
            Some(json!({"password": "new"})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let login = app
        .send(
            Request::get("/login")
                .header(header::AUTHORIZATION, basic("p@efit.fr", "new"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
}

#[tokio::test]
async fn population_resolves_references_and_hides_secrets() {
    let app = TestApp::new().await;
    let customer = app
        .create(
            "customers",
            json!({"email": "pop@efit.fr", "password": "pw", "first_name": "Pop"}),
        )
        .await;
    let exercise = app.create("exercises", json!({"name": "Squat"})).await;
    let program = app
        .create(
            "customerPrograms",
            json!({
                "customer": customer,
                "sessions": [{"exercises": [{"exercise": exercise}]}],
            }),
        )
        .await;

    let reply = app
        .call(
            Method::GET,
            &format!("/customerPrograms/{}?populate=customer", program),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["customer"]["first_name"], "Pop");
    assert!(reply.body["customer"].get("password").is_none());
    // GET one always resolves the embedded exercises
    assert_eq!(
        reply.body["sessions"][0]["exercises"][0]["exercise"]["name"],
        "Squat"
    );

    let reply = app
        .call(Method::GET, "/customerPrograms?populate=nothing", None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn focus_session_lifecycle() {
    let app = TestApp::new().await;
    let coach = app
        .create(
            "coaches",
            json!({"email": "coach@efit.fr", "password": "pw", "first_name": "Carla"}),
        )
        .await;
    let customer = app
        .create(
            "customers",
            json!({"email": "cust@efit.fr", "password": "pw", "first_name": "Tom", "last_name": "Lee"}),
        )
        .await;
    let program = app
        .create("programs", json!({"name": "Cardio", "coach": coach}))
        .await;

    let reply = app
        .call(
            Method::POST,
            "/customerPrograms",
            Some(json!({"customer": customer, "program": program})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(
        reply.body["response"]["message"],
        "CustomerProgram successfully created and assigned to customer."
    );
    let customer_program = reply.headers[header::LOCATION]
        .to_str()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string();

    let stored = app
        .state
        .store
        .find_one("customers", &Filter::by_id(&customer))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["current_program"], customer_program);

    let reply = app
        .call(
            Method::POST,
            "/focusSessions",
            Some(json!({
                "customer": customer,
                "customer_program": customer_program,
                "due_date": "2024-06-01",
                "thirty_deflections_hr": 120,
                "one_min_elongated_hr": 90,
                "five_min_rest_hr": 65,
            })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(
        reply.body["response"]["message"],
        "FocusSession successfully created and added to customerProgram FocusSessions."
    );
    let session = reply.headers[header::LOCATION]
        .to_str()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string();

    let one = app
        .call(Method::GET, &format!("/focusSessions/{}", session), None)
        .await;
    assert_eq!(one.body["dickson_index"], json!(10.0));

    let linked = app
        .call(
            Method::GET,
            &format!("/customerPrograms/{}", customer_program),
            None,
        )
        .await;
    assert_eq!(linked.body["focus_sessions"], json!([session]));

    let reply = app
        .call(
            Method::PATCH,
            &format!("/focusSessions/{}", session),
            Some(json!({
                "results": [{"heart_rate": 100}],
                "thirty_deflections_hr": 100,
                "one_min_elongated_hr": 80,
                "five_min_rest_hr": 70,
            })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let one = app
        .call(Method::GET, &format!("/focusSessions/{}", session), None)
        .await;
    assert_eq!(one.body["dickson_index"], json!(5.0));
    assert!(one.body["validation_date"].is_string());

    let sent = app.mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "coach@efit.fr");
    assert_eq!(sent[0].subject, "New focus session validated");
    assert!(sent[0].body.starts_with("Hello Carla,"));
    assert!(sent[0].body.contains("Tom Lee"));
    assert!(sent[0]
        .body
        .contains(&format!("/#/customerPrograms/{}", customer_program)));
}

#[tokio::test]
async fn focus_session_for_a_missing_program_is_not_found() {
    let app = TestApp::new().await;
    let reply = app
        .call(
            Method::POST,
            "/focusSessions",
            Some(json!({
                "customer": "5d9f1c2a3b4c5d6e7f8000aa",
                "customer_program": "5d9f1c2a3b4c5d6e7f8000bb",
                "due_date": "2024-06-01",
            })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(
        reply.body["error"]["description"],
        "CustomerProgram #5d9f1c2a3b4c5d6e7f8000bb could not be found."
    );

    let listed = app.call(Method::GET, "/focusSessions", None).await;
    assert_eq!(listed.body, json!([]));
}

#[tokio::test]
async fn customer_program_for_a_missing_customer_is_not_stored() {
    let app = TestApp::new().await;
    let reply = app
        .call(
            Method::POST,
            "/customerPrograms",
            Some(json!({"customer": "5d9f1c2a3b4c5d6e7f8000aa"})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(
        reply.body["error"]["description"],
        "Customer #5d9f1c2a3b4c5d6e7f8000aa could not be found."
    );

    let listed = app.call(Method::GET, "/customerPrograms", None).await;
    assert_eq!(listed.body, json!([]));
}
