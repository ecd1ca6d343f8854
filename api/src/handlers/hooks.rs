use serde_json::{json, Value};

use crate::error::AppError;
use crate::mail::Mail;
use crate::models::entity::{EntityMeta, Hook};
use crate::models::validate::now_timestamp;
use crate::query::Filter;
use crate::store::{populate::populate, Document};
use crate::AppState;

/// `((hr30 - 70) + 2 * (hr1 - hr5)) / 10` over the three recorded heart rates.
pub fn dickson_index(doc: &Document) -> Option<f64> {
    let rate = |field: &str| doc.get(field).and_then(Value::as_f64);
    let thirty = rate("thirty_deflections_hr")?;
    let one_min = rate("one_min_elongated_hr")?;
    let five_min = rate("five_min_rest_hr")?;
    Some(((thirty - 70.0) + 2.0 * (one_min - five_min)) / 10.0)
}

fn set_dickson_index(target: &mut Document, source: &Document) {
    if let Some(index) = dickson_index(source) {
        target.insert("dickson_index".to_string(), json!(index));
    }
}

/// Runs before a validated document is inserted.
pub fn prepare_create(meta: &EntityMeta, doc: &mut Document) {
    if meta.hook == Hook::FocusSession {
        let source = doc.clone();
        set_dickson_index(doc, &source);
    }
}

fn parent_of(meta: &EntityMeta) -> Option<(&'static str, &'static str, &'static str)> {
    match meta.hook {
        Hook::None => None,
        Hook::AssignCustomerProgram => Some(("customer", "customers", "Customer")),
        Hook::FocusSession => Some(("customer_program", "customerPrograms", "CustomerProgram")),
    }
}

fn missing_parent(label: &str, id: &str) -> AppError {
    AppError::not_found(format!("{} #{} could not be found.", label, id))
}

/// Fails with NotFound when the record the hook links to does not exist, so nothing is stored.
pub async fn check_parent(
    state: &AppState,
    meta: &EntityMeta,
    doc: &Document,
) -> Result<(), AppError> {
    let Some((field, collection, label)) = parent_of(meta) else {
        return Ok(());
    };
    let parent_id = doc.get(field).and_then(Value::as_str).unwrap_or_default();
    match state
        .store
        .find_one(collection, &Filter::by_id(parent_id))
        .await?
    {
        Some(_) => Ok(()),
        None => Err(missing_parent(label, parent_id)),
    }
}

/// Runs once the document is stored and returns the creation message.
pub async fn after_create(
    state: &AppState,
    meta: &EntityMeta,
    doc: &Document,
) -> Result<String, AppError> {
    let id = doc.get("_id").and_then(Value::as_str).unwrap_or_default();
    match meta.hook {
        Hook::None => Ok(format!("{} successfully created.", meta.label)),
        Hook::AssignCustomerProgram => {
            let customer = doc.get("customer").and_then(Value::as_str).unwrap_or_default();
            let mut changes = Document::new();
            changes.insert("current_program".to_string(), json!(id));
            if !state.store.update_one("customers", customer, changes).await? {
                return Err(missing_parent("Customer", customer));
            }
            Ok("CustomerProgram successfully created and assigned to customer.".to_string())
        }
        Hook::FocusSession => {
            let program_id = doc
                .get("customer_program")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let program = state
                .store
                .find_one("customerPrograms", &Filter::by_id(program_id))
                .await?
                .ok_or_else(|| missing_parent("CustomerProgram", program_id))?;

            let mut sessions = match program.get("focus_sessions") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            sessions.push(json!(id));
            let mut changes = Document::new();
            changes.insert("focus_sessions".to_string(), Value::Array(sessions));
            state
                .store
                .update_one("customerPrograms", program_id, changes)
                .await?;

            Ok(
                "FocusSession successfully created and added to customerProgram FocusSessions."
                    .to_string(),
            )
        }
    }
}

/// Runs before changes are applied. Returns true when the coach must be notified afterwards.
pub async fn prepare_update(
    state: &AppState,
    meta: &EntityMeta,
    id: &str,
    changes: &mut Document,
) -> Result<bool, AppError> {
    if meta.hook != Hook::FocusSession {
        return Ok(false);
    }
    let has_results = matches!(changes.get("results"), Some(Value::Array(r)) if !r.is_empty());
    if !has_results {
        return Ok(false);
    }

    let mut merged = state
        .store
        .find_one(meta.collection, &Filter::by_id(id))
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!("{} #{} could not be found.", meta.label, id))
        })?;
    merged.extend(changes.clone());

    set_dickson_index(changes, &merged);
    changes.insert("validation_date".to_string(), json!(now_timestamp()));
    Ok(true)
}

/// Mails the coach of the session's program. Failures are logged, never returned.
pub async fn notify_coach(state: &AppState, meta: &'static EntityMeta, id: &str) {
    if let Err(e) = send_validation_mail(state, meta, id).await {
        tracing::warn!(focus_session = %id, "coach notification skipped: {}", e);
    }
}

async fn send_validation_mail(
    state: &AppState,
    meta: &'static EntityMeta,
    id: &str,
) -> Result<(), String> {
    let session = state
        .store
        .find_one(meta.collection, &Filter::by_id(id))
        .await
        .map_err(|e| e.to_string())?
        .ok_or("focus session disappeared")?;

    let mut docs = vec![session];
    let paths: Vec<String> = [
        "customer",
        "customer_program",
        "customer_program.program",
        "customer_program.program.coach",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect();
    populate(state.store.as_ref(), meta, &mut docs, &paths)
        .await
        .map_err(|e| e.to_string())?;

    let session = &docs[0];
    let text = |value: &Value, field: &str| {
        value
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let customer = &session["customer"];
    let program = &session["customer_program"];
    let coach = &program["program"]["coach"];
    let to = coach
        .get("email")
        .and_then(Value::as_str)
        .ok_or("program has no coach")?;

    let mail = Mail {
        to: to.to_string(),
        subject: "New focus session validated".to_string(),
        body: format!(
            "Hello {},\n\n{} {} has finished their focus session, please visit {}/#/customerPrograms/{} to see the results",
            text(coach, "first_name"),
            text(customer, "first_name"),
            text(customer, "last_name"),
            state.config.server.frontend_url,
            text(program, "_id"),
        ),
    };
    state.mailer.send(mail).await
}
