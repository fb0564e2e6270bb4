//! Request bodies shared by the API tests

#![allow(dead_code)]

use serde_json::{json, Value};

pub const EMAILS: &[&str] = &["a@x.com", "b@x.com", "c@x.com"];

pub fn email_items(emails: &[&str]) -> Vec<Value> {
    emails
        .iter()
        .map(|email| json!({ "type": "email", "email": email }))
        .collect()
}

/// Registration batch with no spacing between items.
pub fn registration_batch(emails: &[&str]) -> Value {
    json!({ "items": email_items(emails), "delay_seconds": 0 })
}

/// Registration batch whose items are `delay_seconds` apart.
pub fn slow_registration_batch(emails: &[&str], delay_seconds: u64) -> Value {
    json!({ "items": email_items(emails), "delay_seconds": delay_seconds })
}

pub fn deletion_batch(members: &[(&str, Option<&str>)]) -> Value {
    let items: Vec<Value> = members
        .iter()
        .map(|(member_id, contact_id)| {
            json!({ "type": "member", "member_id": member_id, "contact_id": contact_id })
        })
        .collect();
    json!({ "items": items, "delay_seconds": 0 })
}

pub fn control(action: &str) -> Value {
    json!({ "action": action })
}
