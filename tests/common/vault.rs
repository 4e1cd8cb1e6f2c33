//! Vault-shaped responses for wiremock.

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ROOT_TOKEN: &str = "s.test-token";

/// Body of a successful login or token renewal.
pub fn auth_response(client_token: &str, lease_duration: u64, renewable: bool) -> Value {
    json!({
        "request_id": "0f9a7e52-4a1c-4a5b-8f33-cf1a0d1e6b10",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": null,
        "wrap_info": null,
        "warnings": null,
        "auth": {
            "client_token": client_token,
            "accessor": "accessor-123",
            "policies": ["default", "app"],
            "token_policies": ["default", "app"],
            "metadata": { "role_name": "app" },
            "lease_duration": lease_duration,
            "renewable": renewable,
            "entity_id": "7d2e3179-f69b-450c-7179-ac8ee8bd8ca9",
            "token_type": "service",
            "orphan": true
        }
    })
}

/// Body of a secret read carrying a lease.
pub fn secret_response(lease_id: &str, lease_duration: u64, renewable: bool, data: Value) -> Value {
    json!({
        "request_id": "6a1c2b3d-1111-2222-3333-444455556666",
        "lease_id": lease_id,
        "renewable": renewable,
        "lease_duration": lease_duration,
        "data": data,
        "wrap_info": null,
        "warnings": null,
        "auth": null
    })
}

/// Body of `sys/leases/renew`.
pub fn lease_response(lease_id: &str, lease_duration: u64) -> Value {
    json!({
        "lease_id": lease_id,
        "renewable": true,
        "lease_duration": lease_duration
    })
}

pub fn error_response(message: &str) -> Value {
    json!({ "errors": [message] })
}

/// Mount an AppRole login endpoint issuing `client_token`.
pub async fn mount_approle_login(server: &MockServer, client_token: &str, lease_duration: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_partial_json(json!({ "role_id": "role-id" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(auth_response(client_token, lease_duration, true)),
        )
        .mount(server)
        .await;
}

/// Mount a secret read authorized with `token`.
pub async fn mount_secret(server: &MockServer, secret_path: &str, token: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", secret_path)))
        .and(header("X-Vault-Token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
