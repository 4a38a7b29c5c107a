use reqwest::StatusCode;
use serde_json::{Value, json};

use stockpile_core::TenantId;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = stockpile_api::app::build_app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post_json(
    client: &reqwest::Client,
    base_url: &str,
    tenant: TenantId,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    let res = client
        .post(format!("{base_url}{path}"))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body: Value = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get_json(
    client: &reqwest::Client,
    base_url: &str,
    tenant: TenantId,
    path: &str,
) -> (StatusCode, Value) {
    let res = client
        .get(format!("{base_url}{path}"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body: Value = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn new_branch() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn new_variant() -> String {
    uuid::Uuid::now_v7().to_string()
}

async fn create_color_size_template(
    client: &reqwest::Client,
    base_url: &str,
    tenant: TenantId,
    tracking: &str,
) -> String {
    let (status, body) = post_json(
        client,
        base_url,
        tenant,
        "/templates",
        json!({
            "name": "Phone Case",
            "base_sku": "CASE",
            "tracking": tracking,
            "attributes": [
                { "name": "Color", "values": ["Red", "Blue"] },
                { "name": "Size", "values": ["S", "M"] },
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["template_id"].as_str().unwrap().to_string()
}

async fn receive_quantity(
    client: &reqwest::Client,
    base_url: &str,
    tenant: TenantId,
    branch: &str,
    variant: &str,
    quantity: i64,
) {
    let (status, body) = post_json(
        client,
        base_url,
        tenant,
        "/stock/receipts",
        json!({
            "branch_id": branch,
            "reference": "GRN-1",
            "lines": [{ "variant_id": variant, "quantity": quantity }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn tenant_header_is_required() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/stock/levels", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Health stays open for the load balancer.
    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn variant_synthesis_creates_the_cartesian_product_and_is_idempotent() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();

    let template = create_color_size_template(&client, &srv.base_url, tenant, "batched").await;

    let sync = json!({
        "attribute_selections": { "Color": ["Red", "Blue"], "Size": ["S", "M"] },
    });
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{template}/sync-variants"),
        sync.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let created = body["data"]["created"].as_array().unwrap();
    assert_eq!(created.len(), 4);
    let signatures: Vec<&str> = created
        .iter()
        .map(|v| v["signature"].as_str().unwrap())
        .collect();
    assert_eq!(
        signatures,
        vec![
            "Color=Red|Size=S",
            "Color=Red|Size=M",
            "Color=Blue|Size=S",
            "Color=Blue|Size=M",
        ]
    );

    // Second identical sync: nothing created, nothing reactivated.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{template}/sync-variants"),
        sync,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["created"].as_array().unwrap().is_empty());
    assert!(body["data"]["reactivated"].as_array().unwrap().is_empty());

    // Unknown attribute is a validation error.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{template}/sync-variants"),
        json!({ "attribute_selections": { "Material": ["Steel"] } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn adjustment_updates_on_hand_and_writes_a_ledger_entry() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch = new_branch();
    let variant = new_variant();

    receive_quantity(&client, &srv.base_url, tenant, &branch, &variant, 20).await;

    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/adjustments",
        json!({
            "variant_id": variant,
            "branch_id": branch,
            "quantity_change": -5,
            "reason": "recount",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/lot-quantity?variant_id={variant}&branch_id={branch}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quantity"], 15);

    let (status, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/movements?variant_id={variant}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let movements = body["data"]["movements"].as_array().unwrap();
    assert!(
        movements
            .iter()
            .any(|m| m["type"] == "adjustment" && m["quantity_change"] == -5)
    );

    // Empty reason is rejected.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/adjustments",
        json!({
            "variant_id": variant,
            "branch_id": branch,
            "quantity_change": -1,
            "reason": "  ",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation_error");

    // Driving stock negative is rejected.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/adjustments",
        json!({
            "variant_id": variant,
            "branch_id": branch,
            "quantity_change": -100,
            "reason": "oops",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "insufficient_stock");
}

#[tokio::test]
async fn idempotent_adjustment_retry_does_not_double_count() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch = new_branch();
    let variant = new_variant();
    let operation_id = uuid::Uuid::now_v7().to_string();

    receive_quantity(&client, &srv.base_url, tenant, &branch, &variant, 20).await;

    let body = json!({
        "variant_id": variant,
        "branch_id": branch,
        "quantity_change": -5,
        "reason": "recount",
        "operation_id": operation_id,
    });

    let (status, first) = post_json(&client, &srv.base_url, tenant, "/stock/adjustments", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["data"]["already_applied"], false);

    // Network retry with the same operation id.
    let (status, second) = post_json(&client, &srv.base_url, tenant, "/stock/adjustments", body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["data"]["already_applied"], true);

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/lot-quantity?variant_id={variant}&branch_id={branch}"),
    )
    .await;
    assert_eq!(body["data"]["quantity"], 15);
}

#[tokio::test]
async fn transfer_lifecycle_moves_stock_between_branches() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch_a = new_branch();
    let branch_b = new_branch();
    let variant = new_variant();

    receive_quantity(&client, &srv.base_url, tenant, &branch_a, &variant, 20).await;

    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/transfers",
        json!({
            "from_branch_id": branch_a,
            "to_branch_id": branch_b,
            "lines": [{ "variant_id": variant, "quantity": 10 }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let transfer_id = body["data"]["transfer_id"].as_str().unwrap().to_string();

    // Receive before dispatch is a state error.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/transfers/{transfer_id}/receive"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "state_error");

    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/transfers/{transfer_id}/dispatch"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "in_transit");

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/lot-quantity?variant_id={variant}&branch_id={branch_a}"),
    )
    .await;
    assert_eq!(body["data"]["quantity"], 10);

    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/transfers/{transfer_id}/receive"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "completed");

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/lot-quantity?variant_id={variant}&branch_id={branch_b}"),
    )
    .await;
    assert_eq!(body["data"]["quantity"], 10);

    // Double dispatch after completion is a state error.
    let (status, _) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/transfers/{transfer_id}/dispatch"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn insufficient_stock_aborts_dispatch_entirely() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch_a = new_branch();
    let branch_b = new_branch();
    let variant = new_variant();

    receive_quantity(&client, &srv.base_url, tenant, &branch_a, &variant, 5).await;

    let (_, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/transfers",
        json!({
            "from_branch_id": branch_a,
            "to_branch_id": branch_b,
            "lines": [{ "variant_id": variant, "quantity": 50 }],
        }),
    )
    .await;
    let transfer_id = body["data"]["transfer_id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/transfers/{transfer_id}/dispatch"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "insufficient_stock");

    // The document went back to pending and the source is untouched.
    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/transfers/{transfer_id}"),
    )
    .await;
    assert_eq!(body["data"]["status"], "pending");

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/lot-quantity?variant_id={variant}&branch_id={branch_a}"),
    )
    .await;
    assert_eq!(body["data"]["quantity"], 5);
}

#[tokio::test]
async fn serialized_stock_flows_through_receipt_reserve_and_print_views() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch = new_branch();
    let variant = new_variant();

    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/receipts",
        json!({
            "branch_id": branch,
            "lines": [{ "variant_id": variant, "serials": ["SN-1", "SN-2", "SN-3"] }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // Duplicate serial receipt is a conflict, tenant-wide.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/receipts",
        json!({
            "branch_id": new_branch(),
            "lines": [{ "variant_id": variant, "serials": ["SN-2"] }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "conflict");

    // Reserve two units; only the remaining one shows as available.
    let (status, _) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/serials/reserve",
        json!({
            "branch_id": branch,
            "variant_id": variant,
            "serials": ["SN-1", "SN-3"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/available-serials?variant_id={variant}&branch_id={branch}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let serials = body["data"]["serials"].as_array().unwrap();
    assert_eq!(serials.len(), 1);
    assert_eq!(serials[0]["serial"], "SN-2");

    // Reserving an already-reserved unit fails the whole batch.
    let (status, _) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/serials/reserve",
        json!({
            "branch_id": branch,
            "variant_id": variant,
            "serials": ["SN-2", "SN-3"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/serials/release",
        json!({
            "branch_id": branch,
            "variant_id": variant,
            "serials": ["SN-1", "SN-3"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/available-serials?variant_id={variant}&branch_id={branch}"),
    )
    .await;
    assert_eq!(body["data"]["serials"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn assembly_requires_exact_serial_counts_and_is_atomic() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch = new_branch();

    // Serialized component template, one variant.
    let component_template =
        create_color_size_template(&client, &srv.base_url, tenant, "serialized").await;
    let (_, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{component_template}/sync-variants"),
        json!({ "attribute_selections": { "Color": ["Red"], "Size": ["S"] } }),
    )
    .await;
    let component = body["data"]["created"][0]["variant_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Batched bundle template, one variant, recipe 2 units per kit.
    let bundle_template =
        create_color_size_template(&client, &srv.base_url, tenant, "batched").await;
    let (_, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{bundle_template}/sync-variants"),
        json!({ "attribute_selections": { "Color": ["Blue"], "Size": ["M"] } }),
    )
    .await;
    let bundle = body["data"]["created"][0]["variant_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{bundle_template}/bundle-recipe"),
        json!({
            "bundle_variant_id": bundle,
            "components": [{ "variant_id": component, "quantity_per_kit": 2 }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/stock/receipts",
        json!({
            "branch_id": branch,
            "lines": [{ "variant_id": component, "serials": ["X-1", "X-2", "X-3", "X-4"] }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // 2 kits x 2 units = 4 required; 3 selected -> validation error, nothing consumed.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/assemblies",
        json!({
            "branch_id": branch,
            "bundle_variant_id": bundle,
            "quantity_to_assemble": 2,
            "component_selections": [
                { "variant_id": component, "serials": ["X-1", "X-2", "X-3"] },
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["kind"], "validation_error");

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/available-serials?variant_id={component}&branch_id={branch}"),
    )
    .await;
    assert_eq!(body["data"]["serials"].as_array().unwrap().len(), 4);

    // Exact selection assembles 2 kits atomically.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        "/assemblies",
        json!({
            "branch_id": branch,
            "bundle_variant_id": bundle,
            "quantity_to_assemble": 2,
            "component_selections": [
                { "variant_id": component, "serials": ["X-1", "X-2", "X-3", "X-4"] },
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["quantity_produced"], 2);

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/stock/lot-quantity?variant_id={bundle}&branch_id={branch}"),
    )
    .await;
    assert_eq!(body["data"]["quantity"], 2);
}

#[tokio::test]
async fn deactivation_is_blocked_while_stock_remains() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let branch = new_branch();

    let template = create_color_size_template(&client, &srv.base_url, tenant, "batched").await;
    let (_, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{template}/sync-variants"),
        json!({ "attribute_selections": { "Color": ["Red", "Blue"], "Size": ["S"] } }),
    )
    .await;
    let blue = body["data"]["created"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["signature"] == "Color=Blue|Size=S")
        .unwrap()["variant_id"]
        .as_str()
        .unwrap()
        .to_string();

    receive_quantity(&client, &srv.base_url, tenant, &branch, &blue, 3).await;

    // Narrowing the selection cannot deactivate the stocked variant.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{template}/sync-variants"),
        json!({ "attribute_selections": { "Color": ["Red"], "Size": ["S"] } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let blocked = body["data"]["blocked_deactivations"].as_array().unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0], Value::String(blue.clone()));

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/templates/{template}/variants"),
    )
    .await;
    let variant = body["data"]["variants"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["variant_id"] == Value::String(blue.clone()))
        .unwrap();
    assert_eq!(variant["is_active"], true);

    // Manual deactivation is refused too.
    let (status, body) = post_json(
        &client,
        &srv.base_url,
        tenant,
        &format!("/variants/{blue}/deactivate"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "invariant_violation");
}

#[tokio::test]
async fn tenants_are_isolated() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant1 = TenantId::new();
    let tenant2 = TenantId::new();
    let branch_a = new_branch();
    let branch_b = new_branch();
    let variant = new_variant();

    receive_quantity(&client, &srv.base_url, tenant1, &branch_a, &variant, 20).await;

    let (_, body) = post_json(
        &client,
        &srv.base_url,
        tenant1,
        "/stock/transfers",
        json!({
            "from_branch_id": branch_a,
            "to_branch_id": branch_b,
            "lines": [{ "variant_id": variant, "quantity": 5 }],
        }),
    )
    .await;
    let transfer_id = body["data"]["transfer_id"].as_str().unwrap().to_string();

    // Tenant 2 cannot read tenant 1's transfer or stock.
    let (status, _) = get_json(
        &client,
        &srv.base_url,
        tenant2,
        &format!("/stock/transfers/{transfer_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = get_json(
        &client,
        &srv.base_url,
        tenant2,
        &format!("/stock/lot-quantity?variant_id={variant}&branch_id={branch_a}"),
    )
    .await;
    assert_eq!(body["data"]["quantity"], 0);
}
