#[tokio::main]
async fn main() {
    stockpile_observability::init();

    let addr = std::env::var("STOCKPILE_ADDR").unwrap_or_else(|_| {
        tracing::info!("STOCKPILE_ADDR not set; using 0.0.0.0:8080");
        "0.0.0.0:8080".to_string()
    });

    let app = stockpile_api::app::build_app();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
