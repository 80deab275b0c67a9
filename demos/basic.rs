use membership_http::{
    create_authenticated_client, logging_interceptor, ClientConfig, QueryParams,
};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;
    let mut api = create_authenticated_client(config, || std::env::var("API_TOKEN").ok());
    api.add_response_interceptor_fn(logging_interceptor());

    let events = api
        .get::<Value>(
            "/events",
            QueryParams::new()
                .append("upcoming", true)
                .append("tag", ["gala", "workshop"]),
        )
        .await?;
    println!("events ({}): {}", events.status, events.data);

    let created = api
        .post::<Value, _>("/members", &json!({"name": "Kit", "tier": "gold"}), ())
        .await;
    match created {
        Ok(response) => println!("created member: {}", response.data),
        Err(err) if err.is_client_error() => eprintln!("rejected: {err}"),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
