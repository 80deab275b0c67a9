use membership_http::{batch_requests, ApiClient, ApiError, BatchOptions, ClientConfig};
use serde_json::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let api = ApiClient::new(ClientConfig::from_env()?);

    let jobs = (1..=12).map(|id| {
        let api = &api;
        move || async move {
            let member = api.get::<Value>(&format!("/members/{id}"), ()).await?;
            Ok::<_, ApiError>(member.data)
        }
    });

    let members = batch_requests(
        jobs,
        BatchOptions::new(4).on_progress(|done, total| println!("{done}/{total} loaded")),
    )
    .await?;

    for member in members {
        println!("{member}");
    }

    Ok(())
}
