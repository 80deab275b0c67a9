use membership_http::{upload_file, UploadFile, UploadOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("UPLOAD_URL")?;
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: upload <file>"))?;

    let file = UploadFile::from_path(&path).await?;
    let options = UploadOptions::new()
        .field_name("document")
        .data("member_id", 42)
        .on_progress(|progress| {
            println!("{:>3}% ({}/{} bytes)", progress.percent, progress.loaded, progress.total)
        });

    let body = upload_file(&url, file, options).await?;
    println!("server replied: {body:?}");

    Ok(())
}
