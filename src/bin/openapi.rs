use anyhow::Result;

fn main() -> Result<()> {
    let doc = passreset::api::openapi();
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
