use super::{json_pretty, open_index, RemoteArgs, EXIT_SUCCESS};
use vmmirror_core::CapabilityFilter;

pub fn run(remote: &RemoteArgs, capabilities: &[String], json: bool) -> Result<u8, String> {
    let index = open_index(remote)?;
    let filter = CapabilityFilter::new(capabilities);
    let images = index
        .images_matching(&filter)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "filter": filter.entries(),
            "images": images,
        });
        println!("{}", json_pretty(&payload)?);
    } else if images.is_empty() {
        println!("no images match {}", filter.entries().join(", "));
    } else {
        for image in &images {
            println!("{image}");
        }
    }
    Ok(EXIT_SUCCESS)
}
