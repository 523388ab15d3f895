use super::{highlight_capability, json_pretty, open_index, RemoteArgs, EXIT_SUCCESS};

pub fn run(remote: &RemoteArgs, json: bool) -> Result<u8, String> {
    let shared = open_index(remote)?;
    let index = shared.get().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(index)?);
        return Ok(EXIT_SUCCESS);
    }
    if index.is_empty() {
        println!("no images indexed");
        return Ok(EXIT_SUCCESS);
    }
    for image in index.images() {
        let resources = index.resources(image).unwrap_or_default();
        println!("{image} ({} resources)", resources.len());
        for resource in resources {
            println!("  {resource}");
        }
    }
    let capabilities: Vec<String> = index
        .capabilities()
        .into_iter()
        .map(highlight_capability)
        .collect();
    println!("capabilities: {}", capabilities.join(", "));
    Ok(EXIT_SUCCESS)
}
