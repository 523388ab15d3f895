use super::{highlight_capability, json_pretty, open_index, RemoteArgs, EXIT_SUCCESS};

pub fn run(remote: &RemoteArgs, json: bool) -> Result<u8, String> {
    let index = open_index(remote)?;
    let capabilities = index.capabilities().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&capabilities)?);
    } else if capabilities.is_empty() {
        println!("no capabilities advertised");
    } else {
        for name in &capabilities {
            println!("{}", highlight_capability(name));
        }
    }
    Ok(EXIT_SUCCESS)
}
