//! `marginalia tools`: Print the tool schemas sent to the model.

use marginalia_core::ToolRegistry;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let registry = marginalia_tools::default_registry();
    println!("{}", render(&registry)?);
    Ok(())
}

fn render(registry: &ToolRegistry) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&registry.to_schemas())
}
