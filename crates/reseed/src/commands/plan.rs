use super::{load_config, refuse};
use crate::logging;
use anyhow::Result;
use comfy_table::Table;
use reseed_orchestration::{RunPlan, ServiceCatalog};
use std::path::Path;

/// Print the execution order and the lanes `--parallel` would use
pub fn run(config_path: Option<&Path>, services: &[String], verbose: bool) -> Result<i32> {
    let plan = match load_config(config_path).and_then(|config| {
        RunPlan::build(&ServiceCatalog::from_config(&config), services).map_err(Into::into)
    }) {
        Ok(plan) => plan,
        Err(e) => return Ok(refuse(&e)),
    };
    let _guard = logging::init(verbose, None)?;

    let mut table = Table::new();
    table.set_header(vec!["#", "SERVICE", "TOOL", "SCHEMAS", "AFTER"]);
    for (index, service) in plan.services().iter().enumerate() {
        let schemas: Vec<String> = service
            .schemas
            .iter()
            .map(|schema| match &schema.shared_from {
                Some(owner) => format!("{} (from {})", schema.name, owner),
                None => schema.name.clone(),
            })
            .collect();
        let after = plan.dependencies_of(&service.name);

        table.add_row(vec![
            (index + 1).to_string(),
            service.name.clone(),
            service.tool.to_string(),
            schemas.join("\n"),
            if after.is_empty() {
                "-".to_string()
            } else {
                after.join(", ")
            },
        ]);
    }
    println!("{}", table);

    println!("\nLanes:");
    for (index, lane) in plan.lanes().iter().enumerate() {
        println!("  {}. {}", index + 1, lane.join(" -> "));
    }

    Ok(0)
}
