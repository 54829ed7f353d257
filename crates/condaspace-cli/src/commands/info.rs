use super::{colorize_status, json_pretty, load_engine, EXIT_SUCCESS};
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(manifest: Option<&Path>, environment: &str, json: bool) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let info = engine.info(environment).map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&info)?);
        return Ok(EXIT_SUCCESS);
    }

    let status = if info.installed { "installed" } else { "not installed" };
    println!("environment: {}", info.name);
    println!("prefix:      {}", info.prefix.display());
    println!("status:      {}", colorize_status(status));
    if info.installed {
        println!("packages:    {}", info.packages);
    }
    println!("platform:    {}", info.platform);
    println!("platforms:   {}", join_or_dash(&info.platforms));
    println!("locked:      {}", if info.locked { "yes" } else { "no" });
    println!("solve group: {}", info.solve_group.as_deref().unwrap_or("-"));
    println!("features:    {}", join_or_dash(&info.features));
    println!("channels:    {}", join_or_dash(&info.channels));
    print_table("dependencies", &info.dependencies);
    print_table("pypi dependencies", &info.pypi_dependencies);
    print_table("system requirements", &info.system_requirements);
    if !info.activation.scripts.is_empty() {
        println!("activation scripts:");
        for script in &info.activation.scripts {
            println!("  {script}");
        }
    }
    print_table("activation env", &info.activation.env);
    Ok(EXIT_SUCCESS)
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_owned()
    } else {
        items.join(", ")
    }
}

fn print_table(title: &str, entries: &BTreeMap<String, String>) {
    if entries.is_empty() {
        return;
    }
    println!("{title}:");
    for (name, value) in entries {
        println!("  {name:<20} {value}");
    }
}
