//! `zr list`: show the tasks defined in the configuration.

use std::path::Path;
use zr_core::Result;

pub fn execute(config_path: Option<&Path>) -> Result<i32> {
    let (config, _root) = super::load_config(config_path)?;

    let mut names: Vec<&String> = config.tasks.keys().collect();
    names.sort();

    for name in names {
        let Some(task) = config.get(name) else {
            continue;
        };
        let mut line = format!("{name}  {}", task.cmd.display());
        if let Some(description) = &task.description {
            line.push_str(&format!("  - {description}"));
        }
        if !task.tags.is_empty() {
            line.push_str(&format!("  [{}]", task.tags.join(", ")));
        }
        println!("{line}");
    }

    Ok(0)
}
