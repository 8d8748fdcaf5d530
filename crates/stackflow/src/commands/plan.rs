use colored::Colorize;
use stackflow_cloud::{CreationPlan, DependencyCatalog, Template, TypeGraph};
use std::path::Path;

pub fn handle(catalog: &DependencyCatalog, template_path: &Path) -> anyhow::Result<()> {
    let template = Template::load(template_path)?;
    let instances = template.instances(catalog)?;
    let graph = TypeGraph::build(catalog)?;
    let plan = CreationPlan::new(&graph, &instances);

    tracing::debug!(
        template = %template_path.display(),
        instances = instances.len(),
        "Resolved template"
    );

    println!(
        "{} {}",
        "Creation plan for".blue(),
        template_path.display().to_string().cyan()
    );
    println!();

    if plan.groups.is_empty() {
        println!("{}", "Template declares no resources.".yellow());
        return Ok(());
    }

    print!("{}", plan);
    println!();
    println!(
        "{}",
        format!(
            "✓ {} instances across {} types",
            plan.instance_count(),
            plan.groups.len()
        )
        .green()
    );
    Ok(())
}
