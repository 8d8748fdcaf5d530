use colored::Colorize;
use stackflow_cloud::{DependencyCatalog, TypeGraph};

pub fn handle(catalog: &DependencyCatalog) -> anyhow::Result<()> {
    println!("{}", "Validating dependency catalog...".blue());

    let graph = match TypeGraph::build(catalog) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Catalog error".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "{}",
        format!("✓ {} resource types, no cycles", graph.len())
            .green()
            .bold()
    );
    println!();

    println!("{}", "Create order:".bold());
    for (i, resource_type) in graph.creation_order().iter().enumerate() {
        println!("  {:>2}. {}", i + 1, resource_type.as_str().cyan());
    }
    println!();

    println!("{}", "Delete order:".bold());
    for (i, resource_type) in graph.deletion_order().iter().enumerate() {
        println!("  {:>2}. {}", i + 1, resource_type.as_str().cyan());
    }
    println!();

    println!("{}", "Edges:".bold());
    for entry in catalog.entries() {
        if entry.depends_on.is_empty() {
            continue;
        }
        let deps: Vec<String> = entry
            .depends_on
            .iter()
            .map(|d| {
                if d.blocking {
                    d.resource_type.to_string()
                } else {
                    format!("{} {}", d.resource_type, "(non-blocking)".dimmed())
                }
            })
            .collect();
        println!(
            "  {} → {}",
            entry.resource_type.as_str().cyan(),
            deps.join(", ")
        );
    }

    Ok(())
}
