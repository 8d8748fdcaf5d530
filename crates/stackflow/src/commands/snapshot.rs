use colored::Colorize;
use stackflow_cloud::{Snapshot, SnapshotStore};
use std::path::Path;

pub async fn handle_show(path: &Path) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let snapshot = SnapshotStore::new(dir).load(path).await?;
    print_summary(&snapshot);
    Ok(())
}

pub async fn handle_list(store: &SnapshotStore) -> anyhow::Result<()> {
    let paths = store.list().await?;
    if paths.is_empty() {
        println!(
            "{} {}",
            "No snapshots in".yellow(),
            store.dir().display()
        );
        return Ok(());
    }

    println!("{} {}", "Snapshots in".blue(), store.dir().display());
    for path in paths.iter().rev() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("  {}", name.cyan());
    }
    Ok(())
}

fn print_summary(snapshot: &Snapshot) {
    println!(
        "{} {} (version {})",
        "Snapshot captured at".blue(),
        snapshot.captured_at.to_rfc3339().cyan(),
        snapshot.version
    );
    println!(
        "  routers: {}, floating IPs: {}, port-forwardings: {}",
        snapshot.routers.len(),
        snapshot.floating_ips.len(),
        snapshot.port_forwarding_count()
    );
    println!();

    for (router_id, record) in &snapshot.routers {
        let gateway = record
            .gateway
            .as_ref()
            .map(|g| g.network_id.as_str())
            .unwrap_or("(none)");
        println!("{} (gateway: {})", router_id.bold(), gateway);
        for (fip_id, fip) in snapshot.router_floating_ips(router_id) {
            println!(
                "  - {} {} → {}  qos: {}  forwardings: {}",
                fip_id.cyan(),
                fip.floating_ip_address,
                fip.port.as_deref().unwrap_or("-"),
                fip.qos_policy.as_deref().unwrap_or("-"),
                fip.port_forwardings.len()
            );
        }
    }

    let unattached = snapshot.unattached_floating_ips();
    if !unattached.is_empty() {
        println!("{}", "Floating IPs without a router".bold());
        for (fip_id, fip) in unattached {
            println!(
                "  - {} {} → {}",
                fip_id.cyan(),
                fip.floating_ip_address,
                fip.port.as_deref().unwrap_or("-")
            );
        }
    }
}
