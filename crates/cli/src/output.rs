//! Human and JSON rendering of command results.

use anyhow::Result;
use hoard_engine::{
    ApplyReport, ArtifactView, CacheError, CacheStats, CleanReport, DedupPlan, ErrorClass,
    LinkReport, RemoveReport, StatusEntry, SyncReport,
};
use serde::Serialize;
use serde_json::json;

/// Where results go: JSON on stdout, or text on stdout with errors on stderr.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Report a failed command and return its exit code.
    pub fn error(&self, err: &anyhow::Error) -> u8 {
        let cache_err = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<CacheError>());
        let class = cache_err.map_or(ErrorClass::UserError, CacheError::class);
        let message = format!("{err:#}");

        if self.json {
            let mut body = json!({
                "kind": class.as_str(),
                "message": message,
            });
            if let Some(apps) = cache_err.and_then(CacheError::blocking_apps) {
                body["blocking_apps"] = json!(apps);
            }
            println!("{}", json!({ "error": body }));
        } else {
            eprintln!("error: {message}");
        }
        class.exit_code() as u8
    }

    pub fn status(&self, entries: &[StatusEntry]) -> Result<()> {
        if self.json {
            return self.print_json(entries);
        }
        if entries.is_empty() {
            println!("No artifacts tracked.");
            return Ok(());
        }

        let width = entries
            .iter()
            .map(|e| e.identifier.len())
            .max()
            .unwrap_or(0)
            .max("IDENTIFIER".len());
        println!("{:<width$}  {:>10}  {:<17}  USED BY", "IDENTIFIER", "SIZE", "SOURCE");
        for entry in entries {
            let used_by = if entry.used_by.is_empty() {
                "-".to_string()
            } else {
                entry.used_by.join(", ")
            };
            let marker = if entry.is_symlink { " (link)" } else { "" };
            println!(
                "{:<width$}  {:>10}  {:<17}  {}{}",
                entry.identifier,
                format_bytes(entry.size_bytes),
                entry.source,
                used_by,
                marker
            );
        }
        Ok(())
    }

    pub fn added(&self, artifact: &ArtifactView) -> Result<()> {
        if self.json {
            return self.print_json(artifact);
        }
        println!(
            "✓ Added {} ({})",
            artifact.identifier,
            format_bytes(artifact.size_bytes)
        );
        println!("  Path: {}", artifact.canonical_path.display());
        if let Some(target) = &artifact.symlink_target {
            println!("  Links to: {}", target.display());
        }
        Ok(())
    }

    pub fn removed(&self, report: &RemoveReport) -> Result<()> {
        if self.json {
            return self.print_json(report);
        }
        println!("✓ Removed {}", report.identifier);
        if report.payload_deleted {
            println!("  Reclaimed {}", format_bytes(report.size_bytes));
        } else if let Some(heir) = &report.promoted {
            println!("  Payload kept for {heir}");
        }
        if !report.released_apps.is_empty() {
            println!("  Released by: {}", report.released_apps.join(", "));
        }
        Ok(())
    }

    pub fn linked(&self, report: &LinkReport) -> Result<()> {
        if self.json {
            return self.print_json(report);
        }
        println!("✓ Linked application {} ({})", report.name, report.root_path.display());
        for identifier in &report.uses {
            println!("  uses {identifier}");
        }
        Ok(())
    }

    pub fn unlinked(&self, name: &str, released: u64) -> Result<()> {
        if self.json {
            return self.print_json(&json!({ "name": name, "released": released }));
        }
        println!("✓ Unlinked application {name} ({released} usage link(s) released)");
        Ok(())
    }

    pub fn stats(&self, stats: &CacheStats) -> Result<()> {
        if self.json {
            return self.print_json(stats);
        }
        println!("Cache Statistics:");
        println!("  Artifacts: {}", stats.artifact_count);
        println!("  Applications: {}", stats.application_count);
        println!("  Stored size: {}", format_bytes(stats.total_size));
        println!("  Logical size: {}", format_bytes(stats.logical_size));
        println!("  Saved by links: {}", format_bytes(stats.savings));
        if !stats.by_source.is_empty() {
            println!("  By source:");
            for source in &stats.by_source {
                println!(
                    "    {:<17} {:>4} artifact(s), {} stored",
                    source.source.as_str(),
                    source.count,
                    format_bytes(source.total_size)
                );
            }
        }
        if !stats.largest.is_empty() {
            println!("  Largest:");
            for entry in &stats.largest {
                println!("    {:>10}  {}", format_bytes(entry.size_bytes), entry.identifier);
            }
        }
        Ok(())
    }

    pub fn synced(&self, reports: &[SyncReport], plan: &DedupPlan) -> Result<()> {
        if self.json {
            return self.print_json(&json!({ "sources": reports, "dedup": plan }));
        }
        for report in reports {
            println!(
                "{}: {} new, {} updated, {} unchanged",
                report.source, report.inserted, report.updated, report.unchanged
            );
            for failure in &report.failures {
                println!("  ✗ {}: {}", failure.name, failure.message);
            }
            for missing in &report.missing {
                println!("  ? {missing} is no longer present");
            }
        }
        render_plan(plan);
        if !plan.actions.is_empty() {
            println!("Run `hoard clean` to deduplicate.");
        }
        Ok(())
    }

    pub fn cleaned(
        &self,
        report: &CleanReport,
        plan: &DedupPlan,
        applied: Option<&ApplyReport>,
    ) -> Result<()> {
        if self.json {
            return self.print_json(&json!({
                "clean": report,
                "dedup": plan,
                "applied": applied,
            }));
        }

        let verb = if report.dry_run { "Would remove" } else { "Removed" };
        if report.removed.is_empty() {
            println!("No orphaned artifacts.");
        }
        for entry in &report.removed {
            println!("{verb} {} ({})", entry.identifier, format_bytes(entry.size_bytes));
        }
        for identifier in &report.skipped_protected {
            println!("Skipped {identifier} (owned by another tool)");
        }
        for failure in &report.failures {
            println!("  ✗ {}: {}", failure.name, failure.message);
        }
        if report.reclaimed_bytes > 0 {
            let verb = if report.dry_run { "Would reclaim" } else { "Reclaimed" };
            println!("{verb} {}", format_bytes(report.reclaimed_bytes));
        }

        render_plan(plan);
        if let Some(applied) = applied {
            println!(
                "✓ Linked {} duplicate(s), reclaimed {}",
                applied.linked.len(),
                format_bytes(applied.reclaimed_bytes)
            );
            for failure in &applied.failures {
                println!("  ✗ {}: {}", failure.name, failure.message);
            }
        } else if !report.dry_run && !plan.actions.is_empty() {
            println!("Deduplication not applied.");
        }
        Ok(())
    }

    pub fn config_value(&self, key: &str, value: &toml::Value) -> Result<()> {
        if self.json {
            let mut object = serde_json::Map::new();
            object.insert(key.to_string(), serde_json::to_value(value)?);
            return self.print_json(&object);
        }
        match value {
            toml::Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        }
        Ok(())
    }

    pub fn config_table(&self, table: &toml::Table) -> Result<()> {
        if self.json {
            return self.print_json(table);
        }
        print!("{}", toml::to_string_pretty(table)?);
        Ok(())
    }
}

fn render_plan(plan: &DedupPlan) {
    if plan.groups.is_empty() {
        println!("No duplicates found.");
    }
    for group in &plan.groups {
        println!(
            "Duplicate {} ({}): {} kept",
            &group.content_hash.to_hex()[..12],
            format_bytes(group.size_bytes),
            group.canonical
        );
        for duplicate in &group.duplicates {
            println!("  = {duplicate}");
        }
    }
    for rejected in &plan.rejected {
        println!(
            "Not merged (content differs): {}",
            rejected.identifiers.join(", ")
        );
    }
    for failure in &plan.failures {
        println!("  ✗ could not hash {}: {}", failure.identifier, failure.message);
    }
    if plan.savings_bytes > 0 {
        println!("Potential savings: {}", format_bytes(plan.savings_bytes));
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}
