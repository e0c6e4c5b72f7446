use crate::cli::GenerateArgs;
use crate::config::AppConfig;

/// Drive the config generator once over the configured model directories,
/// the thin operator-convenience entry point the core doesn't scrutinize
/// (§6 "Thin CLI").
pub async fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let cfg = AppConfig::load_or_default()?;
    let dirs = if args.dirs.is_empty() {
        cfg.model_dirs.clone()
    } else {
        args.dirs.clone()
    };

    if dirs.is_empty() {
        anyhow::bail!("no model directories configured; pass --dir or set model_dirs in config");
    }

    let mut models = Vec::new();
    let mut projector_bindings = Vec::new();
    let mut incomplete_splits = Vec::new();
    for dir in &dirs {
        let report = model_detector::scan_directory_bounded(
            dir,
            model_detector::DEFAULT_SCAN_CONCURRENCY,
        )
        .await
        .map_err(|e| anyhow::anyhow!("scanning {}: {e}", dir.display()))?;
        models.extend(report.models);
        projector_bindings.extend(report.projector_bindings);
        incomplete_splits.extend(report.incomplete_splits);
    }

    for incomplete in &incomplete_splits {
        eprintln!(
            "warning: incomplete split-file group for {} (declared {} parts, found {})",
            incomplete.base_name.display(),
            incomplete.declared_total,
            incomplete.observed_parts.len()
        );
    }

    let scan = model_detector::ScanReport {
        models,
        projector_bindings,
        incomplete_splits,
    };

    let snapshot = hw_probe::probe(&hw_probe::ProbeOverrides::default());

    let provision_options = binary_provisioner::ProvisionOptions {
        managed_dir: AppConfig::config_dir().join("bin"),
        ..Default::default()
    };
    let provision = binary_provisioner::provision(&snapshot, &provision_options)
        .await
        .map_err(|e| anyhow::anyhow!("provisioning inference binary: {e}"))?;

    let options = config_gen::GenerateOptions {
        binary_path: provision.executable_path.display().to_string(),
        min_free_memory_percent: cfg.min_free_memory_percent as u8,
        download_dir: cfg.download_dir.display().to_string(),
        planner: cfg.planner_options(),
        ..Default::default()
    };

    let (doc, errors) = config_gen::generate(&scan, &snapshot, &options);
    for err in &errors {
        eprintln!("warning: skipped {}: {}", err.path.display(), err.reason);
    }

    let output_path = args
        .output
        .unwrap_or_else(|| cfg.runtime_config_path());
    let now = chrono::Utc::now();
    config_gen::write_to_file(&doc, &now, &output_path)?;

    println!(
        "wrote {} models ({} skipped) to {}",
        doc.models.len(),
        errors.len(),
        output_path.display()
    );
    Ok(())
}
