/// Configuration Dump - prints one processed configuration type as YAML
///
/// Usage: config_dump <root> <context> <type> [path]
///
/// Packages are the directories below `<root>/Packages`, in name order.
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use strata_config::{ConfigurationManager, Package};
use strata_core::{init_tracing, ApplicationContext, TelemetryConfig};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 || args.len() > 5 {
        eprintln!("Usage: config_dump <root> <context> <type> [path]");
        eprintln!();
        eprintln!("Example:");
        eprintln!("  config_dump /var/www/app Production/Staging Settings Neos.Flow.core");
        process::exit(1);
    }

    if let Err(e) = init_tracing(&TelemetryConfig::from_env()) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let root = PathBuf::from(&args[1]);
    let context = match ApplicationContext::new(&args[2]) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let configuration_type = &args[3];
    let path = args.get(4).map(String::as_str);

    let packages = match discover_packages(&root) {
        Ok(packages) => packages,
        Err(e) => {
            eprintln!("Failed to list packages below {}: {}", root.display(), e);
            process::exit(1);
        }
    };
    tracing::info!(
        root = %root.display(),
        context = %context,
        packages = packages.len(),
        "Dumping configuration"
    );

    let manager = ConfigurationManager::new(context)
        .with_default_types(&root, root.join("Data").join("Temporary"))
        .with_packages(packages);

    let value = match manager.get_configuration(configuration_type, path) {
        Ok(Some(value)) => value,
        Ok(None) => {
            eprintln!("No configuration at {} in {}", path.unwrap_or_default(), configuration_type);
            process::exit(2);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    match serde_yaml::to_string(&value) {
        Ok(yaml) => print!("{}", yaml),
        Err(e) => {
            eprintln!("Failed to render configuration: {}", e);
            process::exit(1);
        }
    }
}

fn discover_packages(root: &Path) -> std::io::Result<Vec<Package>> {
    let packages_directory = root.join("Packages");
    if !packages_directory.is_dir() {
        return Ok(Vec::new());
    }
    let mut packages = Vec::new();
    for entry in fs::read_dir(&packages_directory)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(key) = path.file_name().and_then(|name| name.to_str()) {
            packages.push(Package::new(key, path.clone()));
        }
    }
    packages.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(packages)
}
