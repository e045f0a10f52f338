//! shed - tool shed repository and tool dependency installer
//!
//! Usage:
//!   shed install --tool-shed <url> --name <n> --owner <o> --revision <r>
//!   shed install-deps <repository_dir> --name <n> --owner <o> --revision <r>
//!   shed order <batch.json>

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolshed_installer::core::model::tool_dependency_install_dir;
use toolshed_installer::core::{InMemoryRegistry, JsonStatusStore, RepositoryStatus, StatusStore};
use toolshed_installer::recipe::Platform;
use toolshed_installer::recipe::tags::read_entries;
use toolshed_installer::repository::collaborators::{TOOL_DEPENDENCY_CONFIG, find_config_file};
use toolshed_installer::repository::catalog::parse_repo_info_dict;
use toolshed_installer::repository::{
    ContainerMerger, Folder, GitVcs, HttpCatalog, RepoInfoDict,
    order_components_for_installation,
};
use toolshed_installer::{
    Dependency, InstallOptions, InstallRepositoryManager, InstallToolDependencyManager,
    InstallerConfig, StepManager, ToolShedRepository, output,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shed")]
#[command(about = "Install tool shed repositories and their tool dependencies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $SHED_INSTALLER_CONFIG or the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a repository revision from a tool shed
    Install {
        #[arg(long, env = "TOOL_SHED_URL")]
        tool_shed: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        revision: String,
        /// Also install repositories this one depends on
        #[arg(long)]
        repository_dependencies: bool,
        /// Also install tool dependencies
        #[arg(long)]
        tool_dependencies: bool,
        #[arg(long, default_value = "")]
        section_id: String,
        #[arg(long, default_value = "")]
        section_label: String,
        #[arg(long)]
        shed_tool_conf: Option<String>,
    },

    /// Run a repository's tool_dependencies.xml
    InstallDeps {
        /// Directory containing tool_dependencies.xml
        repository_dir: PathBuf,
        #[arg(long, default_value = "local")]
        tool_shed: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        revision: String,
        /// Only these dependencies (all if not specified)
        #[arg(long = "only")]
        only: Vec<String>,
    },

    /// Print the installation order of a batch
    Order {
        /// JSON list of {tool_shed, name, owner, changeset_revision, repo_info}
        batch: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "toolshed_installer=debug"
    } else {
        "toolshed_installer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = InstallerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Install {
            tool_shed,
            name,
            owner,
            revision,
            repository_dependencies,
            tool_dependencies,
            section_id,
            section_label,
            shed_tool_conf,
        } => {
            let options = InstallOptions {
                install_repository_dependencies: repository_dependencies,
                install_tool_dependencies: tool_dependencies,
                new_tool_panel_section_label: section_label,
                shed_tool_conf,
                tool_panel_section_id: section_id,
            };
            install(config, &tool_shed, &name, &owner, &revision, &options)?;
        }

        Commands::InstallDeps {
            repository_dir,
            tool_shed,
            name,
            owner,
            revision,
            only,
        } => {
            let repository = ToolShedRepository::new(tool_shed, name, owner, revision);
            install_deps(config, repository, &repository_dir, &only)?;
        }

        Commands::Order { batch } => order(&batch)?,
    }

    Ok(())
}

fn open_store(config: &InstallerConfig) -> Result<Arc<JsonStatusStore>> {
    let store = JsonStatusStore::open(&config.state_dir)
        .with_context(|| format!("Failed to open status store in {}", config.state_dir.display()))?;
    Ok(Arc::new(store))
}

fn install(
    config: InstallerConfig,
    tool_shed: &str,
    name: &str,
    owner: &str,
    revision: &str,
    options: &InstallOptions,
) -> Result<()> {
    let store = open_store(&config)?;
    let manage = config.manage_dependency_relationships;
    let executor = StepManager::new(config.http_timeout);
    let catalog = HttpCatalog::new(config.http_timeout);
    let mut manager = InstallRepositoryManager::new(
        config,
        Box::new(catalog),
        Box::new(GitVcs),
        store,
        Box::new(executor),
    );
    if manage {
        manager = manager.with_registry(Arc::new(InMemoryRegistry::new()));
    }

    output::action(&format!("Installing {}/{} ({}) from {}", owner, name, revision, tool_shed));
    let repositories = manager
        .install(tool_shed, name, owner, revision, options)
        .with_context(|| format!("Failed to install {}/{}", owner, name))?;

    let mut failed = 0;
    for repository in &repositories {
        let ok = repository.status == RepositoryStatus::Installed;
        if !ok {
            failed += 1;
        }
        output::status_row(
            &repository.name,
            &repository.changeset_revision,
            &repository.status.to_string(),
            ok,
        );
        for dependency in &repository.tool_dependencies {
            output::status_row(
                &format!("  {}", dependency.name),
                dependency.display_version(),
                &dependency.status.to_string(),
                dependency.is_installed(),
            );
        }
        if let Some(message) = &repository.error_message {
            output::detail(message);
        }
    }
    if failed > 0 {
        bail!("{} of {} repositories failed to install", failed, repositories.len());
    }
    Ok(())
}

fn install_deps(
    config: InstallerConfig,
    repository: ToolShedRepository,
    repository_dir: &Path,
    only: &[String],
) -> Result<()> {
    let root = config.require_tool_dependency_dir()?.to_path_buf();
    let recipe_path = find_config_file(TOOL_DEPENDENCY_CONFIG, repository_dir)
        .with_context(|| format!("No {} in {}", TOOL_DEPENDENCY_CONFIG, repository_dir.display()))?;
    let recipe = std::fs::read_to_string(&recipe_path)
        .with_context(|| format!("Failed to read {}", recipe_path.display()))?;

    let store = open_store(&config)?;
    let repository = store.create_or_update_repository(repository)?;

    let requested: Vec<Dependency> = read_entries(&recipe)?
        .iter()
        .filter(|entry| entry.is_installable())
        .filter_map(|entry| entry.identity())
        .filter(|(name, _, _)| only.is_empty() || only.iter().any(|o| o == name))
        .map(|(name, version, dep_type)| {
            let existing = repository
                .tool_dependencies
                .iter()
                .find(|d| d.identity() == (name, version, dep_type));
            existing.cloned().unwrap_or_else(|| {
                let install_dir = tool_dependency_install_dir(&root, &repository, dep_type, name, version);
                Dependency::new(name, version.map(str::to_string), dep_type, install_dir)
            })
        })
        .collect();
    if requested.is_empty() {
        output::info("Nothing to install");
        return Ok(());
    }

    let platform = Platform::with_overrides(
        config.os_override.as_deref(),
        config.architecture_override.as_deref(),
    );
    let manager = InstallToolDependencyManager::new(
        Box::new(StepManager::new(config.http_timeout)),
        store,
        platform,
    );
    output::action(&format!(
        "Installing {} tool dependencies for {} on {}",
        requested.len(),
        repository.name,
        manager.platform()
    ));
    let repository_dir = std::path::absolute(repository_dir)?;
    let results = manager.install_specified(&repository, Some(&repository_dir), &recipe, &requested)?;

    let failed = results.iter().filter(|d| d.is_error()).count();
    for dependency in results.iter().filter(|d| d.is_error()) {
        if let Some(message) = &dependency.error_message {
            output::error(&format!("{}: {}", dependency.name, message));
        }
    }
    if failed > 0 {
        bail!("{} of {} tool dependencies failed to install", failed, results.len());
    }
    output::success(&format!("{} tool dependencies installed", results.len()));
    Ok(())
}

#[derive(Deserialize)]
struct BatchEntry {
    tool_shed: String,
    name: String,
    owner: String,
    changeset_revision: String,
    repo_info: serde_json::Value,
    #[serde(default)]
    tool_panel_section_key: Option<String>,
}

fn order(batch_path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(batch_path)
        .with_context(|| format!("Failed to read {}", batch_path.display()))?;
    let entries: Vec<BatchEntry> =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", batch_path.display()))?;

    let mut ids = Vec::new();
    let mut infos: Vec<RepoInfoDict> = Vec::new();
    let mut keys = Vec::new();
    for entry in entries {
        let repository = ToolShedRepository::new(entry.tool_shed, entry.name, entry.owner, entry.changeset_revision);
        let info = parse_repo_info_dict(&entry.repo_info)
            .with_context(|| format!("Invalid repo_info for {}", repository.name))?;
        ids.push(repository.id);
        infos.push(info);
        keys.push(entry.tool_panel_section_key);
    }

    let ordered = order_components_for_installation(&ids, &infos, &keys);
    output::info(&format!("Install order ({} repositories):", ordered.ids.len()));
    for (index, id) in ordered.ids.iter().enumerate() {
        match &ordered.tool_panel_section_keys[index] {
            Some(key) => println!("  {}. {} [{}]", index + 1, id, key),
            None => println!("  {}. {}", index + 1, id),
        }
    }

    let merged = ContainerMerger::new().containers_for_new_install(&ordered.repo_info_dicts);
    for root in [&merged.repository_dependencies, &merged.tool_dependencies]
        .into_iter()
        .flatten()
    {
        print_folder(root, 0);
    }
    Ok(())
}

fn print_folder(folder: &Folder, depth: usize) {
    let indent = "  ".repeat(depth);
    if folder.key != "root" {
        println!("{}{}", indent, folder.label);
    }
    for rd in folder.repository_dependencies.iter().filter(|rd| !rd.is_header) {
        println!("{}  {}/{} ({})", indent, rd.owner, rd.name, rd.changeset_revision);
    }
    for td in folder.tool_dependencies.iter().filter(|td| !td.is_header) {
        println!("{}  {} {} ({})", indent, td.name, td.version.as_deref().unwrap_or("-"), td.dep_type);
    }
    for child in &folder.folders {
        print_folder(child, depth + 1);
    }
}
