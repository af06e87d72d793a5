use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use stevedore::cli::{Args, BuildDescriptor, Commands};
use stevedore::model::ExposedEndpoint;
use stevedore::{BuildSession, BuildSessionConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stevedore=info".into()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Run {
            file,
            docker_host,
            docker_port,
            endpoints_file,
            command,
        } => run_build(&file, docker_host, docker_port, endpoints_file, command).await,
        Commands::Validate { file } => validate(&file),
    }
}

/// Full lifecycle: build, start, expose, run the wrapped command, and —
/// no matter how far that got — stop containers and remove images.
async fn run_build(
    file: &Path,
    docker_host: Option<String>,
    docker_port: Option<u16>,
    endpoints_file: Option<PathBuf>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let descriptor = BuildDescriptor::from_toml_file(file)?;
    let base_dir = file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    let session_config = BuildSessionConfig {
        docker_host: docker_host.or_else(|| descriptor.docker_host.clone()),
        docker_port: docker_port.or(descriptor.docker_port),
    };
    let mut session = BuildSession::connect(&session_config)?;

    let result = run_phases(&mut session, &descriptor, &base_dir, endpoints_file, command).await;

    // Teardown always runs, also after a failed phase or test command.
    session.stop_containers().await;
    session.remove_images().await;

    if let Err(err) = &result {
        error!("Build failed: {:#}", err);
    }
    result
}

async fn run_phases(
    session: &mut BuildSession,
    descriptor: &BuildDescriptor,
    base_dir: &Path,
    endpoints_file: Option<PathBuf>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let images = descriptor.image_specs(base_dir);
    let containers = descriptor.container_specs();

    if !images.is_empty() {
        let built = session.build_images(&images).await?;
        info!("Built {} image(s)", built.len());
    }
    if !containers.is_empty() {
        session.start_containers(&containers).await?;
        info!("Started {} container(s)", containers.len());
    }

    let properties = session.endpoint_properties();
    for (key, value) in &properties {
        println!("{key}={value}");
    }
    if let Some(path) = endpoints_file {
        write_properties(&path, &properties)
            .with_context(|| format!("cannot write endpoints file {path:?}"))?;
        info!("Wrote {} endpoint properties to {:?}", properties.len(), path);
    }

    if !command.is_empty() {
        run_wrapped_command(&command, &session.expose_endpoints()).await?;
    }
    Ok(())
}

/// Run the wrapped command (usually the test suite) with the endpoint
/// map injected into its environment.
async fn run_wrapped_command(
    command: &[String],
    endpoints: &BTreeMap<String, Vec<ExposedEndpoint>>,
) -> anyhow::Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    info!("Running wrapped command: {}", command.join(" "));

    let mut child = tokio::process::Command::new(program);
    child.args(args);
    for (start_id, list) in endpoints {
        for endpoint in list {
            let prefix = env_var_name(&format!("{start_id}.{}", endpoint.private_port));
            child.env(format!("{prefix}_HOST"), &endpoint.host);
            child.env(format!("{prefix}_PORT"), endpoint.host_port.to_string());
        }
    }

    let status = child
        .status()
        .await
        .with_context(|| format!("cannot run {program:?}"))?;
    if !status.success() {
        bail!("wrapped command exited with {status}");
    }
    Ok(())
}

/// `c1.80/tcp` becomes `C1_80_TCP`, a legal environment variable stem.
fn env_var_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn write_properties(path: &Path, properties: &[(String, String)]) -> std::io::Result<()> {
    let mut content = String::new();
    for (key, value) in properties {
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    std::fs::write(path, content)
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let descriptor = BuildDescriptor::from_toml_file(file)?;
    println!(
        "{:?}: {} image(s), {} container(s)",
        file,
        descriptor.images.len(),
        descriptor.containers.len()
    );
    for image in &descriptor.images {
        println!("  image {} ({})", image.id, image.name_and_tag.as_deref().unwrap_or("untagged"));
    }
    for container in &descriptor.containers {
        let readiness = match &container.wait_for_startup {
            Some(pattern) => format!(", waits for /{pattern}/"),
            None => String::new(),
        };
        println!("  container {} from {}{}", container.id, container.image, readiness);
    }
    if descriptor.images.is_empty() && descriptor.containers.is_empty() {
        warn!("Descriptor declares nothing to build or start");
    }
    println!("OK");
    Ok(())
}
