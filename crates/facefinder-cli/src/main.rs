use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefinder_cloud::{FaceClient, GraphDirectory};
use facefinder_core::{
    person_from_directory, DirectoryService, FaceMatch, FaceService, IdentifyWorkflow, Person,
    Photo, WorkflowState,
};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facefinder", about = "Find a directory user in a photo with the Face API")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facefinder/config.toml)
    #[arg(short, long, global = true, env = "FACEFINDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List users in the directory
    Users,
    /// Register a reference person and look for them in a photo
    Identify {
        /// Photo to search
        #[arg(short, long)]
        photo: PathBuf,
        /// Directory user to look for (their profile photo is the reference)
        #[arg(long, conflicts_with = "person_photo", required_unless_present = "person_photo")]
        upn: Option<String>,
        /// Local reference photo of the person
        #[arg(long, requires = "name")]
        person_photo: Option<PathBuf>,
        /// Display name for --person-photo
        #[arg(long, conflicts_with = "upn")]
        name: Option<String>,
        /// Person group to register into (overrides the config)
        #[arg(long)]
        group: Option<String>,
        /// Use a newly generated person group instead of the configured one
        #[arg(long, conflicts_with = "group")]
        fresh_group: bool,
        /// Write the matched face crops as PNG into this directory
        #[arg(long)]
        crops: Option<PathBuf>,
    },
    /// Show the training status of a person group
    Training {
        /// Person group (default: from config)
        #[arg(long)]
        group: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Users => list_users(&config).await,
        Commands::Identify {
            photo,
            upn,
            person_photo,
            name,
            group,
            fresh_group,
            crops,
        } => {
            let group = match (group, fresh_group) {
                (Some(g), _) => Some(g),
                (None, true) => Some(format!("facefinder-{}", uuid::Uuid::new_v4())),
                (None, false) => None,
            };
            let source = match (upn, person_photo, name) {
                (Some(upn), _, _) => PersonSource::Directory(upn),
                (None, Some(path), Some(name)) => PersonSource::File { name, path },
                _ => anyhow::bail!("either --upn or --person-photo with --name is required"),
            };
            identify(&config, source, &photo, group, crops.as_deref()).await
        }
        Commands::Training { group } => training(&config, group).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
    }
}

enum PersonSource {
    Directory(String),
    File { name: String, path: PathBuf },
}

fn face_client(config: &Config) -> Result<FaceClient> {
    let key = config.subscription_key()?;
    Ok(FaceClient::new(&config.face_endpoint, key)?)
}

fn directory(config: &Config) -> Result<GraphDirectory> {
    Ok(GraphDirectory::new(&config.graph_endpoint, config.access_token()?)?)
}

async fn list_users(config: &Config) -> Result<()> {
    let users = directory(config)?
        .list_users()
        .await
        .context("failed to list directory users")?;

    if users.is_empty() {
        println!("No users found");
    }
    for user in users {
        println!("{:<32} {}", user.display_name, user.user_principal_name);
    }
    Ok(())
}

async fn identify(
    config: &Config,
    source: PersonSource,
    photo_path: &Path,
    group: Option<String>,
    crops: Option<&Path>,
) -> Result<()> {
    let client = face_client(config)?;

    let person: Person = match source {
        PersonSource::Directory(upn) => person_from_directory(&directory(config)?, &upn)
            .await
            .with_context(|| format!("failed to load {upn} from the directory"))?,
        PersonSource::File { name, path } => Person::from_file(name, &path)
            .with_context(|| format!("failed to load reference photo {}", path.display()))?,
    };
    let photo = Photo::open(photo_path)
        .with_context(|| format!("failed to load photo {}", photo_path.display()))?;

    let mut workflow_config = config.workflow();
    if let Some(group) = group {
        workflow_config.person_group_id = group;
    }
    tracing::info!(
        person = %person.name,
        group = %workflow_config.person_group_id,
        photo = %photo_path.display(),
        "starting identify workflow"
    );

    let workflow = IdentifyWorkflow::new(client, workflow_config);
    let progress = tokio::spawn(print_progress(workflow.subscribe()));

    let outcome = workflow.run(&person, &photo).await;
    drop(workflow);
    join_progress(progress).await;

    let matches = outcome.context("identify workflow failed")?;
    report(&person, &photo, &matches, crops)
}

async fn join_progress(handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "progress printer stopped abnormally");
            false
        }
    }
}

/// Print progress as it is observed until the workflow is dropped.
///
/// The channel only holds the latest state, so a step that finishes before
/// this task wakes is not printed; the workflow's `info` log has every step.
async fn print_progress(mut rx: tokio::sync::watch::Receiver<WorkflowState>) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        match state {
            WorkflowState::Running { step, attempt: 1 } => println!("... {step}"),
            WorkflowState::Running { step, attempt } => println!("... {step} (check {attempt})"),
            WorkflowState::Idle | WorkflowState::Finished { .. } | WorkflowState::Failed { .. } => {}
        }
    }
}

fn report(person: &Person, photo: &Photo, matches: &[FaceMatch], crops: Option<&Path>) -> Result<()> {
    if matches.is_empty() {
        println!("{} was not found in the photo", person.name);
        return Ok(());
    }

    println!("Found {} in {} face(s):", person.name, matches.len());
    for (i, m) in matches.iter().enumerate() {
        println!();
        print!("{}", m.report());

        if let Some(dir) = crops {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join(format!("match-{}.png", i + 1));
            match photo.crop(&m.face.face_rectangle).and_then(|crop| crop.save(&path)) {
                Ok(()) => println!("crop   : {}", path.display()),
                Err(e) => tracing::warn!(
                    face_id = %m.face.face_id,
                    path = %path.display(),
                    error = %e,
                    "skipping face crop"
                ),
            }
        }
    }
    Ok(())
}

async fn training(config: &Config, group: Option<String>) -> Result<()> {
    let group = group.unwrap_or_else(|| config.person_group.clone());
    let status = face_client(config)?
        .training_status(&group)
        .await
        .with_context(|| format!("failed to get training status for {group}"))?;

    println!("group       : {group}");
    println!("status      : {}", status.status);
    if let Some(created) = status.created_date_time {
        println!("created     : {created}");
    }
    if let Some(last) = status.last_action_date_time {
        println!("last action : {last}");
    }
    if let Some(message) = status.message {
        println!("message     : {message}");
    }
    Ok(())
}
