use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pr_tracker::client::AdoClient;
use pr_tracker::reconcile::{self, Reconciler};
use pr_tracker::repo::GitRepoApi;
use pr_tracker::workitem::WorkItemApi;
use pr_tracker::{config, report, sheet};

/// PR Tracker — reconciles a work item's linked pull requests and branches
/// against live repository state: which files changed, and is everything
/// merged into the target branch?
#[derive(Parser, Debug)]
#[command(name = "pr-tracker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Changed-file report for a work item's pull requests on a branch
    ChangedPaths {
        work_item_id: u64,
        /// Target branch (short name, e.g. "main")
        branch: String,
        /// Use the work item's branch links and all completed PRs instead
        /// of its pull-request links
        #[arg(long)]
        by_repo: bool,
    },

    /// Changed-file report from a direct diff between two branches
    DiffBranch {
        repo_id: String,
        source_branch: String,
        target_branch: String,
    },

    /// Check whether every linked pull request is merged into the branch
    CheckMerged { work_item_id: u64, branch: String },

    /// Changed-file report driven by a spreadsheet's repo/PR mapping
    SheetPaths {
        /// Workbook with repository ids in column 1, PR ids in column 2
        file: PathBuf,
    },

    /// Download the newest work-item attachment with the given file name
    FetchAttachment { work_item_id: u64, file_name: String },

    /// Add a branch artifact link to a work item
    LinkBranch {
        work_item_id: u64,
        repo_name: String,
        branch: String,
    },

    /// Print the work item's code-review accepted date
    ShowReviewDate { work_item_id: u64 },

    /// Set the work item's code-review accepted date to now
    TouchReviewDate { work_item_id: u64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "operation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();

    info!("loading configuration");
    let config = config::Config::load()?;
    let client = AdoClient::new(&config);
    let repos = GitRepoApi::new(client.clone());
    let work_items = WorkItemApi::new(client);

    match cli.command {
        Command::ChangedPaths {
            work_item_id,
            branch,
            by_repo,
        } => {
            let engine = Reconciler::new(work_items, repos);
            let paths = if by_repo {
                info!(work_item_id, branch = %branch, "building report from branch links");
                engine.changed_paths_by_repo(work_item_id, &branch).await?
            } else {
                info!(work_item_id, branch = %branch, "building report from pull-request links");
                engine.changed_paths_by_pr(work_item_id, &branch).await?
            };
            report::print_changed_paths(&paths);
        }

        Command::DiffBranch {
            repo_id,
            source_branch,
            target_branch,
        } => {
            info!(repo_id = %repo_id, source_branch = %source_branch, target_branch = %target_branch, "diffing branches");
            let paths = repos
                .changed_paths_by_diff(&repo_id, &source_branch, &target_branch)
                .await?;
            let repo_name = repos.repo_name(&repo_id).await?;
            report::print_changed_paths(&[reconcile::RepoChangedPaths {
                repo_id,
                repo_name,
                paths,
            }]);
        }

        Command::CheckMerged {
            work_item_id,
            branch,
        } => {
            info!(work_item_id, branch = %branch, "checking merge state");
            let engine = Reconciler::new(work_items, repos);
            let merge_report = engine.check_merged(work_item_id, &branch).await?;
            report::print_merge_report(&merge_report);
            if !merge_report.is_all_merged() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::SheetPaths { file } => {
            info!(file = %file.display(), "reading repository groups from sheet");
            let groups = sheet::repo_groups(&file)?;
            let engine = Reconciler::new(work_items, repos);
            let paths = engine.merged_paths(groups).await?;
            report::print_changed_paths(&paths);
        }

        Command::FetchAttachment {
            work_item_id,
            file_name,
        } => {
            info!(work_item_id, file_name = %file_name, "fetching attachment");
            match work_items
                .download_named_attachment(work_item_id, &file_name)
                .await?
            {
                Some(path) => println!("{}", path.display()),
                None => {
                    info!("no attachment with that name");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Command::LinkBranch {
            work_item_id,
            repo_name,
            branch,
        } => {
            info!(work_item_id, repo_name = %repo_name, branch = %branch, "adding branch link");
            let repo_id = repos.repo_id(&repo_name).await?;
            work_items
                .add_branch_link(work_item_id, &repo_id, &repo_name, &branch)
                .await?;
        }

        Command::ShowReviewDate { work_item_id } => {
            info!(work_item_id, "reading review accepted date");
            let date = work_items.accepted_date(work_item_id).await?;
            println!("{}", date.to_rfc3339());
        }

        Command::TouchReviewDate { work_item_id } => {
            info!(work_item_id, "updating review accepted date");
            work_items.touch_accepted_date(work_item_id).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
