use colored::Colorize;

use crate::reconcile::{MergeReport, RepoChangedPaths};

/// Print the per-repository changed-path report: a repository header
/// followed by one `<change kind, left-justified to 10>: <path>` line per
/// path. Paths arrive deduplicated and lexicographically sorted.
pub fn print_changed_paths(report: &[RepoChangedPaths]) {
    for repo in report {
        println!("{}", format!("■ {}", repo.repo_name).bold());
        for (path, kind) in &repo.paths {
            println!("{}", format_path_line(kind, path));
        }
        println!();
    }
}

/// Print the merge reconciliation report and overall verdict.
pub fn print_merge_report(report: &MergeReport) {
    for repo in &report.repos {
        println!("{}", format!("■ {}", repo.repo_name).bold());
        println!("== merged ==");
        println!("{:?}", repo.merged);
        println!("== not merged ==");
        println!("{:?}", repo.not_merged);
        println!();
    }

    if report.is_all_merged() {
        println!("{}", "all pull requests merged".green());
    } else {
        println!("{}", "unmerged pull requests remain".red());
    }
}

fn format_path_line(kind: &str, path: &str) -> String {
    format!("{kind:<10}: {path}")
}
