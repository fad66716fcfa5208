//! Deterministic identifiers for output models.
//!
//! An ID is the hex SHA-256 of the model name and its identifying values,
//! truncated to 16 bytes. The same inputs always produce the same ID, so a
//! record re-exported by a later run or a webhook replaces the earlier one.

use sha2::{Digest, Sha256};

/// Ref type stamped on every model this connector writes.
pub const REF_TYPE: &str = "gitlab";

/// Hash arbitrary values into a 32-character hex ID.
pub fn hash_values(values: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

fn model_id(model: &str, customer_id: &str, ref_id: &str) -> String {
    hash_values(&[model, customer_id, ref_id, REF_TYPE])
}

fn scoped_id(model: &str, customer_id: &str, ref_id: &str, parent_id: &str) -> String {
    hash_values(&[model, customer_id, ref_id, REF_TYPE, parent_id])
}

pub fn repo_id(customer_id: &str, ref_id: &str) -> String {
    model_id("sourcecode.Repo", customer_id, ref_id)
}

pub fn user_id(customer_id: &str, ref_id: &str) -> String {
    model_id("sourcecode.User", customer_id, ref_id)
}

pub fn pull_request_id(customer_id: &str, ref_id: &str, repo_id: &str) -> String {
    scoped_id("sourcecode.PullRequest", customer_id, ref_id, repo_id)
}

pub fn commit_id(customer_id: &str, sha: &str, repo_id: &str) -> String {
    scoped_id("sourcecode.Commit", customer_id, sha, repo_id)
}

pub fn pull_request_commit_id(customer_id: &str, sha: &str, repo_id: &str) -> String {
    scoped_id("sourcecode.PullRequestCommit", customer_id, sha, repo_id)
}

pub fn pull_request_review_id(customer_id: &str, ref_id: &str, repo_id: &str) -> String {
    scoped_id("sourcecode.PullRequestReview", customer_id, ref_id, repo_id)
}

pub fn pull_request_comment_id(customer_id: &str, ref_id: &str, repo_id: &str) -> String {
    scoped_id("sourcecode.PullRequestComment", customer_id, ref_id, repo_id)
}

/// Branch IDs are keyed by the branch's first commit so a recreated branch
/// with the same name is a different branch.
pub fn branch_id(customer_id: &str, repo_id: &str, branch: &str, first_commit_id: &str) -> String {
    hash_values(&[
        "sourcecode.Branch",
        REF_TYPE,
        repo_id,
        customer_id,
        branch,
        first_commit_id,
    ])
}

/// Commit authors are identified by a hash of their email.
pub fn commit_email_id(customer_id: &str, email: &str) -> String {
    hash_values(&[customer_id, email])
}

pub fn project_id(customer_id: &str, ref_id: &str) -> String {
    model_id("work.Project", customer_id, ref_id)
}

pub fn project_capability_id(customer_id: &str, ref_id: &str) -> String {
    model_id("work.ProjectCapability", customer_id, ref_id)
}

pub fn work_user_id(customer_id: &str, ref_id: &str) -> String {
    model_id("work.User", customer_id, ref_id)
}

pub fn issue_id(customer_id: &str, ref_id: &str) -> String {
    model_id("work.Issue", customer_id, ref_id)
}

pub fn issue_type_id(customer_id: &str, name: &str) -> String {
    model_id("work.IssueType", customer_id, name)
}

pub fn issue_status_id(customer_id: &str, name: &str) -> String {
    model_id("work.IssueStatus", customer_id, name)
}

pub fn sprint_id(customer_id: &str, ref_id: &str) -> String {
    model_id("agile.Sprint", customer_id, ref_id)
}

pub fn board_id(customer_id: &str, ref_id: &str) -> String {
    model_id("agile.Board", customer_id, ref_id)
}

pub fn kanban_id(customer_id: &str, ref_id: &str) -> String {
    model_id("agile.Kanban", customer_id, ref_id)
}
