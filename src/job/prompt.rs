//! Task text handed to the generation tool.

use crate::tracker::Issue;

/// Branch the tool is asked to push its work to.
pub fn branch_name(issue_id: u64) -> String {
    format!("fix/issue-{issue_id}")
}

/// Render the task for one issue.
///
/// The body is passed through verbatim; quoting for a shell is the
/// backend's concern.
pub fn render_task(repo: &str, issue: &Issue) -> String {
    let id = issue.id;
    let branch = branch_name(id);
    format!(
        "You are working on the {repo} repository.\n\
         Implement the following GitHub issue completely, then create a pull request.\n\
         \n\
         Issue #{id}: {title}\n\
         \n\
         {body}\n\
         \n\
         Instructions:\n\
         - Make all necessary code changes\n\
         - Follow existing code patterns and conventions\n\
         - Create a PR with a clear description referencing issue #{id}\n\
         - Branch name: {branch}\n",
        title = issue.title,
        body = issue.body,
    )
}
