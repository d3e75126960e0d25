//! Shell-command tasks and task collection from configuration

use std::path::Path;
use std::process::Command;

use anyhow::bail;
use tracing::{debug, instrument};

use cairn_core::{Config, TaskConfig};

use crate::node::NodeRef;
use crate::nodes::{GlobNode, PathNode};
use crate::signature::Signature;
use crate::task::{Marker, Task, TaskContext, TaskId, TaskOutput};

/// A task that runs `command` through `sh -c` in `root`.
///
/// The command string is the task's fingerprint, so editing it makes the task
/// stale.
pub fn shell_task(id: impl Into<String>, command: impl Into<String>, root: &Path) -> Task {
    let command = command.into();
    let fingerprint = Signature::of_str(&command);
    let root = root.to_path_buf();

    let run = move |ctx: &TaskContext<'_>| run_shell_command(ctx, &command, &root);

    Task::new(TaskId::new(id), run).with_fingerprint(fingerprint)
}

/// Run a shell command and capture output
fn run_shell_command(ctx: &TaskContext<'_>, command: &str, root: &Path) -> anyhow::Result<TaskOutput> {
    debug!(task = %ctx.id, %command, "running shell command");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .output()
        .map_err(|e| anyhow::anyhow!("Failed to spawn: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stdout.lines() {
        debug!(task = %ctx.id, "{}", line);
    }
    for line in stderr.lines() {
        debug!(task = %ctx.id, stream = "stderr", "{}", line);
    }

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        bail!("Command exited with code {}: {}", code, stderr.trim_end());
    }

    Ok(TaskOutput::new())
}

/// Turn one configured task into an engine task
pub fn task_from_config(config: &TaskConfig, root: &Path) -> Task {
    let mut task = shell_task(config.id.clone(), config.command.clone(), root)
        .with_priority(config.priority);

    for path in &config.depends_on {
        task = task.with_dependency(path.clone(), NodeRef::node(PathNode::new(root, path)));
    }
    for pattern in &config.depends_on_glob {
        task = task.with_dependency(pattern.clone(), NodeRef::provisional(GlobNode::new(root, pattern)));
    }
    for path in &config.produces {
        task = task.with_product(path.clone(), NodeRef::node(PathNode::new(root, path)));
    }

    if config.skip {
        task = task.with_marker(Marker::Skip {
            reason: config.skip_reason.clone(),
        });
    }
    if let Some(variable) = &config.skip_if_env {
        task = task.with_marker(Marker::SkipIf {
            condition: config.skip_condition(),
            reason: Some(
                config
                    .skip_reason
                    .clone()
                    .unwrap_or_else(|| format!("{} is set", variable)),
            ),
        });
    }
    if config.persist {
        task = task.with_marker(Marker::Persist);
    }

    task
}

/// All tasks declared in a configuration, in declaration order
#[instrument(skip_all, fields(root = %root.display()))]
pub fn tasks_from_config(config: &Config, root: &Path) -> Vec<Task> {
    let tasks: Vec<Task> = config
        .tasks
        .iter()
        .map(|task| task_from_config(task, root))
        .collect();
    debug!(count = tasks.len(), "collected tasks from configuration");
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{run, Job};
    use crate::dag::TaskDag;
    use crate::task::Outcome;
    use cairn_core::Priority;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_follows_command() {
        let root = Path::new("/tmp");
        let a = shell_task("t", "echo a", root);
        let b = shell_task("t", "echo b", root);
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), shell_task("t", "echo a", root).signature());
    }

    #[test]
    fn test_shell_task_runs_in_root() {
        let temp = TempDir::new().unwrap();
        let task = shell_task("write", "printf hi > out.txt", temp.path())
            .with_product("out", NodeRef::node(PathNode::new(temp.path(), "out.txt")));
        let dag = TaskDag::build(vec![task]).unwrap();

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Success, "{:?}", result.message);
        assert_eq!(fs::read_to_string(temp.path().join("out.txt")).unwrap(), "hi");
    }

    #[test]
    fn test_shell_task_failure_reports_stderr() {
        let temp = TempDir::new().unwrap();
        let dag = TaskDag::build(vec![shell_task("fail", "echo nope >&2; exit 3", temp.path())]).unwrap();

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.message.unwrap(), "Command exited with code 3: nope");
    }

    #[test]
    fn test_task_from_config() {
        let temp = TempDir::new().unwrap();
        let mut config = TaskConfig::new("compile", "cc main.c")
            .with_depends_on("main.c")
            .with_produces("out/app");
        config.depends_on_glob.push("include/*.h".to_string());
        config.priority = Priority::TryLast;
        config.persist = true;

        let task = task_from_config(&config, temp.path());
        assert_eq!(task.id.as_str(), "compile");
        assert_eq!(task.dependencies.len(), 2);
        assert!(task.has_provisional());
        assert_eq!(task.products[0].1.name(), "out/app");
        assert_eq!(task.priority, Priority::TryLast);
        assert!(task.is_persist());
        assert!(task.skip_reason().is_none());
    }

    #[test]
    fn test_skip_from_config() {
        let temp = TempDir::new().unwrap();
        let mut config = TaskConfig::new("docs", "make docs");
        config.skip = true;
        config.skip_reason = Some("slow".to_string());
        assert_eq!(
            task_from_config(&config, temp.path()).skip_reason().as_deref(),
            Some("slow")
        );

        let mut config = TaskConfig::new("docs", "make docs");
        config.skip_if_env = Some("CAIRN_TEST_SURELY_UNSET_VARIABLE".to_string());
        assert!(task_from_config(&config, temp.path()).skip_reason().is_none());
    }

    #[test]
    fn test_tasks_from_config_keeps_order() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.tasks.push(TaskConfig::new("b", "true"));
        config.tasks.push(TaskConfig::new("a", "true"));

        let ids: Vec<String> = tasks_from_config(&config, temp.path())
            .iter()
            .map(|t| t.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
