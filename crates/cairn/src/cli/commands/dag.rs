//! Dag command

use clap::Args;
use console::style;
use tracing::info;

use cairn_tasks::{schedule_order, tasks_from_config, NodeRef, TaskDag};

use super::load_project;
use crate::cli::output::{self, key_value, path_style, task_style};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Print tasks in the order a sequential build would run them
#[derive(Debug, Args)]
pub struct DagCommand;

/// One task as shown by `cairn dag`
#[derive(Debug, PartialEq)]
struct Entry {
    id: String,
    priority: String,
    dependencies: Vec<String>,
    products: Vec<String>,
    after: Vec<String>,
}

impl DagCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!("executing dag command");
        let (config, root) = load_project()?;

        let dag = match TaskDag::build(tasks_from_config(&config, &root)) {
            Ok(dag) => dag,
            Err(e) => {
                output::error(&e.to_string());
                return Ok(exit_codes::RESOLUTION_ERROR);
            }
        };
        let entries = entries(&dag);

        match cli.format {
            OutputFormat::Json => {
                let tasks: Vec<serde_json::Value> = entries
                    .iter()
                    .map(|entry| {
                        serde_json::json!({
                            "id": entry.id,
                            "priority": entry.priority,
                            "dependencies": entry.dependencies,
                            "products": entry.products,
                            "after": entry.after,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            }
            OutputFormat::Text => print_entries(&entries, cli.verbose),
        }

        Ok(exit_codes::SUCCESS)
    }
}

fn entries(dag: &TaskDag) -> Vec<Entry> {
    schedule_order(dag)
        .into_iter()
        .map(|index| {
            let task = dag.task(index);
            Entry {
                id: task.id.to_string(),
                priority: task.priority.to_string(),
                dependencies: task.dependencies.iter().map(|(_, node)| describe(node)).collect(),
                products: task.products.iter().map(|(_, node)| describe(node)).collect(),
                after: dag
                    .predecessors(index)
                    .into_iter()
                    .map(|p| dag.task(p).id.to_string())
                    .collect(),
            }
        })
        .collect()
}

fn describe(node: &NodeRef) -> String {
    if node.is_provisional() {
        format!("{} (provisional)", node.name())
    } else {
        node.name().to_string()
    }
}

fn print_entries(entries: &[Entry], verbose: bool) {
    if entries.is_empty() {
        output::info("No tasks configured.");
        return;
    }

    for (position, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. {} {}",
            position + 1,
            task_style().apply_to(&entry.id),
            style(format!("[{}]", entry.priority)).dim()
        );
        if !entry.after.is_empty() {
            println!("{}", key_value("after", &entry.after.join(", ")));
        }
        if verbose {
            for (key, nodes) in [("needs", &entry.dependencies), ("makes", &entry.products)] {
                if nodes.is_empty() {
                    continue;
                }
                let nodes: Vec<String> = nodes
                    .iter()
                    .map(|n| path_style().apply_to(n).to_string())
                    .collect();
                println!("{}", key_value(key, &nodes.join(", ")));
            }
        }
    }
}
