use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{connect, OutputFormat};
use crate::resources::{AdminResource, ListQuery, Resource, TreeNode};

#[derive(Subcommand)]
pub enum ResourceCommands {
    #[command(about = "List records of a resource")]
    List {
        #[arg(help = "Resource name (tenants, roles, permissions, menus, groups, options, activities, policies, moderation)")]
        resource: AdminResource,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, help = "Sort expression, e.g. -created_at")]
        sort: Option<String>,
        #[arg(long = "filter", short = 'f', help = "Filter as key=value, repeatable")]
        filters: Vec<String>,
    },

    #[command(about = "Show one record")]
    Show {
        resource: AdminResource,
        #[arg(help = "Record ID")]
        id: String,
    },

    #[command(about = "Create record from --data or stdin")]
    Create {
        resource: AdminResource,
        #[arg(long, help = "JSON body")]
        data: Option<String>,
    },

    #[command(about = "Update record from --data or stdin")]
    Update {
        resource: AdminResource,
        #[arg(help = "Record ID")]
        id: String,
        #[arg(long, help = "JSON body")]
        data: Option<String>,
    },

    #[command(about = "Delete record")]
    Delete {
        resource: AdminResource,
        #[arg(help = "Record ID")]
        id: String,
    },

    #[command(about = "Show a menu or permission list as a tree")]
    Tree {
        resource: AdminResource,
        #[arg(long, default_value = "id")]
        id_key: String,
        #[arg(long, default_value = "parent_id")]
        parent_key: String,
        #[arg(long, default_value_t = 100, help = "Page size used while pulling every row")]
        limit: u32,
    },
}

fn print_tree(nodes: &[TreeNode], depth: usize) {
    for node in nodes {
        let label = ["name", "title", "label"]
            .iter()
            .find_map(|key| node.value.get(*key).and_then(|v| v.as_str()))
            .unwrap_or("");
        let id = node.value.get("id").map(|v| v.to_string()).unwrap_or_default();
        println!("{}{} {}", "  ".repeat(depth), id, label);
        print_tree(&node.children, depth + 1);
    }
}

pub async fn handle(cmd: ResourceCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = connect()?;

    match cmd {
        ResourceCommands::List { resource, page, limit, sort, filters } => {
            let mut query = ListQuery::default().page(page).limit(limit);
            if let Some(sort) = sort {
                query = query.sort(sort);
            }
            for (key, value) in parse_pairs(&filters)? {
                query = query.filter(key, value);
            }

            let result = Resource::admin(client, resource).list(&query).await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Text => {
                    for item in &result.items {
                        println!("{}", item);
                    }
                    println!(
                        "-- page {} of {} ({} total)",
                        result.page,
                        result.total_pages().max(1),
                        result.total
                    );
                }
            }
            Ok(())
        }
        ResourceCommands::Show { resource, id } => {
            let record = Resource::admin(client, resource).show(&id).await?;
            output_value(&output_format, &record)
        }
        ResourceCommands::Create { resource, data } => {
            let body = read_json_body(data)?;
            let record = Resource::admin(client, resource).create(body).await?;
            output_success(
                &output_format,
                &format!("Created {} record", resource.name()),
                Some(json!({ "record": record })),
            )
        }
        ResourceCommands::Update { resource, id, data } => {
            let body = read_json_body(data)?;
            let record = Resource::admin(client, resource).update(&id, body).await?;
            output_success(
                &output_format,
                &format!("Updated {} record '{}'", resource.name(), id),
                Some(json!({ "record": record })),
            )
        }
        ResourceCommands::Delete { resource, id } => {
            Resource::admin(client, resource).remove(&id).await?;
            output_success(
                &output_format,
                &format!("Deleted {} record '{}'", resource.name(), id),
                None,
            )
        }
        ResourceCommands::Tree { resource, id_key, parent_key, limit } => {
            let tree = Resource::admin(client, resource)
                .tree(&id_key, &parent_key, limit)
                .await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
                OutputFormat::Text => print_tree(&tree, 0),
            }
            Ok(())
        }
    }
}
