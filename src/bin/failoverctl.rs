use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "failoverctl")]
#[command(about = "Operator CLI for the autofailover monitor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:6000")]
    url: String,

    #[arg(short, long, env = "AUTOFAILOVER_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[arg(short, long, default_value = "default")]
    formation: String,

    #[arg(short, long, default_value_t = 0)]
    group: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every group known to the monitor
    Status,
    /// List the nodes of the group
    Nodes,
    /// Show the group state, including the pending command
    State,
    /// Show the write-authorised node
    Primary,
    /// Print recent events
    Events {
        #[arg(short, long)]
        node: Option<u32>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Fail over to the best standby
    Failover,
    /// Switch over to the best standby (requires a stable group)
    Switchover,
    /// Cancel a failover or switchover that has not started yet
    Cancel,
    /// Enable or disable maintenance on a node
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },
    /// Change a setting
    Set {
        #[command(subcommand)]
        setting: Setting,
    },
    /// Remove a node from the monitor
    Remove { node: u32 },
}

#[derive(Subcommand)]
enum MaintenanceAction {
    Enable { node: u32 },
    Disable { node: u32 },
}

#[derive(Subcommand)]
enum Setting {
    /// Candidate priority of a node (0..=100, 0 never promotes)
    CandidatePriority { node: u32, value: i64 },
    /// Whether a node counts towards the synchronous quorum
    ReplicationQuorum {
        node: u32,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Number of synchronous standbys of the group
    NumberSyncStandbys { value: u32 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let group = format!("formations/{}/groups/{}", cli.formation, cli.group);
    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Nodes => (Method::GET, format!("/api/v1/{group}/nodes"), None),
        Commands::State => (Method::GET, format!("/api/v1/{group}/state"), None),
        Commands::Primary => (Method::GET, format!("/api/v1/{group}/primary"), None),
        Commands::Events { node, limit } => {
            let mut path = format!(
                "/api/v1/events?formation={}&group={}&limit={limit}",
                cli.formation, cli.group
            );
            if let Some(node) = node {
                path.push_str(&format!("&node={node}"));
            }
            (Method::GET, path, None)
        }
        Commands::Failover => (Method::POST, format!("/admin/{group}/failover"), None),
        Commands::Switchover => (Method::POST, format!("/admin/{group}/switchover"), None),
        Commands::Cancel => (Method::DELETE, format!("/admin/{group}/pending"), None),
        Commands::Maintenance { action } => match action {
            MaintenanceAction::Enable { node } => (Method::POST, format!("/admin/nodes/{node}/maintenance"), None),
            MaintenanceAction::Disable { node } => (Method::DELETE, format!("/admin/nodes/{node}/maintenance"), None),
        },
        Commands::Set { setting } => match setting {
            Setting::CandidatePriority { node, value } => (
                Method::PUT,
                format!("/admin/nodes/{node}/candidate_priority"),
                Some(json!({ "value": value })),
            ),
            Setting::ReplicationQuorum { node, value } => (
                Method::PUT,
                format!("/admin/nodes/{node}/replication_quorum"),
                Some(json!({ "value": value })),
            ),
            Setting::NumberSyncStandbys { value } => (
                Method::PUT,
                format!("/admin/{group}/number_sync_standbys"),
                Some(json!({ "value": value })),
            ),
        },
        Commands::Remove { node } => (Method::DELETE, format!("/admin/nodes/{node}"), None),
    };

    let mut request = client.request(method, format!("{}{}", cli.url, path)).headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let res = request.send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: monitor returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
