//! cirrusd — the Cirrus monitor daemon.
//!
//! Seeds the application and topology stores from a config file and
//! supervises every configured application:
//! - Application / group / cluster monitor trees
//! - Dependency-ordered startup driven by live cluster status
//! - Status written back to the application store
//!
//! # Usage
//!
//! ```text
//! cirrusd --config cirrus.toml run
//! cirrusd --config cirrus.toml inspect --app storefront
//! ```

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cirrus_monitor::{
    ApplicationContext, DependencyNode, DependencyTree, GroupContext, MonitorBuilder,
    PolicyClusterMonitorFactory, Supervisor,
};
use cirrus_state::{ApplicationStore, PolicyRegistry, Status, TopologyStore};

use crate::config::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,cirrusd=debug,cirrus=debug";

#[derive(Parser)]
#[command(name = "cirrusd", about = "Cirrus monitor daemon")]
struct Cli {
    /// Path to the daemon configuration file.
    #[arg(long, global = true, default_value = "cirrus.toml")]
    config: PathBuf,

    /// Cluster monitor refresh period, e.g. "30s". Overrides the config file.
    #[arg(long, global = true)]
    monitor_interval: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Supervise every configured application until Ctrl-C.
    Run,
    /// Print an application's dependency trees as JSON.
    Inspect {
        /// Application id.
        #[arg(long)]
        app: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = DaemonConfig::from_file(&cli.config)?;
    if let Some(interval) = cli.monitor_interval {
        config.monitor.interval = interval;
    }
    let interval = config.monitor_interval();

    match cli.command {
        Command::Run => run(config, interval).await,
        Command::Inspect { app } => inspect(config, interval, &app).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Load the configured topology and applications into fresh stores.
async fn seed(config: &DaemonConfig) -> (ApplicationStore, TopologyStore) {
    let applications = ApplicationStore::new();
    let topology = TopologyStore::new();

    for service in &config.services {
        topology.put_service(service.clone()).await;
    }
    for application in &config.applications {
        applications.put_application(application.clone()).await;
    }

    info!(
        services = config.services.len(),
        applications = config.applications.len(),
        "stores seeded"
    );
    (applications, topology)
}

fn monitor_builder(
    config: &DaemonConfig,
    applications: ApplicationStore,
    topology: TopologyStore,
    interval: Duration,
) -> MonitorBuilder {
    let policies = Arc::new(PolicyRegistry::from(config.policies.clone()));
    let factory = PolicyClusterMonitorFactory::new(policies, topology.clone()).with_interval(interval);
    MonitorBuilder::new(applications, topology, Arc::new(factory))
}

async fn run(config: DaemonConfig, interval: Duration) -> anyhow::Result<()> {
    info!("Cirrus daemon starting");

    // ── Initialize stores and supervisor ──────────────────────────

    let (applications, topology) = seed(&config).await;
    let builder = monitor_builder(&config, applications, topology, interval);
    let mut supervisor = Supervisor::new(builder, config.monitor.event_buffer);
    info!(
        interval_ms = interval.as_millis() as u64,
        event_buffer = config.monitor.event_buffer,
        "supervisor initialized"
    );

    for application in &config.applications {
        if let Err(e) = supervisor.start_application(&application.id).await {
            error!(app_id = %application.id, error = %e, "failed to start application monitor");
        }
    }
    info!(
        applications = supervisor.application_ids().len(),
        "application monitors started"
    );

    // ── Event loop ────────────────────────────────────────────────

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            event = supervisor.next_event() => event,
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
                info!("shutdown signal received");
                None
            }
        };
        let Some(event) = event else {
            break;
        };
        supervisor.handle_event(event).await;
    }

    // ── Shutdown ──────────────────────────────────────────────────

    for app_id in supervisor.application_ids() {
        if let Err(e) = supervisor.stop_application(&app_id).await {
            warn!(%app_id, error = %e, "failed to stop application monitor");
        }
    }
    supervisor.shutdown();

    info!("Cirrus daemon stopped");
    Ok(())
}

#[derive(Serialize)]
struct InspectReport<'a> {
    application: &'a str,
    status: Status,
    dependencies: &'a DependencyTree,
    groups: BTreeMap<String, DependencyTree>,
}

/// Build the application's monitors without starting any execution unit
/// and print every composite's dependency tree.
async fn inspect(config: DaemonConfig, interval: Duration, app_id: &str) -> anyhow::Result<()> {
    let (applications, topology) = seed(&config).await;
    let builder = monitor_builder(&config, applications, topology, interval);

    let root = builder
        .build_application(app_id)
        .await
        .with_context(|| format!("building monitor for application {app_id}"))?;

    let mut groups = BTreeMap::new();
    let mut queue = group_contexts(root.dependencies());
    while let Some(ctx) = queue.pop() {
        let group = builder
            .build_group(None, &ctx, app_id)
            .await
            .with_context(|| format!("building monitor for group {}", ctx.id))?;
        queue.extend(group_contexts(group.dependencies()));
        groups.insert(ctx.id.clone(), group.dependencies().clone());
    }

    let report = InspectReport {
        application: app_id,
        status: root.status(),
        dependencies: root.dependencies(),
        groups,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn group_contexts(tree: &DependencyTree) -> Vec<GroupContext> {
    fn walk(nodes: &[DependencyNode], out: &mut Vec<GroupContext>) {
        for node in nodes {
            if let ApplicationContext::Group(ctx) = &node.context {
                out.push(ctx.clone());
            }
            walk(&node.children, out);
        }
    }
    let mut found = Vec::new();
    walk(tree.roots(), &mut found);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DaemonConfig {
        toml::from_str(include_str!("../cirrus.example.toml")).unwrap()
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cirrusd",
            "inspect",
            "--app",
            "storefront",
            "--log-format",
            "json",
            "--monitor-interval",
            "5s",
        ])
        .unwrap();
        assert!(cli.log_format == LogFormat::Json);
        assert_eq!(cli.monitor_interval.as_deref(), Some("5s"));
        assert!(matches!(cli.command, Command::Inspect { ref app } if app == "storefront"));
    }

    #[tokio::test]
    async fn seed_loads_every_record() {
        let config = config();
        let (applications, topology) = seed(&config).await;

        assert_eq!(applications.application_ids(), vec!["storefront".to_string()]);
        let guard = topology
            .read_cluster("mysql", "mysql.storefront.domain")
            .await;
        let cluster = guard.cluster().unwrap();
        assert_eq!(cluster.service_name, "mysql");
        assert_eq!(cluster.active_member_count(), 1);
    }

    #[tokio::test]
    async fn sample_application_builds_every_group() {
        let config = config();
        let (applications, topology) = seed(&config).await;
        let builder = monitor_builder(&config, applications, topology, Duration::from_secs(1));

        let root = builder.build_application("storefront").await.unwrap();
        let contexts = group_contexts(root.dependencies());
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].has_child);

        let backend = builder
            .build_group(None, &contexts[0], "storefront")
            .await
            .unwrap();
        assert_eq!(
            backend.dependencies().member_ids(),
            vec!["mysql.storefront.domain", "php.storefront.domain"]
        );
    }

    #[tokio::test]
    async fn inspect_rejects_unknown_application() {
        let err = inspect(config(), Duration::from_secs(1), "ghost")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("ghost"));
    }
}
