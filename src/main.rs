use anyhow::Result;
use awsctl::aws::{cleanup, cloudfront, format_aws_error, resolve_service, resolve_stack};
use awsctl::aws::{AwsCli, ResolutionError};
use awsctl::config::Config;
use awsctl::lifecycle::{
    AggregateResult, BulkAction, BulkOptions, BulkRunner, CleanupCandidate, EcsCapacity,
    NameFilter, Orchestrator, OrchestratorSettings, StdinConfirmer, WaitSpec,
};
use awsctl::progress::ConsoleProgress;
use awsctl::VERSION;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Bulk lifecycle control of AWS resources
#[derive(Parser, Debug)]
#[command(name = "awsctl", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// AWS CLI profile to use
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region to use
    #[arg(long, global = true)]
    region: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Maximum parallel operations per stage
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Whole-stack operations
    #[command(subcommand)]
    Stack(StackCommand),
    /// Single ECS service operations
    #[command(subcommand)]
    Ecs(EcsCommand),
    /// CloudFront operations
    #[command(subcommand)]
    Cloudfront(CloudfrontCommand),
    /// IAM cleanup
    #[command(subcommand)]
    Iam(IamCommand),
    /// Load balancer cleanup
    #[command(subcommand)]
    Elb(ElbCommand),
    /// S3 cleanup
    #[command(subcommand)]
    S3(S3Command),
    /// ECR cleanup
    #[command(subcommand)]
    Ecr(EcrCommand),
    /// CloudWatch Logs cleanup
    #[command(subcommand)]
    Logs(LogsCommand),
    /// EventBridge rule state
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Show or change saved settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum StackCommand {
    /// Show the classified resources of a stack
    Resources { stack: String },
    /// Start EC2, RDS and Aurora, then scale ECS services up
    Start {
        stack: String,
        /// Do not wait for ECS services to converge
        #[arg(long)]
        no_wait: bool,
    },
    /// Scale ECS services to zero, then stop EC2, RDS and Aurora
    Stop {
        stack: String,
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ServiceArgs {
    /// Stack that owns the service
    #[arg(long)]
    stack: String,
    /// ECS service name
    #[arg(long)]
    service: String,
    /// Do not wait for the service to converge
    #[arg(long)]
    no_wait: bool,
}

#[derive(Subcommand, Debug)]
enum EcsCommand {
    /// Scale a service up
    Start {
        #[command(flatten)]
        target: ServiceArgs,
        #[arg(long)]
        min: Option<i32>,
        #[arg(long)]
        max: Option<i32>,
    },
    /// Scale a service to zero
    Stop {
        #[command(flatten)]
        target: ServiceArgs,
    },
    /// Force a new deployment
    Redeploy {
        #[command(flatten)]
        target: ServiceArgs,
    },
}

#[derive(Subcommand, Debug)]
enum CloudfrontCommand {
    /// Invalidate cached paths
    Invalidate {
        #[arg(long)]
        distribution_id: String,
        /// Path to invalidate (repeatable)
        #[arg(long = "path", required = true)]
        paths: Vec<String>,
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct BulkArgs {
    /// Name pattern: glob when it contains * ? or [, substring otherwise
    #[arg(long)]
    filter: String,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
    /// List what would happen without changing anything
    #[arg(long)]
    dry_run: bool,
}

impl BulkArgs {
    fn options(&self) -> BulkOptions {
        BulkOptions {
            confirm: !self.yes,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Subcommand, Debug)]
enum IamCommand {
    /// Delete IAM roles
    DeleteRoles {
        #[command(flatten)]
        bulk: BulkArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ElbCommand {
    /// Delete load balancers
    Delete {
        #[command(flatten)]
        bulk: BulkArgs,
        /// Disable deletion protection before deleting
        #[arg(long)]
        unprotect: bool,
    },
}

#[derive(Subcommand, Debug)]
enum S3Command {
    /// Delete empty buckets
    DeleteBuckets {
        #[command(flatten)]
        bulk: BulkArgs,
    },
}

#[derive(Subcommand, Debug)]
enum EcrCommand {
    /// Delete repositories
    DeleteRepos {
        #[command(flatten)]
        bulk: BulkArgs,
        /// Delete repositories that still contain images
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum LogsCommand {
    /// Delete log groups
    DeleteGroups {
        #[command(flatten)]
        bulk: BulkArgs,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    Enable {
        #[command(flatten)]
        bulk: BulkArgs,
    },
    Disable {
        #[command(flatten)]
        bulk: BulkArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show,
    SetProfile { profile: String },
    SetRegion { region: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("awsctl {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("awsctl").join("awsctl.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".awsctl").join("awsctl.log");
    }
    PathBuf::from("awsctl.log")
}

/// Everything a command needs, resolved once from flags and config
struct Session {
    aws: AwsCli,
    config: Config,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl Session {
    fn orchestrator(&self, no_wait: bool) -> Orchestrator {
        let settings = OrchestratorSettings {
            wait_for_ecs: !no_wait,
            ..self.settings.clone()
        };
        Orchestrator::new(
            Arc::new(self.aws.clone()),
            settings,
            Arc::new(ConsoleProgress),
            self.cancel.clone(),
        )
    }

    fn wait_spec(&self, description: &str) -> WaitSpec {
        WaitSpec::new(
            description,
            self.settings.poll_interval,
            self.settings.wait_timeout,
        )
    }

    async fn bulk(
        &self,
        candidates: Vec<CleanupCandidate>,
        action: Arc<dyn BulkAction>,
        bulk: &BulkArgs,
    ) -> Result<bool> {
        let verb = action.verb().to_string();
        let runner = BulkRunner::new(
            self.settings.max_concurrency,
            Arc::new(ConsoleProgress),
            Arc::new(StdinConfirmer),
            self.cancel.clone(),
        )
        .with_task_timeout(self.settings.task_timeout);
        let summary = runner.run(candidates, action, bulk.options()).await?;

        for failure in summary.results.iter().filter(|r| !r.success) {
            eprintln!(
                "  ✗ {}: {}",
                failure.item,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!("{}", summary.line(&verb));
        Ok(!summary.has_failures())
    }
}

fn report(result: &AggregateResult) -> bool {
    if !result.is_success() {
        eprintln!("Failures:");
        for failure in result.failures() {
            eprintln!(
                "  ✗ {}: {}",
                failure.item,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("{}", result.summary());
    result.is_success()
}

fn describe_error(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ResolutionError>() {
        Some(ResolutionError::StackNotFound(_)) | Some(ResolutionError::ServiceNotFound { .. }) => {
            error.to_string()
        }
        _ => format_aws_error(error),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling outstanding operations...");
                tracing::warn!("Ctrl-C received");
                cancel.cancel();
            }
        }
    });

    match run(args, cancel).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("Command failed: {:#}", e);
            eprintln!("Error: {}", describe_error(&e));
            std::process::exit(1);
        }
    }
}

/// Run a command; `Ok(false)` means it finished with item failures
async fn run(args: Args, cancel: CancellationToken) -> Result<bool> {
    let mut config = Config::load();

    if let Command::Config(command) = &args.command {
        return config_command(&mut config, command);
    }

    let profile = config.effective_profile(args.profile.clone());
    let region = config.effective_region(args.region.clone());
    tracing::info!("Using profile: {:?}, region: {:?}", profile, region);

    let session = Session {
        aws: AwsCli::new(profile, region),
        settings: config.orchestrator_settings(args.concurrency)?,
        config,
        cancel,
    };

    match args.command {
        Command::Stack(command) => stack_command(&session, command).await,
        Command::Ecs(command) => ecs_command(&session, command).await,
        Command::Cloudfront(CloudfrontCommand::Invalidate {
            distribution_id,
            paths,
            no_wait,
        }) => {
            let spec = session.wait_spec("invalidation");
            let id = cloudfront::invalidate(
                &session.aws,
                &distribution_id,
                &paths,
                (!no_wait).then_some(&spec),
                &session.cancel,
                &ConsoleProgress,
            )
            .await?;
            let state = if no_wait { "submitted" } else { "completed" };
            println!("Invalidation {} {} ({} paths)", id, state, paths.len());
            Ok(true)
        }
        Command::Iam(IamCommand::DeleteRoles { bulk }) => {
            let filter = NameFilter::parse(&bulk.filter)?;
            let roles = cleanup::list_roles(&session.aws, &filter).await?;
            let action = Arc::new(cleanup::DeleteRole::new(session.aws.clone()));
            session.bulk(roles, action, &bulk).await
        }
        Command::Elb(ElbCommand::Delete { bulk, unprotect }) => {
            let filter = NameFilter::parse(&bulk.filter)?;
            let lbs = cleanup::list_load_balancers(
                &session.aws,
                &filter,
                session.settings.max_concurrency,
            )
            .await?;
            let action = Arc::new(cleanup::DeleteLoadBalancer::new(
                session.aws.clone(),
                unprotect,
            ));
            session.bulk(lbs, action, &bulk).await
        }
        Command::S3(S3Command::DeleteBuckets { bulk }) => {
            let filter = NameFilter::parse(&bulk.filter)?;
            let buckets = cleanup::list_buckets(
                &session.aws,
                &filter,
                session.settings.max_concurrency,
            )
            .await?;
            let action = Arc::new(cleanup::DeleteBucket::new(session.aws.clone()));
            session.bulk(buckets, action, &bulk).await
        }
        Command::Ecr(EcrCommand::DeleteRepos { bulk, force }) => {
            let filter = NameFilter::parse(&bulk.filter)?;
            let repos = cleanup::list_repositories(
                &session.aws,
                &filter,
                session.settings.max_concurrency,
            )
            .await?;
            let action = Arc::new(cleanup::DeleteRepository::new(session.aws.clone(), force));
            session.bulk(repos, action, &bulk).await
        }
        Command::Logs(LogsCommand::DeleteGroups { bulk }) => {
            let filter = NameFilter::parse(&bulk.filter)?;
            let groups = cleanup::list_log_groups(&session.aws, &filter).await?;
            let action = Arc::new(cleanup::DeleteLogGroup::new(session.aws.clone()));
            session.bulk(groups, action, &bulk).await
        }
        Command::Rules(command) => {
            let (bulk, enable) = match &command {
                RulesCommand::Enable { bulk } => (bulk, true),
                RulesCommand::Disable { bulk } => (bulk, false),
            };
            let filter = NameFilter::parse(&bulk.filter)?;
            let rules = cleanup::list_rules(&session.aws, &filter).await?;
            let action = Arc::new(cleanup::SetRuleState::new(session.aws.clone(), enable));
            session.bulk(rules, action, bulk).await
        }
        Command::Config(_) => Ok(true),
    }
}

async fn stack_command(session: &Session, command: StackCommand) -> Result<bool> {
    match command {
        StackCommand::Resources { stack } => {
            let classified = resolve_stack(&session.aws, &stack).await?;
            print!("{}", serde_yaml::to_string(&classified)?);
            Ok(true)
        }
        StackCommand::Start { stack, no_wait } => {
            let classified = resolve_stack(&session.aws, &stack).await?;
            let result = session.orchestrator(no_wait).start_all(&classified).await;
            Ok(report(&result))
        }
        StackCommand::Stop { stack, no_wait } => {
            let classified = resolve_stack(&session.aws, &stack).await?;
            let result = session.orchestrator(no_wait).stop_all(&classified).await;
            Ok(report(&result))
        }
    }
}

async fn ecs_command(session: &Session, command: EcsCommand) -> Result<bool> {
    let result = match command {
        EcsCommand::Start { target, min, max } => {
            let min = min.unwrap_or(session.config.ecs_default_min);
            let max = max.unwrap_or(session.config.ecs_default_max.max(min));
            let capacity = EcsCapacity::new(min, max)?;
            let service = resolve_service(&session.aws, &target.stack, &target.service).await?;
            session
                .orchestrator(target.no_wait)
                .start_service(&service, capacity)
                .await
        }
        EcsCommand::Stop { target } => {
            let service = resolve_service(&session.aws, &target.stack, &target.service).await?;
            session
                .orchestrator(target.no_wait)
                .stop_service(&service)
                .await
        }
        EcsCommand::Redeploy { target } => {
            let service = resolve_service(&session.aws, &target.stack, &target.service).await?;
            session
                .orchestrator(target.no_wait)
                .redeploy_service(&service)
                .await
        }
    };
    Ok(report(&result))
}

fn config_command(config: &mut Config, command: &ConfigCommand) -> Result<bool> {
    match command {
        ConfigCommand::Show => {
            if let Some(path) = Config::config_path() {
                println!("# {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommand::SetProfile { profile } => {
            config.set_profile(profile)?;
            println!("Profile set to {}", profile);
        }
        ConfigCommand::SetRegion { region } => {
            config.set_region(region)?;
            println!("Region set to {}", region);
        }
    }
    Ok(true)
}
