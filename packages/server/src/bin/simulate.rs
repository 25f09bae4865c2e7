use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_branch::{BranchStatus, Commit, CommitData, ForkResolution, SyncError};
use tandem_common::{DocumentId, ProjectId};
use tandem_ot::TextOperation;
use tandem_server::{snapshot_merger, spawn_reaper, CommitStore, DocumentRooms, MemoryServer, RecordingConsumer, ServerLink};
use tandem_sync::{BranchHandle, DocumentHandle, SessionError, SyncConfig};

const PROJECT: &str = "simulation";
const BRANCH: &str = "master";
const DOCUMENT: &str = "notes";

const POLL: Duration = Duration::from_millis(10);
const EDIT_ATTEMPTS: usize = 50;
const CONVERGE_ROUNDS: usize = 500;

/// Tandem simulator - concurrent clients against an in-memory server
#[derive(Parser, Debug)]
#[command(name = "tandem-simulate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of simulated clients
    #[arg(short, long, default_value_t = 3)]
    clients: usize,

    /// Commits each client makes on the shared branch
    #[arg(long, default_value_t = 5)]
    commits: usize,

    /// Characters each client types into the shared document
    #[arg(long, default_value_t = 10)]
    edits: usize,

    /// Merge diverging pushes on the server instead of reporting forks
    #[arg(long)]
    merge: bool,

    /// Drop the first client's connection halfway through
    #[arg(long)]
    disconnect: bool,

    /// Directory holding tandem.config.json
    #[arg(long, default_value = ".")]
    config: PathBuf,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientReport {
    client_id: String,
    head: String,
    status: BranchStatus,
    forks_abandoned: usize,
    commits_loaded: usize,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    server_head: String,
    server_text: String,
    commits_stored: usize,
    converged: bool,
    clients: Vec<ClientReport>,
}

struct Client {
    index: usize,
    link: Arc<ServerLink>,
    consumer: Arc<RecordingConsumer>,
    branch: BranchHandle,
    document: DocumentHandle,
    forks: AtomicUsize,
}

impl Client {
    async fn connect(
        server: &Arc<MemoryServer>,
        index: usize,
        project_id: &ProjectId,
        document_id: &DocumentId,
        config: &SyncConfig,
    ) -> anyhow::Result<Self> {
        let link = Arc::new(ServerLink::new(server.clone(), format!("client-{}", index)));
        let consumer = Arc::new(RecordingConsumer::new());
        let branch = BranchHandle::open(
            link.clone(),
            consumer.clone(),
            link.connection(),
            project_id.clone(),
            BRANCH,
            config,
        )
        .await?;
        let document = DocumentHandle::open(
            link.clone(),
            link.connection(),
            document_id.clone(),
            link.client_id().clone(),
            config,
        )
        .await?;

        Ok(Self {
            index,
            link,
            consumer,
            branch,
            document,
            forks: AtomicUsize::new(0),
        })
    }

    fn letter(&self) -> char {
        (b'a' + (self.index % 26) as u8) as char
    }

    async fn work(&self, cli: &Cli, project_id: &ProjectId) -> anyhow::Result<()> {
        let rounds = cli.commits.max(cli.edits);
        for round in 0..rounds {
            if round < cli.commits {
                self.commit(round, project_id).await?;
            }
            if round < cli.edits {
                self.edit(round).await?;
            }
            if cli.disconnect && self.index == 0 && round == rounds / 2 {
                tracing::info!("[Simulate] dropping {}", self.link.client_id());
                self.link.disconnect().await;
                tokio::time::sleep(POLL * 2).await;
                self.link.reconnect();
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Commit on top of whatever the local head is by the time we get there
    async fn commit(&self, round: usize, project_id: &ProjectId) -> anyhow::Result<()> {
        let client_id = self.link.client_id();
        loop {
            let info = self.branch.info().await?;
            if info.forked {
                self.abandon_fork().await?;
                continue;
            }

            let commit = Commit::new("#root", vec![info.local_hash], format!("{} change {}", client_id, round))
                .with_updater(client_id.as_str())
                .with_branch(BRANCH);
            let data = CommitData::new(project_id.clone(), BRANCH, commit)
                .with_core_object(format!("{}-{}", client_id, round), serde_json::json!(round));

            match self.branch.commit_locally(data.clone()).await {
                Ok(()) => {
                    self.consumer.apply_local(&data).await;
                    return Ok(());
                }
                Err(SessionError::Sync(e)) if e.is_ordering_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Type one character; retries when a remote operation lands first
    async fn edit(&self, round: usize) -> anyhow::Result<()> {
        for _ in 0..EDIT_ATTEMPTS {
            let len = self.document.content().chars().count();
            let at = (round * 7 + self.index) % (len + 1);
            let operation = TextOperation::new()
                .retain(at)
                .insert(self.letter().to_string())
                .retain(len - at);

            match self.document.apply_local_edit(operation).await {
                Ok(()) => return Ok(()),
                Err(SessionError::Ot(e)) => {
                    tracing::debug!("[Simulate] {} edit raced: {}", self.link.client_id(), e);
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!("{} could not place edit {}", self.link.client_id(), round)
    }

    async fn abandon_fork(&self) -> anyhow::Result<()> {
        match self.branch.resolve_fork(ForkResolution::Abandon).await {
            Ok(()) => {
                self.forks.fetch_add(1, Ordering::SeqCst);
            }
            Err(SessionError::Sync(SyncError::Busy)) | Err(SessionError::Sync(SyncError::NotForked)) => {}
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(POLL).await;
        Ok(())
    }

    async fn report(&self) -> anyhow::Result<ClientReport> {
        let info = self.branch.info().await?;
        Ok(ClientReport {
            client_id: self.link.client_id().to_string(),
            head: info.local_hash.to_string(),
            status: info.status,
            forks_abandoned: self.forks.load(Ordering::SeqCst),
            commits_loaded: self.consumer.loads().await.len(),
            text: self.document.content(),
        })
    }
}

/// Wait until every client sits on the server head and shows the server text
async fn converge(
    server: &MemoryServer,
    clients: &[Client],
    project_id: &ProjectId,
    document_id: &DocumentId,
) -> anyhow::Result<bool> {
    for _ in 0..CONVERGE_ROUNDS {
        let head = server.commits.get_branch_hash(project_id, BRANCH).await?;
        let text = server.rooms.content(document_id).await.map(|(text, _)| text);

        let mut settled = true;
        for client in clients {
            let info = client.branch.info().await?;
            if info.forked {
                client.abandon_fork().await?;
                settled = false;
                continue;
            }
            if Some(&info.local_hash) != head.as_ref()
                || info.queued > 0
                || Some(client.document.content()) != text
            {
                settled = false;
            }
        }
        if settled {
            return Ok(true);
        }
        tokio::time::sleep(POLL).await;
    }
    Ok(false)
}

async fn run(cli: &Cli) -> anyhow::Result<Report> {
    let config = SyncConfig::load(&cli.config)?;
    let commits = if cli.merge {
        CommitStore::with_merger(snapshot_merger())
    } else {
        CommitStore::new()
    };
    let server = Arc::new(MemoryServer::new(
        commits,
        DocumentRooms::new(config.inactivity_timeout()),
    ));
    let reaper = spawn_reaper(server.rooms.clone(), config.reaper_interval());

    let project_id = ProjectId::from(PROJECT);
    let document_id = DocumentId::from(DOCUMENT);
    let root = CommitData::new(
        project_id.clone(),
        BRANCH,
        Commit::new("#root", Vec::new(), "initial").with_time(0),
    );
    server.commits.create_project(project_id.clone(), BRANCH, root).await;
    server.rooms.open(document_id.clone(), "").await;

    let mut clients = Vec::with_capacity(cli.clients);
    for index in 0..cli.clients {
        clients.push(Client::connect(&server, index, &project_id, &document_id, &config).await?);
    }

    let work = clients.iter().map(|client| client.work(cli, &project_id));
    for result in futures::future::join_all(work).await {
        result?;
    }

    let converged = converge(&server, &clients, &project_id, &document_id).await?;

    let mut reports = Vec::with_capacity(clients.len());
    for client in &clients {
        reports.push(client.report().await?);
        client.document.close().await?;
        client.branch.close().await?;
    }
    reaper.abort();

    let server_head = server
        .commits
        .get_branch_hash(&project_id, BRANCH)
        .await?
        .map(|hash| hash.to_string())
        .unwrap_or_default();
    let server_text = server
        .rooms
        .content(&document_id)
        .await
        .map(|(text, _)| text)
        .unwrap_or_default();

    Ok(Report {
        server_head,
        server_text,
        commits_stored: server.commits.commit_count(&project_id).await,
        converged,
        clients: reports,
    })
}

fn print_report(report: &Report) {
    println!();
    println!(
        "🔁 {} {} client(s), {} commit(s) stored",
        "Simulated".green().bold(),
        report.clients.len(),
        report.commits_stored
    );
    println!("   Server head: {}", report.server_head);
    println!("   Server text: {:?}", report.server_text);
    println!();

    for client in &report.clients {
        let mark = if client.head == report.server_head && client.text == report.server_text {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "   {} {} {:?} loaded {} abandoned {}",
            mark, client.client_id, client.status, client.commits_loaded, client.forks_abandoned
        );
    }

    println!();
    if report.converged {
        println!("✨ {} all clients agree with the server", "Converged".green().bold());
    } else {
        println!("{} clients disagree with the server", "Diverged:".red().bold());
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match tokio::time::timeout(Duration::from_secs(cli.timeout), run(&cli)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("simulation did not finish within {}s", cli.timeout)),
    };

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), err);
            eprintln!();
            std::process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("{} {}", "Error:".red().bold(), err);
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }

    if !report.converged {
        std::process::exit(2);
    }
}
