#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::{Notify, watch};

use steamqueue::config::{Config, SupervisorConfig};
use steamqueue::manifest::AcfManifestReader;
use steamqueue::models::Profile;
use steamqueue::profiles::ProfileStore;
use steamqueue::queue::store::QueueStore;
use steamqueue::queue::{QueueDeps, QueueManager};
use steamqueue::resolver::DependencyResolver;
use steamqueue::state::AppState;
use steamqueue::supervisor::{ExecError, ExecSuccess, JobExecutor};

/// What the fake executor does for the next job.
pub enum Step {
    Succeed,
    Fail(ExecError),
    /// Block until `release()` or cancellation.
    Hold,
}

/// Scripted stand-in for the process supervisor.
#[derive(Default)]
pub struct FakeExecutor {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(i64, String)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    release: Notify,
}

impl FakeExecutor {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let fake = Self::default();
        fake.steps.lock().unwrap().extend(steps);
        Arc::new(fake)
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    /// (profile id, app id) of every job executed so far, in order.
    pub fn calls(&self) -> Vec<(i64, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_apps(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, app)| app).collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Let one held job finish successfully.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Wait until a job is inside `execute`.
    pub async fn entered(&self) {
        wait_until("executor to be entered", || async {
            self.active.load(Ordering::SeqCst) > 0
        })
        .await;
    }
}

#[async_trait]
impl JobExecutor for FakeExecutor {
    async fn execute(
        &self,
        profile: &Profile,
        app_id: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecSuccess, ExecError> {
        self.calls.lock().unwrap().push((profile.id, app_id.to_string()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        let result = match step {
            Step::Succeed => Ok(success(app_id)),
            Step::Fail(e) => Err(e),
            Step::Hold => {
                tokio::select! {
                    _ = self.release.notified() => Ok(success(app_id)),
                    _ = async {
                        while !*cancel.borrow_and_update() {
                            if cancel.changed().await.is_err() {
                                std::future::pending::<()>().await;
                            }
                        }
                    } => Err(ExecError::Cancelled),
                }
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn success(app_id: &str) -> ExecSuccess {
    ExecSuccess {
        detail: format!("Success! App '{app_id}' fully installed."),
        elapsed: Duration::from_millis(1),
    }
}

pub fn profile(id: i64, app_id: &str, install_directory: &Path) -> Profile {
    Profile {
        id,
        name: format!("Profile {id}"),
        app_id: app_id.to_string(),
        install_directory: install_directory.to_path_buf(),
        anonymous: true,
        username: String::new(),
        password: String::new(),
        beta: None,
        beta_password: None,
        validate: false,
        extra_arguments: String::new(),
    }
}

/// Write `<install>/steamapps/appmanifest_<app_id>.acf`.
pub fn write_manifest(install_directory: &Path, app_id: &str, body: &str) {
    let steamapps = install_directory.join("steamapps");
    std::fs::create_dir_all(&steamapps).unwrap();
    std::fs::write(steamapps.join(format!("appmanifest_{app_id}.acf")), body).unwrap();
}

/// A queue over a temp directory, a fake executor and the given profiles.
pub struct TestQueue {
    pub dir: TempDir,
    pub queue: QueueManager,
    pub executor: Arc<FakeExecutor>,
    pub profiles: Arc<ProfileStore>,
}

impl TestQueue {
    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("queue.json")
    }

    pub fn install_dir(&self, profile_id: i64) -> PathBuf {
        self.dir.path().join(format!("install-{profile_id}"))
    }

    /// Reopen a second manager over the same files, as after a restart.
    pub async fn reopen(&self, executor: Arc<FakeExecutor>) -> QueueManager {
        open_queue(&self.store_path(), self.profiles.clone(), executor, 500).await
    }
}

pub async fn test_queue(profile_count: i64, steps: impl IntoIterator<Item = Step>) -> TestQueue {
    test_queue_with_limit(profile_count, steps, 500).await
}

pub async fn test_queue_with_limit(
    profile_count: i64,
    steps: impl IntoIterator<Item = Step>,
    history_limit: usize,
) -> TestQueue {
    let dir = tempfile::tempdir().unwrap();
    let profiles: Vec<Profile> = (1..=profile_count)
        .map(|id| {
            profile(
                id,
                &(100 * id).to_string(),
                &dir.path().join(format!("install-{id}")),
            )
        })
        .collect();
    let profiles = Arc::new(ProfileStore::from_profiles(profiles));
    let executor = FakeExecutor::new(steps);
    let queue = open_queue(
        &dir.path().join("queue.json"),
        profiles.clone(),
        executor.clone(),
        history_limit,
    )
    .await;

    TestQueue {
        dir,
        queue,
        executor,
        profiles,
    }
}

pub async fn open_queue(
    store_path: &Path,
    profiles: Arc<ProfileStore>,
    executor: Arc<FakeExecutor>,
    history_limit: usize,
) -> QueueManager {
    QueueManager::open(QueueDeps {
        store: QueueStore::new(store_path),
        profiles,
        executor,
        resolver: DependencyResolver::new(Arc::new(AcfManifestReader)),
        history_limit,
    })
    .await
    .expect("queue should open")
}

/// Poll `check` until it holds, failing the test after ten seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_history(queue: &QueueManager, len: usize) {
    wait_until(&format!("{len} history item(s)"), || {
        let queue = queue.clone();
        async move { queue.history().await.len() >= len }
    })
    .await;
}

/// A running test server over a fake executor.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub queue: TestQueue,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

/// Spawn the HTTP API over a fresh queue with two profiles (apps 100 and 200).
pub async fn spawn_app(steps: impl IntoIterator<Item = Step>) -> TestApp {
    let queue = test_queue(2, steps).await;

    let mut supervisor = SupervisorConfig::new(queue.dir.path().join("steamcmd.sh"));
    supervisor.job_timeout = Duration::from_secs(5);

    let config = Config {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        data_dir: queue.dir.path().to_path_buf(),
        queue_file: queue.store_path(),
        profiles_file: queue.dir.path().join("profiles.json"),
        history_limit: 500,
        autostart: false,
        log_level: "warn".to_string(),
        supervisor,
    };

    let state = Arc::new(AppState {
        config,
        profiles: queue.profiles.clone(),
        queue: queue.queue.clone(),
    });
    let app = steamqueue::build_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        queue,
    }
}
