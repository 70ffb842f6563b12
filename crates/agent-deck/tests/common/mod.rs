//! Test utilities and common setup.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_deck::api::{self, AppState};
use agent_deck::auth::AuthState;
use agent_deck::config::Settings;
use agent_deck::conversation::encode_project_path;
use agent_deck::session::{NewSession, Session};
use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TEST_TOKEN: &str = "test-token";

/// Application state rooted in a temporary directory.
pub struct TestApp {
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(|_| {}, AuthState::disabled())
    }

    pub fn with(configure: impl FnOnce(&mut Settings), auth: AuthState) -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::new(dir.path().join("projects"), dir.path().join("profile"));
        configure(&mut settings);
        Self {
            state: AppState::new(settings, auth),
            dir,
        }
    }

    pub fn router(&self) -> Router {
        api::create_router(self.state.clone())
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.state.settings.projects_dir.clone()
    }

    pub fn create_session(&self, id: &str, project_path: &str) -> Session {
        self.state
            .sessions
            .create(NewSession {
                id: Some(id.to_string()),
                project_path: project_path.to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    /// Write a conversation log for `project_path`.
    pub fn write_log(&self, project_path: &str, name: &str, lines: &[&str]) -> PathBuf {
        let dir = self.projects_dir().join(encode_project_path(project_path));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    /// Serve the router on an ephemeral port.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Regular files directly inside `dir`.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}
