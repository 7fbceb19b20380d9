use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::document::{DocumentSession, Fetch};
use super::{BrowserEngine, BrowsingSession, SessionError, Timeouts};
use crate::pacer::Identity;

/// In-memory web: canned responses keyed by exact URL. Unknown URLs fail.
#[derive(Clone, Default)]
pub struct ScriptedWeb {
    pages: Arc<HashMap<String, Result<(u16, String), SessionError>>>,
    panics: Arc<Vec<String>>,
    visits: Arc<Mutex<Vec<String>>>,
}

impl ScriptedWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), Ok((200, html.to_string())));
        self
    }

    pub fn status(mut self, url: &str, status: u16, html: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), Ok((status, html.to_string())));
        self
    }

    /// Fetching `url` panics, standing in for a bug deep inside a cell.
    pub fn panicking(mut self, url: &str) -> Self {
        Arc::make_mut(&mut self.panics).push(url.to_string());
        self
    }

    pub fn fixture(self, url: &str, name: &str) -> Self {
        let html = std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap();
        self.page(url, &html)
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn session(&self) -> DocumentSession<ScriptedWeb> {
        DocumentSession::new(self.clone(), test_timeouts())
    }
}

pub fn test_timeouts() -> Timeouts {
    Timeouts {
        navigation: Duration::from_secs(1),
        content: Duration::from_secs(1),
    }
}

#[async_trait]
impl Fetch for ScriptedWeb {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<(u16, String), SessionError> {
        self.visits.lock().unwrap().push(url.to_string());
        if self.panics.iter().any(|u| u == url) {
            panic!("scripted failure fetching {}", url);
        }
        self.pages.get(url).cloned().unwrap_or_else(|| {
            Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "connection refused".into(),
            })
        })
    }
}

/// Engine over a [`ScriptedWeb`]; can be told to refuse sessions.
pub struct ScriptedEngine {
    pub web: ScriptedWeb,
    pub refuse: Vec<usize>,
    pub opened: Arc<Mutex<Vec<Identity>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl ScriptedEngine {
    pub fn new(web: ScriptedWeb) -> Self {
        Self {
            web,
            refuse: Vec::new(),
            opened: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Refuse the n-th (0-based) session request.
    pub fn refusing(mut self, n: usize) -> Self {
        self.refuse.push(n);
        self
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_session(
        &mut self,
        identity: &Identity,
        timeouts: Timeouts,
    ) -> Result<Box<dyn BrowsingSession>, SessionError> {
        let n = {
            let mut opened = self.opened.lock().unwrap();
            opened.push(identity.clone());
            opened.len() - 1
        };
        if self.refuse.contains(&n) {
            return Err(SessionError::Unavailable("engine refused a new context".into()));
        }
        Ok(Box::new(DocumentSession::new(self.web.clone(), timeouts)))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}
